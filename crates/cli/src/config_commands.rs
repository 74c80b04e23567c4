use std::path::Path;

use anyhow::Result;

use parley_config::validate::{self, Severity, ValidationResult};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let lines = report_lines(&result, verbose);
    for line in &lines {
        eprintln!("  {line}");
    }
    if !lines.is_empty() {
        eprintln!();
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// One colored line per diagnostic; info only when `verbose`.
fn report_lines(result: &ValidationResult, verbose: bool) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(|d| {
            let color = match d.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
                Severity::Info => CYAN,
            };
            if d.path.is_empty() {
                format!("{BOLD}{color}{}{RESET} {}", d.severity, d.message)
            } else {
                format!("{BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message)
            }
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_trigger_regex_is_reported() {
        let result = validate::validate_toml_str("[trigger]\nswitch_model = \"switch_model (\"\n");
        assert!(result.has_errors());

        let lines = report_lines(&result, false);
        assert!(lines.iter().any(|l| l.contains("trigger.switch_model")));
    }

    #[test]
    fn info_hidden_unless_verbose() {
        let result = ValidationResult {
            diagnostics: vec![validate::Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
        assert!(report_lines(&result, false).is_empty());
        assert_eq!(report_lines(&result, true).len(), 1);
    }
}
