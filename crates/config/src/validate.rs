//! Configuration validation engine.
//!
//! Detects unknown/misspelled fields, trigger regexes that will never match
//! what the dispatcher expects, and thresholds that contradict each other.

use std::{collections::HashMap, path::Path};

use regex::Regex;

use crate::schema::{ParleyConfig, RenderMode};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "regex", "threshold", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "trigger.switch_model"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Dynamic keys (backend types, preset keywords).
    Map(Box<KnownKeys>),
    Array(Box<KnownKeys>),
    Leaf,
}

fn leaves(names: &[&'static str]) -> KnownKeys {
    KnownKeys::Struct(names.iter().map(|n| (*n, KnownKeys::Leaf)).collect())
}

/// Mirrors every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Array, Leaf, Map, Struct};

    let limit_entry = || leaves(&["category", "id", "rate"]);

    let mut trigger = HashMap::from([("prefix_ai", Map(Box::new(Leaf)))]);
    for name in [
        "reset_command",
        "rollback_command",
        "ping_command",
        "prefix_image",
        "switch_model",
        "switch_command",
        "switch_voice",
        "mixed_only_command",
        "image_only_command",
        "text_only_command",
        "ignore_regex",
        "allowed_models",
        "allow_switching_ai",
    ] {
        trigger.insert(name, Leaf);
    }

    Struct(HashMap::from([
        ("trigger", Struct(trigger)),
        (
            "response",
            leaves(&[
                "mode",
                "buffer_delay",
                "length_threshold",
                "segment_max_len",
                "default_ai",
                "placeholder",
                "reset",
                "rollback_success",
                "rollback_fail",
                "error_format",
                "error_network_failure",
                "error_request_concurrent_error",
                "error_drawing",
                "timeout",
                "timeout_format",
                "max_timeout",
                "cancel_wait_too_long",
                "max_queue_size",
                "queue_full",
                "queued_notice_size",
                "queued_notice",
                "ping_response",
                "ping_tts_response",
            ]),
        ),
        ("system", leaves(&["auto_reset_timeout_seconds"])),
        (
            "presets",
            Struct(HashMap::from([
                ("command", Leaf),
                ("keywords", Map(Box::new(Leaf))),
                ("scan_dir", Leaf),
                ("loaded_successful", Leaf),
            ])),
        ),
        (
            "ratelimit",
            Struct(HashMap::from([
                ("warning_rate", Leaf),
                ("warning_msg", Leaf),
                ("exceed", Leaf),
                ("draw_warning_msg", Leaf),
                ("draw_exceed", Leaf),
                ("limits", Array(Box::new(limit_entry()))),
                ("draw_limits", Array(Box::new(limit_entry()))),
            ])),
        ),
        ("text_to_image", leaves(&["always", "default", "wkhtmltoimage"])),
        (
            "text_to_speech",
            leaves(&["always", "engine", "default", "default_voice_prefix"]),
        ),
        (
            "openai",
            leaves(&[
                "api_endpoint",
                "api_keys",
                "model",
                "temperature",
                "top_p",
                "presence_penalty",
                "frequency_penalty",
                "max_tokens",
                "stream",
                "max_history",
                "request_timeout",
            ]),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered one if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file);

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| e == "toml");

    let mut result = if is_toml {
        match std::fs::read_to_string(&actual_path) {
            Ok(content) => validate_toml_str(&crate::env_subst::substitute_env(&content)),
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "syntax",
                    "",
                    format!("failed to read config file: {e}"),
                )],
                config_path: None,
            },
        }
    } else {
        match crate::loader::load_config(&actual_path) {
            Ok(config) => ValidationResult {
                diagnostics: validate_config(&config),
                config_path: None,
            },
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "syntax",
                    "",
                    e.to_string(),
                )],
                config_path: None,
            },
        }
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&toml_value, &build_schema_map(), "", &mut diagnostics);

    match toml::from_str::<ParleyConfig>(toml_str) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on an already-parsed config.
#[must_use]
pub fn validate_config(config: &ParleyConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for (path, pattern) in [
        ("trigger.switch_model", &config.trigger.switch_model),
        ("trigger.switch_command", &config.trigger.switch_command),
        ("trigger.switch_voice", &config.trigger.switch_voice),
        ("presets.command", &config.presets.command),
    ] {
        check_capture_regex(path, pattern, &mut diagnostics);
    }
    for (i, pattern) in config.trigger.ignore_regex.iter().enumerate() {
        if let Err(e) = Regex::new(pattern) {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "regex",
                format!("trigger.ignore_regex[{i}]"),
                format!("invalid regex: {e}"),
            ));
        }
    }

    let response = &config.response;
    if let Err(e) = response.mode.parse::<RenderMode>() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "type-error",
            "response.mode",
            format!("{e}; falling back to \"mixed\""),
        ));
    }
    if response.timeout <= 0.0 || response.max_timeout <= 0.0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "threshold",
            "response.timeout",
            "timeouts must be positive",
        ));
    } else if response.timeout >= response.max_timeout {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "threshold",
            "response.timeout",
            format!(
                "timeout ({}) is not below max_timeout ({}); the still-thinking notice will never be sent",
                response.timeout, response.max_timeout
            ),
        ));
    }
    if response.buffer_delay < 0.0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "threshold",
            "response.buffer_delay",
            "buffer_delay cannot be negative",
        ));
    }
    if response.max_queue_size > 0 && response.queued_notice_size >= response.max_queue_size {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "threshold",
            "response.queued_notice_size",
            "queued_notice_size is not below max_queue_size; queued turns are rejected before any notice",
        ));
    }
    if response.segment_max_len == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "threshold",
            "response.segment_max_len",
            "segment_max_len must be positive",
        ));
    }
    if response.default_ai.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "threshold",
            "response.default_ai",
            "default_ai must name a backend type",
        ));
    }

    let warning_rate = config.ratelimit.warning_rate;
    if !(0.0..=1.0).contains(&warning_rate) {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "threshold",
            "ratelimit.warning_rate",
            format!("warning_rate {warning_rate} is outside 0..=1"),
        ));
    }

    let auto_reset = config.system.auto_reset_timeout_seconds;
    if auto_reset < -1 || auto_reset == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "threshold",
            "system.auto_reset_timeout_seconds",
            "use -1 to disable idle reset; other non-positive values reset on every turn",
        ));
    }

    if config.text_to_image.always && response.render_mode() != RenderMode::Image {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "threshold",
            "text_to_image.always",
            "image rendering is forced; response.mode is ignored",
        ));
    }

    diagnostics
}

fn check_capture_regex(path: &str, pattern: &str, diagnostics: &mut Vec<Diagnostic>) {
    match Regex::new(pattern) {
        Ok(re) if re.captures_len() < 2 => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "regex",
            path,
            "pattern needs one capture group for the argument",
        )),
        Ok(_) => {},
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "regex",
            path,
            format!("invalid regex: {e}"),
        )),
    }
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };

    match (value, schema) {
        (toml::Value::Table(table), KnownKeys::Struct(fields)) => {
            let known: Vec<&str> = fields.keys().copied().collect();
            for (key, child) in table {
                let path = join(key);
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child, child_schema, &path, diagnostics);
                } else {
                    let message = match suggest(key, &known, 3) {
                        Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                        None => "unknown field".to_string(),
                    };
                    diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "unknown-field",
                        path,
                        message,
                    ));
                }
            }
        },
        (toml::Value::Table(table), KnownKeys::Map(value_schema)) => {
            for (key, child) in table {
                check_unknown_fields(child, value_schema, &join(key), diagnostics);
            }
        },
        (toml::Value::Array(items), KnownKeys::Array(item_schema)) => {
            for (i, item) in items.iter().enumerate() {
                check_unknown_fields(item, item_schema, &format!("{prefix}[{i}]"), diagnostics);
            }
        },
        _ => {},
    }
}
