//! `{token}` substitution for user-facing message templates.

/// Replace every `{key}` in `template` with its value. Unknown tokens are left as-is.
#[must_use]
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        let token = format!("{{{key}}}");
        if out.contains(&token) {
            out = out.replace(&token, value);
        }
    }
    out
}
