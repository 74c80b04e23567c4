/// Replace `${ENV_VAR}` and `${ENV_VAR:-fallback}` placeholders in config text.
///
/// Unresolvable variables without a fallback are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: emit the remainder literally.
            result.push_str(&rest[start..]);
            return result;
        };
        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) if !value.is_empty() || fallback.is_none() => {
                result.push_str(&value)
            },
            (false, _, Some(fallback)) => result.push_str(fallback),
            _ => {
                result.push_str("${");
                result.push_str(body);
                result.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn lookup(name: &str) -> Option<String> {
        match name {
            "PARLEY_KEY" => Some("sk-test".to_string()),
            "PARLEY_EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[rstest]
    #[case("key=${PARLEY_KEY}", "key=sk-test")]
    #[case("${PARLEY_MISSING}", "${PARLEY_MISSING}")]
    #[case("${PARLEY_MISSING:-fallback}", "fallback")]
    #[case("${PARLEY_KEY:-fallback}", "sk-test")]
    #[case("${PARLEY_EMPTY:-fallback}", "fallback")]
    #[case("${PARLEY_EMPTY}", "")]
    #[case("a ${PARLEY_KEY} b ${PARLEY_KEY}", "a sk-test b sk-test")]
    #[case("${}", "${}")]
    #[case("tail ${PARLEY_KEY", "tail ${PARLEY_KEY")]
    #[case("plain text", "plain text")]
    fn substitution(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(substitute_env_with(input, lookup), expected);
    }
}
