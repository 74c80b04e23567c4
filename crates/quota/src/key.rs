use serde::{Deserialize, Serialize};

/// Quota category and identity derived from a session identity.
///
/// `friend-42` → (`friend`, `42`); everything else is a group chat, with the
/// identity taken after the first `-` (or the whole string if there is none).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub category: String,
    pub id: String,
}

impl SessionKey {
    pub const FRIEND: &'static str = "friend";
    pub const GROUP: &'static str = "group";

    #[must_use]
    pub fn parse(session_id: &str) -> Self {
        let category = if session_id.starts_with("friend-") {
            Self::FRIEND
        } else {
            Self::GROUP
        };
        let id = session_id
            .split_once('-')
            .map_or(session_id, |(_, rest)| rest);
        Self {
            category: category.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.category, self.id)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("friend-1", "friend", "1")]
    #[case("group-12345", "group", "12345")]
    #[case("friend-a-b", "friend", "a-b")]
    #[case("http-abc", "group", "abc")]
    #[case("console", "group", "console")]
    fn parse(#[case] session: &str, #[case] category: &str, #[case] id: &str) {
        let key = SessionKey::parse(session);
        assert_eq!(key.category, category);
        assert_eq!(key.id, id);
    }
}
