//! Chat user identity.

/// Log key used when a user has no handle.
pub const FALLBACK_LOG_KEY: &str = "unknown_user";

/// The sender of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Numeric user ID on the chat platform
    pub id: i64,
    /// First name, may be empty
    pub first_name: String,
    /// Optional last name
    pub last_name: Option<String>,
    /// Optional public handle
    pub username: Option<String>,
}

impl UserIdentity {
    /// Greeting name: first and last name joined, `there` when the first name is empty.
    #[must_use]
    pub fn full_name(&self) -> String {
        let first = if self.first_name.is_empty() {
            "there"
        } else {
            self.first_name.as_str()
        };
        let last = self.last_name.as_deref().unwrap_or_default();
        format!("{first} {last}").trim().to_string()
    }

    /// Directory name of this user's activity log.
    ///
    /// Characters outside `[A-Za-z0-9_-]` become `_` so the key is always a
    /// single path component.
    #[must_use]
    pub fn log_key(&self) -> String {
        let key: String = self
            .username
            .as_deref()
            .unwrap_or_default()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if key.is_empty() {
            FALLBACK_LOG_KEY.to_string()
        } else {
            key
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(first: &str, last: Option<&str>, username: Option<&str>) -> UserIdentity {
        UserIdentity {
            id: 42,
            first_name: first.to_string(),
            last_name: last.map(str::to_string),
            username: username.map(str::to_string),
        }
    }

    #[test]
    fn test_full_name() {
        assert_eq!(user("Ada", Some("Lovelace"), None).full_name(), "Ada Lovelace");
        assert_eq!(user("Ada", None, None).full_name(), "Ada");
        assert_eq!(user("", None, None).full_name(), "there");
        assert_eq!(user("", Some("Smith"), None).full_name(), "there Smith");
    }

    #[test]
    fn test_log_key_uses_handle_or_fallback() {
        assert_eq!(user("Ada", None, Some("ada_99")).log_key(), "ada_99");
        assert_eq!(user("Ada", None, None).log_key(), FALLBACK_LOG_KEY);
        assert_eq!(user("Ada", None, Some("")).log_key(), FALLBACK_LOG_KEY);
    }

    #[test]
    fn test_log_key_cannot_escape_log_dir() {
        assert_eq!(user("x", None, Some("../etc")).log_key(), "___etc");
        assert_eq!(user("x", None, Some("a/b")).log_key(), "a_b");
    }
}
