use serde::{Deserialize, Serialize};
use std::fmt;

/// An authenticated identity.
///
/// Constructed only once the id and email (from the credential backend) and
/// the chosen username (from the profile directory) are all known. Replaced
/// wholesale on re-login, never mutated field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_display() {
        let user = User::new("u1", "alice", "alice@example.com");
        assert_eq!(format!("{}", user), "alice <alice@example.com>");
    }
}
