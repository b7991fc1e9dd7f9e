//! Typed ID wrappers for command tokens and command identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers keep tokens and command ids from being mixed up.
/// These are just strings underneath. Ids minted locally are UUIDs, but
/// ids received over the wire are accepted in any format.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mint a fresh, globally unique ID.
            pub fn mint() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(
    Token,
    "Correlation token shared by a root command and every command it spawns."
);
typed_id!(CommandId, "Identity of a single command envelope.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_distinct() {
        assert_ne!(Token::mint(), Token::mint());
        assert_ne!(CommandId::mint(), CommandId::mint());
    }

    #[test]
    fn token_serializes_as_plain_string() {
        let token = Token::from("abc");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"abc\"");
    }
}
