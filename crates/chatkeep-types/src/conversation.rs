//! Conversation and message types for chatkeep.
//!
//! A conversation owns an ordered list of messages exchanged between the user
//! and the model. Message content is plaintext in these types; the store
//! encrypts it on the way to disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Maximum length of a conversation title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Title used when a conversation is created without one.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Author of a message.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (role IN ('user', 'model'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "model" => Ok(Role::Model),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A stored conversation.
///
/// `message_count` and `total_tokens` are denormalized for fast listing.
/// They are recomputed from the messages table by `refresh_stats`, never
/// incremented in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u32,
    pub total_tokens: u64,
}

/// A single message within a conversation.
///
/// Messages are ordered by `created_at` within a conversation and are never
/// rewritten once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub token_count: u32,
}

/// Normalize a user-supplied title.
///
/// Surrounding whitespace is trimmed, a blank title becomes [`DEFAULT_TITLE`]
/// and anything longer than [`MAX_TITLE_CHARS`] is cut at a character boundary.
pub fn normalize_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    trimmed.chars().take(MAX_TITLE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::User, Role::Model] {
            let s = role.to_string();
            let parsed: Role = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_role_rejects_unknown() {
        let err = "assistant".parse::<Role>().unwrap_err();
        assert!(err.contains("assistant"));
    }

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("MODEL".parse::<Role>().unwrap(), Role::Model);
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&Role::Model).unwrap();
        assert_eq!(json, "\"model\"");
        let parsed: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(parsed, Role::User);
    }

    #[test]
    fn test_normalize_title_blank_uses_default() {
        assert_eq!(normalize_title(""), DEFAULT_TITLE);
        assert_eq!(normalize_title("   \t"), DEFAULT_TITLE);
    }

    #[test]
    fn test_normalize_title_trims() {
        assert_eq!(normalize_title("  Trip Planning \n"), "Trip Planning");
    }

    #[test]
    fn test_normalize_title_truncates_on_char_boundary() {
        let long = "ä".repeat(MAX_TITLE_CHARS + 25);
        let title = normalize_title(&long);
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
        assert!(title.chars().all(|c| c == 'ä'));
    }

    #[test]
    fn test_conversation_serialize() {
        let conversation = Conversation {
            id: Uuid::now_v7(),
            title: "Trip Planning".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            message_count: 2,
            total_tokens: 14,
        };
        let json = serde_json::to_string(&conversation).unwrap();
        assert!(json.contains("\"message_count\":2"));
        assert!(json.contains("\"total_tokens\":14"));
    }
}
