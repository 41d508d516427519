//! Chat messages.

use serde::{Deserialize, Serialize};

use crate::{DocumentKey, MessageId, UserId, ValidationError};

/// Longest chat body the relay accepts.
pub const MAX_CHAT_MESSAGE_LEN: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    Text,
    Code,
}

/// Code snippet attached to a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub code: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentKey>,
}

/// Append-only chat entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub author_id: UserId,
    pub author_name: String,
    pub body: String,
    pub timestamp: u64,
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl ChatMessage {
    /// Trim and bounds-check a body typed by the local user.
    pub fn validate_body(body: &str) -> Result<&str, ValidationError> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let len = trimmed.chars().count();
        if len > MAX_CHAT_MESSAGE_LEN {
            return Err(ValidationError::MessageTooLong {
                len,
                max: MAX_CHAT_MESSAGE_LEN,
            });
        }
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_body_trims() {
        assert_eq!(ChatMessage::validate_body("  hi there \n"), Ok("hi there"));
    }

    #[test]
    fn test_validate_body_rejects_empty_and_long() {
        assert_eq!(ChatMessage::validate_body("   "), Err(ValidationError::EmptyMessage));
        let long = "x".repeat(MAX_CHAT_MESSAGE_LEN + 1);
        assert!(matches!(
            ChatMessage::validate_body(&long),
            Err(ValidationError::MessageTooLong { len: 501, max: 500 })
        ));
        let edge = "y".repeat(MAX_CHAT_MESSAGE_LEN);
        assert!(ChatMessage::validate_body(&edge).is_ok());
    }

    #[test]
    fn test_attachment_omitted_when_absent() {
        let msg = ChatMessage {
            id: MessageId::new(),
            author_id: UserId::new("u1"),
            author_name: "Ada".into(),
            body: "hello".into(),
            timestamp: 1,
            kind: ChatKind::Text,
            attachment: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("attachment").is_none());
        assert_eq!(json["kind"], "text");
    }
}
