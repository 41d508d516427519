//! # liveshare-core: shared data model for live collaboration sessions
//!
//! Plain, serde-serializable types shared by every component of the sync
//! engine. Nothing in here performs I/O.
//!
//! ## Modules
//!
//! - [`ids`]: session codes, user ids, document keys, operation/message ids
//! - [`text`]: line/character positions and half-open ranges
//! - [`operation`]: the insert/delete/replace unit of document sync
//! - [`user`]: session members and the cursor color palette
//! - [`chat`]: chat messages and code attachments
//! - [`capabilities`]: the descriptor a client advertises on create/join

pub mod capabilities;
pub mod chat;
pub mod error;
pub mod ids;
pub mod operation;
pub mod text;
pub mod user;

pub use capabilities::Capabilities;
pub use chat::{Attachment, ChatKind, ChatMessage, MAX_CHAT_MESSAGE_LEN};
pub use error::ValidationError;
pub use ids::{DocumentKey, MessageId, OperationId, SessionId, UserId, SESSION_ID_MIN_LEN};
pub use operation::{DocumentOperation, OperationKind};
pub use text::{Position, TextRange};
pub use user::{CursorColor, User, PALETTE};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
