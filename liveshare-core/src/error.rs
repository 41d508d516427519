/// Input rejected locally, before anything touches the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Session code '{code}' is too short: expected at least {min} characters")]
    SessionIdTooShort { code: String, min: usize },

    #[error("Session code '{code}' may only contain uppercase letters and digits (found '{found}')")]
    SessionIdCharset { code: String, found: char },

    #[error("Document key must not be empty")]
    EmptyDocumentKey,

    #[error("Chat message is empty")]
    EmptyMessage,

    #[error("Chat message is {len} characters long; the limit is {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("Document is {len} bytes; shared documents are limited to {max} bytes")]
    DocumentTooLarge { len: usize, max: usize },

    #[error("Invalid value '{value}' for setting '{key}'")]
    InvalidSetting { key: String, value: String },
}
