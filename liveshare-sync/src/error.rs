//! Error taxonomy.
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`ValidationError`] | call sites | rejected before any network call |
//! | [`ConnectionError`] | transport | retried, surfaced once retries run out |
//! | [`ProtocolError`] | frame decoding | logged and dropped |
//! | [`ApplyError`] | document sync | logged, recorded in the event log, queue continues |
//! | [`SessionError`] | relay / session manager | surfaced; fatal variants tear down |

use std::time::Duration;

use liveshare_core::{DocumentKey, OperationId, UserId};
pub use liveshare_core::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection to {url} was refused. Is the relay server running? Retry once it is up.")]
    Refused { url: String },

    #[error("Timed out after {}s connecting to {url}. Check the server address and retry.", .after.as_secs())]
    Timeout { url: String, after: Duration },

    #[error("Could not connect to {url}: {reason}")]
    Failed { url: String, reason: String },

    #[error("Connection attempt was cancelled")]
    Cancelled,

    #[error("Connection closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Frame is missing its 'type' field")]
    MissingType,

    #[error("Could not encode frame: {0}")]
    Encode(String),
}

/// An operation that could not be applied locally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Could not apply operation {operation} to {document}: {reason}")]
pub struct ApplyError {
    pub document: DocumentKey,
    pub operation: OperationId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("The relay rejected the request: {0}")]
    Rejected(String),

    #[error("A session ({0}) is already active. End it before starting or joining another.")]
    AlreadyActive(String),

    #[error("No active session")]
    NotActive,

    #[error("Session ended: {0}")]
    Ended(String),

    #[error("{0} is not a member of this session")]
    UnknownMember(UserId),

    #[error("You cannot follow yourself")]
    CannotFollowSelf,
}

/// Failure reported by the editor host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("Unknown document {0}")]
    UnknownDocument(DocumentKey),

    #[error("Range out of bounds in {0}")]
    RangeOutOfBounds(DocumentKey),

    #[error("{0}")]
    Other(String),
}

/// Umbrella error returned by the client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("Could not write the session log: {0}")]
    Export(String),

    #[error("The sync client has shut down")]
    ClientGone,
}
