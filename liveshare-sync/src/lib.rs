//! # liveshare-sync: client-side live collaboration engine
//!
//! Connects an editor to a relay server over WebSocket and keeps shared
//! documents, presence and chat in step with the other participants.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  ChangeSink   ┌──────────────┐   JSON frames   ┌─────────┐
//! │ Editor host  │ ────────────► │    Client    │ ◄─────────────► │  Relay  │
//! │ (EditorHost) │ ◄──────────── │ (one task)   │    WebSocket    │ server  │
//! └──────────────┘  apply/render └──────┬───────┘                 └─────────┘
//!                                       │
//!          ┌──────────────┬─────────────┼──────────────┬─────────────┐
//!          ▼              ▼             ▼              ▼             ▼
//!   SessionManager  DocumentSync  PresenceRoom     FollowMode      ChatLog
//! ```
//!
//! ## Modules
//!
//! - [`transport`]: WebSocket connection with reconnect backoff
//! - [`protocol`]: JSON frame codec (`type`-tagged messages)
//! - [`client`]: the event loop, its command handle and the frame router
//! - [`session`]: session lifecycle and local identity
//! - [`document`]: ordered, deduplicated application of remote edits
//! - [`resolver`]: conflict policies for overlapping edits
//! - [`presence`]: membership, cursors and the outgoing cursor throttle
//! - [`follow`]: follow-mode state machine
//! - [`chat`]: chat and session event log
//! - [`host`]: the editor seam, plus an in-memory host
//! - [`config`]: client settings
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use liveshare_sync::{Client, MemoryHost, SyncConfig};
//!
//! # async fn demo() -> Result<(), liveshare_sync::SyncError> {
//! let host = Arc::new(MemoryHost::new());
//! let (handle, _task) = Client::spawn(SyncConfig::default(), host.clone());
//! host.attach(handle.change_sink());
//!
//! let summary = handle.start_session().await?;
//! println!("Session code: {}", summary.id);
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod follow;
pub mod host;
pub mod presence;
pub mod protocol;
pub mod resolver;
pub mod session;
pub mod transport;

pub use chat::{ChatLog, ExportHeader, LogEntry, SystemEvent, SystemKind};
pub use client::{Client, ClientHandle};
pub use config::SyncConfig;
pub use document::{DocumentSync, DrainReport, MAX_DOCUMENT_BYTES};
pub use error::{
    ApplyError, ConnectionError, HostError, ProtocolError, SessionError, SyncError,
    ValidationError,
};
pub use follow::{FollowMode, FollowState};
pub use host::{ChangeSink, EditorHost, LocalEvent, MemoryHost, Notice, NoticeLevel, TextChange};
pub use presence::{PresenceRoom, PresenceSnapshot};
pub use protocol::{Frame, Message};
pub use resolver::{ArrivalOrder, ConflictResolver, LastTimestampWins, Resolution};
pub use session::{LocalIdentity, SessionSummary, SharedServer};
pub use transport::{Backoff, ConnectionState};
