//! The seam between the sync client and an editor.
//!
//! The client drives the editor through [`EditorHost`]. The editor reports
//! user activity back through a [`ChangeSink`], which it obtains from the
//! client handle.
//!
//! Applying a remote edit makes most editors emit an ordinary change
//! notification. Those must not be broadcast again, so the client raises an
//! [`EchoGuard`] around every host call that mutates a document and the sink
//! drops edits reported while it is raised. Hosts must therefore report the
//! changes caused by [`EditorHost::apply_edit`] and
//! [`EditorHost::materialize`] before those calls return.

mod memory;

pub use memory::{offset_of, splice, MemoryDocument, MemoryHost};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use liveshare_core::{DocumentKey, Position, TextRange};

use crate::error::HostError;
use crate::presence::PresenceSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A message for the person at the keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, text: text.into() }
    }
}

#[async_trait]
pub trait EditorHost: Send + Sync {
    /// Create or overwrite the local surface for a shared document.
    async fn materialize(
        &self,
        key: &DocumentKey,
        filename: &str,
        content: &str,
        language: Option<&str>,
    ) -> Result<(), HostError>;

    /// Replace `range` with `text`.
    async fn apply_edit(
        &self,
        key: &DocumentKey,
        range: TextRange,
        text: &str,
    ) -> Result<(), HostError>;

    /// The document stopped being shared.
    async fn close_document(&self, key: &DocumentKey) -> Result<(), HostError>;

    /// Bring a document into view (follow mode).
    async fn open_document(&self, key: &DocumentKey) -> Result<(), HostError>;

    fn render_presence(&self, _snapshot: &PresenceSnapshot) {}

    fn clear_presence(&self) {}

    fn notify(&self, _notice: &Notice) {}
}

/// One contiguous edit in a change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    /// Range in the document before the edit.
    pub range: TextRange,
    /// Length of the replaced text, in characters.
    pub replaced_len: usize,
    pub text: String,
}

/// User activity reported by the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Edited {
        key: DocumentKey,
        changes: Vec<TextChange>,
    },
    SelectionChanged {
        key: DocumentKey,
        cursor: Position,
        selection: Option<TextRange>,
    },
    ActiveChanged {
        key: DocumentKey,
        filename: String,
        content: String,
        language: Option<String>,
        /// Set when the switch was caused by follow-mode navigation.
        via_follow: bool,
    },
}

/// Flags raised by the client while it drives the host.
#[derive(Debug, Clone, Default)]
pub struct EchoGuard {
    applying: Arc<AtomicBool>,
    navigating: Arc<AtomicBool>,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress edit reports until the returned scope drops.
    pub fn applying(&self) -> GuardScope {
        GuardScope::raise(&self.applying)
    }

    /// Mark active-document switches as navigation until the scope drops.
    pub fn navigating(&self) -> GuardScope {
        GuardScope::raise(&self.navigating)
    }

    pub fn is_applying(&self) -> bool {
        self.applying.load(Ordering::SeqCst)
    }

    pub fn is_navigating(&self) -> bool {
        self.navigating.load(Ordering::SeqCst)
    }
}

/// Lowers its flag on drop.
#[derive(Debug)]
pub struct GuardScope {
    flag: Arc<AtomicBool>,
}

impl GuardScope {
    fn raise(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag: flag.clone() }
    }
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Where an editor reports user activity.
#[derive(Debug, Clone)]
pub struct ChangeSink {
    events: mpsc::UnboundedSender<LocalEvent>,
    guard: EchoGuard,
}

impl ChangeSink {
    pub(crate) fn new(events: mpsc::UnboundedSender<LocalEvent>, guard: EchoGuard) -> Self {
        Self { events, guard }
    }

    /// Report an edit. Ignored while a remote edit is being applied.
    pub fn edited(&self, key: &DocumentKey, changes: Vec<TextChange>) {
        if self.guard.is_applying() {
            log::trace!("Suppressed echo of remote edit in {key}");
            return;
        }
        if changes.is_empty() {
            return;
        }
        self.push(LocalEvent::Edited { key: key.clone(), changes });
    }

    pub fn selection_changed(&self, key: &DocumentKey, cursor: Position, selection: Option<TextRange>) {
        self.push(LocalEvent::SelectionChanged {
            key: key.clone(),
            cursor,
            selection,
        });
    }

    pub fn active_changed(
        &self,
        key: &DocumentKey,
        filename: &str,
        content: &str,
        language: Option<&str>,
    ) {
        self.push(LocalEvent::ActiveChanged {
            key: key.clone(),
            filename: filename.to_string(),
            content: content.to_string(),
            language: language.map(str::to_string),
            via_follow: self.guard.is_navigating(),
        });
    }

    fn push(&self, event: LocalEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Sync client is gone; dropping editor event");
        }
    }
}
