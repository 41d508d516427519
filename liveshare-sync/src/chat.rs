//! Session chat and event log.
//!
//! The log is ordered by local receipt. Chat messages are deduplicated by
//! id, so the relay's echo of a message this client already appended is
//! ignored. Listeners get every new entry through a broadcast channel.

use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use tokio::sync::broadcast;

use liveshare_core::{
    now_millis, Attachment, ChatKind, ChatMessage, MessageId, SessionId, UserId, ValidationError,
};

use crate::protocol::{Frame, Message};

const LISTENER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SystemKind {
    MemberJoined,
    MemberLeft,
    DocumentShared,
    DocumentUnshared,
    ApplyFailed,
    CodeExecution,
    TerminalOutput,
    ServerShared,
    TerminalShared,
    Session,
}

/// Something that happened in the session, other than a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    pub timestamp: u64,
    pub kind: SystemKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entry", rename_all = "camelCase")]
pub enum LogEntry {
    Chat(ChatMessage),
    System(SystemEvent),
}

/// Header written before the entries by [`ChatLog::export`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportHeader {
    pub session_id: SessionId,
    pub exported_at: u64,
    pub members: Vec<String>,
}

#[derive(Serialize)]
struct Export<'a> {
    #[serde(flatten)]
    header: &'a ExportHeader,
    entries: &'a [LogEntry],
}

#[derive(Debug)]
pub struct ChatLog {
    entries: Vec<LogEntry>,
    seen: HashSet<MessageId>,
    listeners: broadcast::Sender<LogEntry>,
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatLog {
    pub fn new() -> Self {
        let (listeners, _) = broadcast::channel(LISTENER_CAPACITY);
        Self {
            entries: Vec::new(),
            seen: HashSet::new(),
            listeners,
        }
    }

    /// A message typed by the local user. Validated here, before anything
    /// is sent.
    pub fn post(
        &mut self,
        author_id: &UserId,
        author_name: &str,
        body: &str,
        kind: ChatKind,
        attachment: Option<Attachment>,
    ) -> Result<ChatMessage, ValidationError> {
        let body = ChatMessage::validate_body(body)?;
        let message = ChatMessage {
            id: MessageId::new(),
            author_id: author_id.clone(),
            author_name: author_name.to_string(),
            body: body.to_string(),
            timestamp: now_millis(),
            kind,
            attachment,
        };
        self.receive(message.clone());
        Ok(message)
    }

    /// Append a message unless its id is already in the log.
    pub fn receive(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id) {
            log::trace!("Ignoring duplicate chat message {}", message.id);
            return false;
        }
        self.push(LogEntry::Chat(message));
        true
    }

    pub fn record(&mut self, kind: SystemKind, text: impl Into<String>) {
        self.push(LogEntry::System(SystemEvent {
            timestamp: now_millis(),
            kind,
            text: text.into(),
        }));
    }

    /// Replay `chatHistory` from a join acknowledgement. Entries that do not
    /// decode as chat messages are skipped.
    pub fn import_history(
        &mut self,
        history: Vec<serde_json::Value>,
        name_of: impl Fn(&UserId) -> Option<String>,
    ) -> usize {
        let mut imported = 0;
        for raw in history {
            let frame = match Frame::from_value(raw) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Skipping chat history entry: {e}");
                    continue;
                }
            };
            if let Some(message) = message_from_frame(frame, &name_of) {
                if self.receive(message) {
                    imported += 1;
                }
            }
        }
        imported
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().filter_map(|e| match e {
            LogEntry::Chat(m) => Some(m),
            LogEntry::System(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.listeners.subscribe()
    }

    pub fn listener(&self) -> broadcast::Sender<LogEntry> {
        self.listeners.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
    }

    /// Write the log as one JSON document.
    pub fn export<W: Write>(&self, header: &ExportHeader, writer: W) -> serde_json::Result<()> {
        write_export(header, &self.entries, writer)
    }

    fn push(&mut self, entry: LogEntry) {
        // No listeners is fine.
        let _ = self.listeners.send(entry.clone());
        self.entries.push(entry);
    }
}

pub fn write_export<W: Write>(
    header: &ExportHeader,
    entries: &[LogEntry],
    writer: W,
) -> serde_json::Result<()> {
    serde_json::to_writer_pretty(writer, &Export { header, entries })
}

/// Build a [`ChatMessage`] from a relayed `chatMessage` frame.
pub fn message_from_frame(
    frame: Frame,
    name_of: impl Fn(&UserId) -> Option<String>,
) -> Option<ChatMessage> {
    let Message::ChatMessage {
        message,
        message_type,
        message_id,
        username,
        timestamp,
        metadata,
    } = frame.message
    else {
        return None;
    };
    let Some(author_id) = frame.user_id else {
        log::warn!("Dropping chat message without a sender");
        return None;
    };
    let author_name = username
        .or_else(|| name_of(&author_id))
        .unwrap_or_else(|| "Unknown".to_string());
    Some(ChatMessage {
        id: message_id.unwrap_or_default(),
        author_id,
        author_name,
        body: message,
        timestamp: timestamp.unwrap_or_else(now_millis),
        kind: message_type,
        attachment: metadata,
    })
}
