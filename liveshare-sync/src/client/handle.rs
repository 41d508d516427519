//! Cloneable front end to a running [`super::Client`].

use std::io::Write;
use tokio::sync::{broadcast, mpsc, oneshot};

use liveshare_core::{Attachment, ChatKind, ChatMessage, DocumentKey, SessionId, UserId};

use crate::chat::{self, ExportHeader, LogEntry};
use crate::error::SyncError;
use crate::host::ChangeSink;
use crate::presence::PresenceSnapshot;
use crate::session::{SessionReply, SessionSummary};
use crate::transport::ConnectionState;

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

#[derive(Debug)]
pub(crate) enum Command {
    Start {
        reply: SessionReply,
    },
    Join {
        session_id: SessionId,
        reply: SessionReply,
    },
    End {
        reply: Reply<()>,
    },
    Share {
        key: DocumentKey,
        filename: String,
        content: String,
        language: Option<String>,
        reply: Reply<()>,
    },
    Unshare {
        key: DocumentKey,
        reply: Reply<()>,
    },
    Follow {
        target: UserId,
        reply: Reply<()>,
    },
    StopFollowing {
        reply: Reply<Option<UserId>>,
    },
    Chat {
        body: String,
        kind: ChatKind,
        attachment: Option<Attachment>,
        reply: Reply<ChatMessage>,
    },
    ShareServer {
        port: u16,
        name: String,
        reply: Reply<()>,
    },
    ShareTerminal {
        terminal_id: String,
        name: String,
        reply: Reply<()>,
    },
    ExecuteCode {
        code: String,
        language: String,
        filename: String,
        reply: Reply<()>,
    },
    Summary {
        reply: Reply<Option<SessionSummary>>,
    },
    Presence {
        reply: Reply<PresenceSnapshot>,
    },
    Log {
        reply: Reply<(Option<ExportHeader>, Vec<LogEntry>)>,
    },
    State {
        reply: Reply<ConnectionState>,
    },
    Shutdown,
}

/// Talks to the client task. Every call is answered by the task, in order.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    sink: ChangeSink,
    log: broadcast::Sender<LogEntry>,
}

impl ClientHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        sink: ChangeSink,
        log: broadcast::Sender<LogEntry>,
    ) -> Self {
        Self { commands, sink, log }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| SyncError::ClientGone)?;
        rx.await.map_err(|_| SyncError::ClientGone)?
    }

    /// Host a new session. Resolves once the relay connection is open.
    pub async fn start_session(&self) -> Result<SessionSummary, SyncError> {
        self.request(|reply| Command::Start { reply }).await
    }

    /// Join a session by code. The code is validated before anything is
    /// sent; resolves once the relay acknowledges the join.
    pub async fn join_session(&self, code: &str) -> Result<SessionSummary, SyncError> {
        let session_id = SessionId::parse(code.trim())?;
        self.request(|reply| Command::Join { session_id, reply }).await
    }

    pub async fn end_session(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::End { reply }).await
    }

    pub async fn share_document(
        &self,
        key: &DocumentKey,
        filename: &str,
        content: &str,
        language: Option<&str>,
    ) -> Result<(), SyncError> {
        let key = key.clone();
        let filename = filename.to_string();
        let content = content.to_string();
        let language = language.map(str::to_string);
        self.request(|reply| Command::Share {
            key,
            filename,
            content,
            language,
            reply,
        })
        .await
    }

    pub async fn unshare_document(&self, key: &DocumentKey) -> Result<(), SyncError> {
        let key = key.clone();
        self.request(|reply| Command::Unshare { key, reply }).await
    }

    pub async fn follow(&self, target: &UserId) -> Result<(), SyncError> {
        let target = target.clone();
        self.request(|reply| Command::Follow { target, reply }).await
    }

    /// Returns who was being followed, if anyone.
    pub async fn stop_following(&self) -> Result<Option<UserId>, SyncError> {
        self.request(|reply| Command::StopFollowing { reply }).await
    }

    pub async fn send_chat(&self, body: &str) -> Result<ChatMessage, SyncError> {
        let body = body.to_string();
        self.request(|reply| Command::Chat {
            body,
            kind: ChatKind::Text,
            attachment: None,
            reply,
        })
        .await
    }

    /// Post a code snippet to the chat.
    pub async fn send_code(
        &self,
        code: &str,
        language: &str,
        document: Option<&DocumentKey>,
    ) -> Result<ChatMessage, SyncError> {
        let attachment = Attachment {
            code: code.to_string(),
            language: language.to_string(),
            document: document.cloned(),
        };
        let body = format!("```{language}\n{code}\n```");
        self.request(|reply| Command::Chat {
            body,
            kind: ChatKind::Code,
            attachment: Some(attachment),
            reply,
        })
        .await
    }

    /// Advertise a local server (e.g. a dev server on `port`).
    pub async fn share_server(&self, port: u16, name: &str) -> Result<(), SyncError> {
        let name = name.to_string();
        self.request(|reply| Command::ShareServer { port, name, reply }).await
    }

    pub async fn share_terminal(&self, terminal_id: &str, name: &str) -> Result<(), SyncError> {
        let terminal_id = terminal_id.to_string();
        let name = name.to_string();
        self.request(|reply| Command::ShareTerminal {
            terminal_id,
            name,
            reply,
        })
        .await
    }

    /// Ask the relay to run code; output arrives as a log entry.
    pub async fn execute_code(&self, code: &str, language: &str, filename: &str) -> Result<(), SyncError> {
        let code = code.to_string();
        let language = language.to_string();
        let filename = filename.to_string();
        self.request(|reply| Command::ExecuteCode {
            code,
            language,
            filename,
            reply,
        })
        .await
    }

    pub async fn summary(&self) -> Result<Option<SessionSummary>, SyncError> {
        self.request(|reply| Command::Summary { reply }).await
    }

    pub async fn presence(&self) -> Result<PresenceSnapshot, SyncError> {
        self.request(|reply| Command::Presence { reply }).await
    }

    pub async fn chat_log(&self) -> Result<Vec<LogEntry>, SyncError> {
        let (_, entries) = self.request(|reply| Command::Log { reply }).await?;
        Ok(entries)
    }

    /// Write the session log as JSON.
    pub async fn export_log<W: Write>(&self, writer: W) -> Result<(), SyncError> {
        let (header, entries) = self.request(|reply| Command::Log { reply }).await?;
        let header = header.ok_or(crate::error::SessionError::NotActive)?;
        chat::write_export(&header, &entries, writer).map_err(|e| SyncError::Export(e.to_string()))
    }

    pub async fn connection_state(&self) -> Result<ConnectionState, SyncError> {
        self.request(|reply| Command::State { reply }).await
    }

    /// New log entries as they happen.
    pub fn subscribe_log(&self) -> broadcast::Receiver<LogEntry> {
        self.log.subscribe()
    }

    /// Where the editor reports user activity.
    pub fn change_sink(&self) -> ChangeSink {
        self.sink.clone()
    }

    /// Stop the client task. Any session is torn down.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}
