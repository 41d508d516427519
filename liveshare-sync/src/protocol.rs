//! JSON wire protocol.
//!
//! Every frame is a JSON object with a mandatory `type` discriminator:
//! ```text
//! { "type": "documentOperation", "sessionId": "ABC123", "userId": "…",
//!   "uri": "file:///a.py", "operation": { "kind": "insert", … } }
//! ```
//! `sessionId` and `userId` are common to most frames and live on [`Frame`];
//! the per-type body is the tagged [`Message`] enum. Frames are validated at
//! the parse boundary: a known type with a bad shape is a
//! [`ProtocolError`], an unknown type decodes to [`Message::Unknown`] and is
//! ignored by the router.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use liveshare_core::{
    Attachment, Capabilities, ChatKind, DocumentKey, DocumentOperation, MessageId, OperationId,
    OperationKind, Position, SessionId, TextRange, UserId,
};

use crate::error::ProtocolError;

/// A framed message plus the routing fields common to every type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Sender on client→relay frames, subject or origin on relay→client frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(flatten)]
    pub message: Message,
}

/// Operation body as carried inside a `documentOperation` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPayload {
    pub kind: OperationKind,
    pub range: TextRange,
    #[serde(default)]
    pub text: String,
    pub timestamp: u64,
    pub operation_id: OperationId,
}

impl OperationPayload {
    pub fn from_operation(op: &DocumentOperation) -> Self {
        Self {
            kind: op.kind,
            range: op.range,
            text: op.text.clone(),
            timestamp: op.timestamp,
            operation_id: op.id,
        }
    }

    pub fn into_operation(self, document_key: DocumentKey, origin: UserId) -> DocumentOperation {
        DocumentOperation {
            kind: self.kind,
            document_key,
            range: self.range,
            text: self.text,
            timestamp: self.timestamp,
            origin,
            id: self.operation_id,
        }
    }
}

/// Member entry inside `sessionJoined`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_file: Option<DocumentKey>,
}

/// Shared document entry inside `sessionJoined`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub uri: DocumentKey,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    // ── client → relay ───────────────────────────────────────────
    CreateSession {
        username: String,
        capabilities: Capabilities,
    },
    JoinSession {
        username: String,
        capabilities: Capabilities,
    },
    RejoinSession {
        username: String,
    },
    EndSession,
    ShareFile {
        uri: DocumentKey,
        filename: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    UnshareFile {
        uri: DocumentKey,
        filename: String,
    },
    RequestFileContent {
        uri: DocumentKey,
    },
    ExecuteCode {
        code: String,
        language: String,
        filename: String,
    },
    ShareServer {
        port: u16,
        name: String,
        url: String,
    },
    ShareTerminal {
        terminal_id: String,
        name: String,
    },

    // ── either direction (relayed to peers) ─────────────────────
    DocumentOperation {
        uri: DocumentKey,
        operation: OperationPayload,
    },
    CursorUpdate {
        uri: DocumentKey,
        #[serde(default)]
        cursor: Option<Position>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selection: Option<TextRange>,
    },
    ActiveFileChange {
        #[serde(default)]
        uri: Option<DocumentKey>,
        #[serde(default, alias = "activeFile")]
        filename: Option<String>,
    },
    ChatMessage {
        message: String,
        #[serde(default)]
        message_type: ChatKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(
            default,
            deserialize_with = "lenient_millis",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Attachment>,
    },

    // ── relay → client ───────────────────────────────────────────
    ConnectionEstablished,
    SessionCreated,
    SessionJoined {
        #[serde(default)]
        host_id: Option<UserId>,
        #[serde(default)]
        users: Vec<MemberInfo>,
        #[serde(default)]
        shared_files: Vec<DocumentKey>,
        #[serde(default)]
        documents: Vec<DocumentInfo>,
        /// Raw `chatMessage` frames; decoded leniently by the chat log.
        #[serde(default)]
        chat_history: Vec<Value>,
    },
    UserJoined {
        #[serde(default)]
        username: Option<String>,
    },
    UserLeft {
        #[serde(default)]
        username: Option<String>,
    },
    FileShared {
        uri: DocumentKey,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        content: String,
        #[serde(default)]
        language: Option<String>,
    },
    FileUnshared {
        uri: DocumentKey,
    },
    FileContent {
        uri: DocumentKey,
        #[serde(default)]
        filename: Option<String>,
        content: String,
    },
    CodeExecution {
        #[serde(default)]
        output: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },
    TerminalOutput {
        terminal_id: String,
        output: String,
    },
    ServerShared {
        port: u16,
        name: String,
        #[serde(default)]
        url: Option<String>,
    },
    TerminalShared {
        terminal_id: String,
        name: String,
    },
    #[serde(alias = "error")]
    SessionError {
        message: String,
        #[serde(default)]
        fatal: bool,
    },
    SessionEnded {
        #[serde(default)]
        reason: Option<String>,
    },
    HostTransferred {
        new_host_id: UserId,
    },
    Ping,
    Pong,

    /// Any `type` this client does not understand.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// The wire `type` string, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::CreateSession { .. } => "createSession",
            Message::JoinSession { .. } => "joinSession",
            Message::RejoinSession { .. } => "rejoinSession",
            Message::EndSession => "endSession",
            Message::ShareFile { .. } => "shareFile",
            Message::UnshareFile { .. } => "unshareFile",
            Message::RequestFileContent { .. } => "requestFileContent",
            Message::ExecuteCode { .. } => "executeCode",
            Message::ShareServer { .. } => "shareServer",
            Message::ShareTerminal { .. } => "shareTerminal",
            Message::DocumentOperation { .. } => "documentOperation",
            Message::CursorUpdate { .. } => "cursorUpdate",
            Message::ActiveFileChange { .. } => "activeFileChange",
            Message::ChatMessage { .. } => "chatMessage",
            Message::ConnectionEstablished => "connectionEstablished",
            Message::SessionCreated => "sessionCreated",
            Message::SessionJoined { .. } => "sessionJoined",
            Message::UserJoined { .. } => "userJoined",
            Message::UserLeft { .. } => "userLeft",
            Message::FileShared { .. } => "fileShared",
            Message::FileUnshared { .. } => "fileUnshared",
            Message::FileContent { .. } => "fileContent",
            Message::CodeExecution { .. } => "codeExecution",
            Message::TerminalOutput { .. } => "terminalOutput",
            Message::ServerShared { .. } => "serverShared",
            Message::TerminalShared { .. } => "terminalShared",
            Message::SessionError { .. } => "sessionError",
            Message::SessionEnded { .. } => "sessionEnded",
            Message::HostTransferred { .. } => "hostTransferred",
            Message::Ping => "ping",
            Message::Pong => "pong",
            Message::Unknown => "unknown",
        }
    }
}

impl Frame {
    pub fn new(message: Message) -> Self {
        Self {
            session_id: None,
            user_id: None,
            message,
        }
    }

    pub fn in_session(mut self, session_id: &SessionId) -> Self {
        self.session_id = Some(session_id.clone());
        self
    }

    pub fn from_user(mut self, user_id: &UserId) -> Self {
        self.user_id = Some(user_id.clone());
        self
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        if !value.get("type").is_some_and(Value::is_string) {
            return Err(ProtocolError::MissingType);
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Relays stamp some frames with ISO-8601 strings; only numeric millis are kept.
fn lenient_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_u64())
}
