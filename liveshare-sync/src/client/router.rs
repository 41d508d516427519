//! Inbound frame dispatch: one handler per message type.
//!
//! Frames the client has no use for (client→relay types echoed back,
//! unknown types) are logged at debug level and dropped.

use liveshare_core::{DocumentKey, SessionId, UserId};

use super::Client;
use crate::chat::{message_from_frame, SystemKind};
use crate::error::{SessionError, SyncError};
use crate::host::{EditorHost, Notice};
use crate::protocol::{DocumentInfo, Frame, MemberInfo, Message};
use crate::session::{SessionManager, SharedServer};

impl<H: EditorHost + 'static> Client<H> {
    pub(super) async fn dispatch(&mut self, frame: Frame) {
        log::trace!("<- {}", frame.message.type_name());
        let Frame {
            session_id,
            user_id,
            message,
        } = frame;

        match message {
            Message::ConnectionEstablished => {
                // Mid-session reconnects keep the identity the session knows.
                if self.sessions.active().is_none() {
                    if let Some(id) = user_id {
                        self.sessions.adopt_user_id(id);
                    }
                }
            }
            Message::SessionCreated => {
                if let Some(id) = user_id {
                    self.sessions.adopt_user_id(id);
                }
            }
            Message::SessionJoined {
                host_id,
                users,
                shared_files,
                documents,
                chat_history,
            } => {
                self.on_session_joined(
                    session_id,
                    user_id,
                    host_id,
                    users,
                    shared_files,
                    documents,
                    chat_history,
                );
            }
            Message::UserJoined { username } => {
                let Some(id) = user_id else { return };
                self.on_user_joined(id, username);
            }
            Message::UserLeft { username } => {
                let Some(id) = user_id else { return };
                self.on_user_left(id, username);
            }
            Message::DocumentOperation { uri, operation } => {
                let Some(origin) = user_id else {
                    log::warn!("Dropping operation on {uri} without an origin");
                    return;
                };
                if &origin == self.sessions.user_id() {
                    return;
                }
                self.documents.enqueue(operation.into_operation(uri, origin));
            }
            Message::CursorUpdate {
                uri,
                cursor,
                selection,
            } => {
                let Some(id) = self.remote_sender(user_id) else { return };
                if let Some(session) = self.sessions.active_mut() {
                    session.members.update_cursor(&id, &uri, cursor, selection);
                }
                self.render_presence();
            }
            Message::ActiveFileChange { uri, filename } => {
                let Some(id) = self.remote_sender(user_id) else { return };
                let key = uri.or_else(|| filename.as_deref().map(DocumentKey::from));
                self.on_active_file_change(id, key).await;
            }
            Message::ChatMessage { .. } => {
                let frame = Frame {
                    session_id,
                    user_id,
                    message,
                };
                let sessions = &self.sessions;
                let name_of = |id: &UserId| {
                    sessions
                        .active()
                        .and_then(|s| s.members.display_name(id))
                        .map(str::to_string)
                };
                if let Some(chat) = message_from_frame(frame, name_of) {
                    self.chat.receive(chat);
                }
            }
            Message::FileShared {
                uri,
                filename,
                content,
                language,
            } => {
                self.on_file_shared(user_id, uri, filename, content, language)
                    .await;
            }
            Message::FileUnshared { uri } => {
                if self.documents.remove(self.host.as_ref(), &uri).await.is_some() {
                    self.chat.record(
                        SystemKind::DocumentUnshared,
                        format!("{} is no longer shared", uri.file_name()),
                    );
                }
            }
            Message::FileContent {
                uri,
                filename,
                content,
            } => {
                if let Err(e) = self
                    .documents
                    .materialize(self.host.as_ref(), &uri, filename.as_deref(), &content, None)
                    .await
                {
                    log::warn!("Could not load {uri}: {e}");
                    self.notify(Notice::warning(format!(
                        "Could not open shared file {}: {e}",
                        uri.file_name()
                    )));
                }
            }
            Message::CodeExecution {
                output,
                error,
                language,
            } => {
                let language = language.unwrap_or_else(|| "code".to_string());
                match error.filter(|e| !e.is_empty()) {
                    Some(error) => {
                        self.chat.record(
                            SystemKind::CodeExecution,
                            format!("{language} execution failed: {error}"),
                        );
                        self.notify(Notice::error(format!("Code execution failed: {error}")));
                    }
                    None => self.chat.record(
                        SystemKind::CodeExecution,
                        format!("{language} output:\n{}", output.unwrap_or_default()),
                    ),
                }
            }
            Message::TerminalOutput {
                terminal_id,
                output,
            } => {
                self.chat
                    .record(SystemKind::TerminalOutput, format!("[{terminal_id}] {output}"));
            }
            Message::ServerShared { port, name, url } => {
                if let Some(session) = self.sessions.active_mut() {
                    session.shared_servers.insert(
                        port,
                        SharedServer {
                            port,
                            name: name.clone(),
                            url,
                        },
                    );
                }
                self.chat
                    .record(SystemKind::ServerShared, format!("Server {name} shared on port {port}"));
            }
            Message::TerminalShared { terminal_id, name } => {
                if let Some(session) = self.sessions.active_mut() {
                    session.active_terminals.insert(terminal_id, name.clone());
                }
                self.chat
                    .record(SystemKind::TerminalShared, format!("Terminal {name} shared"));
            }
            Message::SessionError { message, fatal } => {
                self.on_session_error(message, fatal).await;
            }
            Message::SessionEnded { reason } => {
                let reason = reason.unwrap_or_else(|| "The session was closed".to_string());
                log::info!("Session ended by relay: {reason}");
                self.teardown(Some(Notice::info(format!("Session ended: {reason}"))))
                    .await;
            }
            Message::HostTransferred { new_host_id } => {
                let name = self.member_name(&new_host_id);
                let Some(session) = self.sessions.active_mut() else { return };
                session.transfer_host(new_host_id);
                let text = if session.is_host {
                    "You are now the host".to_string()
                } else {
                    format!("{name} is now the host")
                };
                self.chat.record(SystemKind::Session, text.clone());
                self.notify(Notice::info(text));
            }
            Message::Ping => self.send(Message::Pong),
            Message::Pong => {}
            other @ (Message::CreateSession { .. }
            | Message::JoinSession { .. }
            | Message::RejoinSession { .. }
            | Message::EndSession
            | Message::ShareFile { .. }
            | Message::UnshareFile { .. }
            | Message::RequestFileContent { .. }
            | Message::ExecuteCode { .. }
            | Message::ShareServer { .. }
            | Message::ShareTerminal { .. }
            | Message::Unknown) => {
                log::debug!("Ignoring inbound '{}' frame", other.type_name());
            }
        }
    }

    /// The sender of a presence frame, unless it is this client.
    fn remote_sender(&self, user_id: Option<UserId>) -> Option<UserId> {
        user_id.filter(|id| id != self.sessions.user_id())
    }

    #[allow(clippy::too_many_arguments)]
    fn on_session_joined(
        &mut self,
        session_id: Option<SessionId>,
        user_id: Option<UserId>,
        host_id: Option<UserId>,
        users: Vec<MemberInfo>,
        shared_files: Vec<DocumentKey>,
        documents: Vec<DocumentInfo>,
        chat_history: Vec<serde_json::Value>,
    ) {
        let Some(session_id) = session_id.or_else(|| self.sessions.session_id().cloned()) else {
            log::warn!("Join acknowledgement without a session id");
            return;
        };
        if let Some(id) = user_id {
            self.sessions.adopt_user_id(id);
        }
        let host_id = host_id.unwrap_or_else(|| self.sessions.user_id().clone());
        let members: Vec<_> = users
            .into_iter()
            .map(|m| (m.id, m.username, m.active_file))
            .collect();

        let mut handshake = None;
        match self.sessions.active().map(|s| s.id.clone()) {
            // Rejoin after a reconnect: refresh, keeping colours.
            Some(current) if current == session_id => {
                if let Some(session) = self.sessions.active_mut() {
                    session.members.replace_members(members);
                    session.transfer_host(host_id);
                }
            }
            Some(current) => {
                log::warn!("Join acknowledgement for {session_id} while in {current}");
                return;
            }
            None => match self.sessions.confirm_joined(&session_id, host_id, members) {
                Some(pending) => handshake = Some(pending),
                None => {
                    log::debug!("Unexpected join acknowledgement for {session_id}");
                    return;
                }
            },
        }

        for document in &documents {
            self.documents
                .register(&document.uri, document.filename.as_deref());
        }
        for key in &shared_files {
            self.documents.register(key, None);
        }
        for key in self.documents.request_missing() {
            self.send(Message::RequestFileContent { uri: key });
        }

        // Sent on every (re)join; ids already in the log are skipped.
        let sessions = &self.sessions;
        let imported = self.chat.import_history(chat_history, |id| {
            sessions
                .active()
                .and_then(|s| s.members.display_name(id))
                .map(str::to_string)
        });
        log::debug!("Replayed {imported} chat message(s)");

        if let Some(mut handshake) = handshake {
            self.chat
                .record(SystemKind::Session, format!("Joined session {session_id}"));
            let summary = self
                .summary()
                .ok_or(SyncError::Session(SessionError::NotActive));
            SessionManager::resolve(&mut handshake, summary);
        }
        self.render_presence();
    }

    fn on_user_joined(&mut self, id: UserId, username: Option<String>) {
        if &id == self.sessions.user_id() {
            return;
        }
        let name = username.unwrap_or_else(|| "Anonymous".to_string());
        let Some(session) = self.sessions.active_mut() else { return };
        if session.members.join(id, &name) {
            self.chat
                .record(SystemKind::MemberJoined, format!("{name} joined the session"));
        }
        self.render_presence();
    }

    fn on_user_left(&mut self, id: UserId, username: Option<String>) {
        let Some(session) = self.sessions.active_mut() else { return };
        let Some(user) = session.members.leave(&id) else { return };
        let name = username.unwrap_or(user.display_name);
        self.chat
            .record(SystemKind::MemberLeft, format!("{name} left the session"));
        if self.follow.on_member_left(&id) {
            self.notify(Notice::info(format!("Stopped following {name}: they left the session")));
        }
        self.render_presence();
    }

    async fn on_active_file_change(&mut self, id: UserId, key: Option<DocumentKey>) {
        if let Some(session) = self.sessions.active_mut() {
            session.members.set_active_document(&id, key.clone());
        }
        self.render_presence();
        if let Some(target) = key.and_then(|k| self.follow.on_remote_switch(&id, &k)) {
            self.navigate(&target).await;
        }
    }

    async fn on_file_shared(
        &mut self,
        sharer: Option<UserId>,
        uri: DocumentKey,
        filename: Option<String>,
        content: String,
        language: Option<String>,
    ) {
        // The relay echoes our own share back; the local copy is already current.
        if sharer.as_ref() == Some(self.sessions.user_id()) && self.documents.is_materialized(&uri) {
            return;
        }
        let result = self
            .documents
            .materialize(
                self.host.as_ref(),
                &uri,
                filename.as_deref(),
                &content,
                language.as_deref(),
            )
            .await;
        match result {
            Ok(()) => {
                let who = sharer
                    .map(|id| self.member_name(&id))
                    .unwrap_or_else(|| "Someone".to_string());
                let name = filename.as_deref().unwrap_or_else(|| uri.file_name());
                self.chat
                    .record(SystemKind::DocumentShared, format!("{who} shared {name}"));
            }
            Err(e) => {
                log::warn!("Could not open shared file {uri}: {e}");
                self.notify(Notice::warning(format!(
                    "Could not open shared file {}: {e}",
                    uri.file_name()
                )));
            }
        }
    }

    async fn on_session_error(&mut self, message: String, fatal: bool) {
        if self.sessions.pending().is_some() {
            self.sessions
                .fail_pending(SessionError::Rejected(message.clone()).into());
            self.teardown(Some(Notice::error(message))).await;
            return;
        }
        log::warn!("Relay reported an error: {message}");
        if fatal {
            self.teardown(Some(Notice::error(format!("Session closed: {message}"))))
                .await;
        } else {
            self.notify(Notice::warning(message));
        }
    }
}
