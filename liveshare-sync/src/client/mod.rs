//! The sync client.
//!
//! All state lives in one [`Client`] value driven by a single task. Network
//! frames, editor events, API commands and timers are all handled from the
//! same `select!` loop, so handlers never interleave and no locking is
//! needed.
//!
//! ```text
//!  ClientHandle ──commands──┐
//!  ChangeSink ──local events─┼──► Client::run ──► EditorHost
//!  Transport ──frames/state──┤        │
//!  timers (debounce, cursor, ┘        └──► Transport::send
//!   backoff, join deadline)
//! ```
//!
//! After every event the inbound operation queue is drained, so operations
//! are applied in arrival order by exactly one consumer.

mod handle;
mod router;

pub use handle::ClientHandle;

use handle::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use liveshare_core::{
    now_millis, Attachment, ChatKind, ChatMessage, DocumentKey, DocumentOperation, SessionId,
    UserId,
};

use crate::chat::{ChatLog, ExportHeader, SystemKind};
use crate::config::SyncConfig;
use crate::document::DocumentSync;
use crate::error::{ConnectionError, SessionError, SyncError};
use crate::follow::FollowMode;
use crate::host::{ChangeSink, EchoGuard, EditorHost, LocalEvent, Notice, TextChange};
use crate::presence::{CursorThrottle, PresenceSnapshot};
use crate::protocol::{Frame, Message, OperationPayload};
use crate::resolver::{ConflictResolver, LastTimestampWins};
use crate::session::{LocalIdentity, Role, SessionManager, SessionReply, SessionSummary, SharedServer};
use crate::transport::{Backoff, Transport, TransportEvent};

pub struct Client<H: EditorHost + 'static> {
    config: SyncConfig,
    host: Arc<H>,
    sessions: SessionManager,
    transport: Transport,
    documents: DocumentSync,
    follow: FollowMode,
    chat: ChatLog,
    cursor: CursorThrottle<Message>,
    commands: mpsc::UnboundedReceiver<Command>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    local_events: mpsc::UnboundedReceiver<LocalEvent>,
    running: bool,
}

impl<H: EditorHost + 'static> Client<H> {
    pub fn new(config: SyncConfig, host: Arc<H>) -> (Self, ClientHandle) {
        Self::with_resolver(config, host, Box::new(LastTimestampWins::new()))
    }

    pub fn with_resolver(
        config: SyncConfig,
        host: Arc<H>,
        resolver: Box<dyn ConflictResolver>,
    ) -> (Self, ClientHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (transport_tx, transport_events) = mpsc::unbounded_channel();
        let (local_tx, local_events) = mpsc::unbounded_channel();
        let guard = EchoGuard::new();

        let transport = Transport::new(
            config.server_url.clone(),
            config.connect_timeout(),
            Backoff::new(config.reconnect_base(), config.max_reconnect_attempts),
            transport_tx,
        );
        let documents = DocumentSync::new(
            resolver,
            config.seen_operation_capacity,
            config.debounce(),
            guard.clone(),
        );
        let chat = ChatLog::new();
        let handle = ClientHandle::new(command_tx, ChangeSink::new(local_tx, guard), chat.listener());

        let client = Self {
            sessions: SessionManager::new(LocalIdentity::new(config.display_name.clone())),
            cursor: CursorThrottle::new(config.cursor_throttle()),
            config,
            host,
            transport,
            documents,
            follow: FollowMode::new(),
            chat,
            commands,
            transport_events,
            local_events,
            running: true,
        };
        (client, handle)
    }

    /// Build a client and run it on the current runtime.
    pub fn spawn(config: SyncConfig, host: Arc<H>) -> (ClientHandle, JoinHandle<()>) {
        let (client, handle) = Self::new(config, host);
        (handle, tokio::spawn(client.run()))
    }

    pub fn user_id(&self) -> &UserId {
        self.sessions.user_id()
    }

    pub async fn run(mut self) {
        log::info!(
            "Sync client started for {} (relay {}, {} conflicts)",
            self.sessions.identity().display_name,
            self.transport.url(),
            self.documents.resolver_name()
        );

        while self.running {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.running = false,
                },
                Some(event) = self.transport_events.recv() => self.handle_transport(event).await,
                Some(event) = self.local_events.recv() => self.handle_local(event).await,
                _ = sleep_until(deadline) => self.handle_timers(Instant::now()).await,
            }
            self.drain_operations().await;
        }

        if !self.sessions.is_idle() {
            self.flush_local_changes();
            if self.sessions.active().is_some() {
                self.send(Message::EndSession);
            }
        }
        self.teardown(None).await;
        log::info!("Sync client stopped");
    }

    // ── commands ────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => self.begin(Role::Host, SessionId::generate(), reply),
            Command::Join { session_id, reply } => self.begin(Role::Guest, session_id, reply),
            Command::End { reply } => {
                let result = self.end_session().await;
                let _ = reply.send(result);
            }
            Command::Share {
                key,
                filename,
                content,
                language,
                reply,
            } => {
                let result = self.share(&key, &filename, &content, language.as_deref());
                let _ = reply.send(result);
            }
            Command::Unshare { key, reply } => {
                let _ = reply.send(self.unshare(&key));
            }
            Command::Follow { target, reply } => {
                let result = self.start_following(target).await;
                let _ = reply.send(result);
            }
            Command::StopFollowing { reply } => {
                let _ = reply.send(Ok(self.stop_following()));
            }
            Command::Chat {
                body,
                kind,
                attachment,
                reply,
            } => {
                let _ = reply.send(self.post_chat(&body, kind, attachment));
            }
            Command::ShareServer { port, name, reply } => {
                let _ = reply.send(self.share_server(port, name));
            }
            Command::ShareTerminal {
                terminal_id,
                name,
                reply,
            } => {
                let _ = reply.send(self.share_terminal(terminal_id, name));
            }
            Command::ExecuteCode {
                code,
                language,
                filename,
                reply,
            } => {
                let result = self.require_session().map(|()| {
                    self.send(Message::ExecuteCode {
                        code,
                        language,
                        filename,
                    })
                });
                let _ = reply.send(result);
            }
            Command::Summary { reply } => {
                let _ = reply.send(Ok(self.summary()));
            }
            Command::Presence { reply } => {
                let _ = reply.send(Ok(self.presence()));
            }
            Command::Log { reply } => {
                let header = self.export_header();
                let _ = reply.send(Ok((header, self.chat.entries().to_vec())));
            }
            Command::State { reply } => {
                let _ = reply.send(Ok(self.transport.state()));
            }
            Command::Shutdown => self.running = false,
        }
    }

    fn begin(&mut self, role: Role, session_id: SessionId, reply: SessionReply) {
        match self.sessions.begin(role, session_id, reply) {
            Ok(()) => self.transport.connect(),
            Err((error, reply)) => {
                let _ = reply.send(Err(error.into()));
            }
        }
    }

    async fn end_session(&mut self) -> Result<(), SyncError> {
        if self.sessions.is_idle() {
            return Err(SessionError::NotActive.into());
        }
        if self.sessions.active().is_some() {
            self.flush_local_changes();
            self.send(Message::EndSession);
        }
        self.teardown(Some(Notice::info("Session ended"))).await;
        Ok(())
    }

    fn share(
        &mut self,
        key: &DocumentKey,
        filename: &str,
        content: &str,
        language: Option<&str>,
    ) -> Result<(), SyncError> {
        self.require_session()?;
        let message = self.documents.share(key, filename, content, language)?;
        self.send(message);
        let who = self.sessions.identity().display_name.clone();
        self.chat
            .record(SystemKind::DocumentShared, format!("{who} shared {filename}"));
        Ok(())
    }

    fn unshare(&mut self, key: &DocumentKey) -> Result<(), SyncError> {
        self.require_session()?;
        if let Some(message) = self.documents.unshare(key) {
            self.send(message);
            self.chat
                .record(SystemKind::DocumentUnshared, format!("Stopped sharing {}", key.file_name()));
        }
        Ok(())
    }

    async fn start_following(&mut self, target: UserId) -> Result<(), SyncError> {
        let me = self.sessions.user_id().clone();
        let session = self.sessions.active_mut().ok_or(SessionError::NotActive)?;
        if target == me {
            return Err(SessionError::CannotFollowSelf.into());
        }
        let member = session
            .members
            .member(&target)
            .ok_or_else(|| SessionError::UnknownMember(target.clone()))?;
        let name = member.display_name.clone();
        let current = member.active_document.clone();

        session.members.set_following(Some(&target));
        let jump = self.follow.follow(target, current);
        self.notify(Notice::info(format!("Following {name}")));
        self.render_presence();
        if let Some(key) = jump {
            self.navigate(&key).await;
        }
        Ok(())
    }

    fn stop_following(&mut self) -> Option<UserId> {
        let previous = self.follow.stop()?;
        if let Some(session) = self.sessions.active_mut() {
            session.members.set_following(None);
        }
        let name = self.member_name(&previous);
        self.notify(Notice::info(format!("Stopped following {name}")));
        self.render_presence();
        Some(previous)
    }

    fn post_chat(
        &mut self,
        body: &str,
        kind: ChatKind,
        attachment: Option<Attachment>,
    ) -> Result<ChatMessage, SyncError> {
        let body = ChatMessage::validate_body(body)?;
        self.require_session()?;
        let identity = self.sessions.identity().clone();
        let message = self
            .chat
            .post(&identity.user_id, &identity.display_name, body, kind, attachment)?;
        self.send(Message::ChatMessage {
            message: message.body.clone(),
            message_type: message.kind,
            message_id: Some(message.id),
            username: Some(message.author_name.clone()),
            timestamp: Some(message.timestamp),
            metadata: message.attachment.clone(),
        });
        Ok(message)
    }

    fn share_server(&mut self, port: u16, name: String) -> Result<(), SyncError> {
        self.require_session()?;
        let url = format!("http://localhost:{port}");
        self.send(Message::ShareServer {
            port,
            name: name.clone(),
            url: url.clone(),
        });
        if let Some(session) = self.sessions.active_mut() {
            session.shared_servers.insert(
                port,
                SharedServer {
                    port,
                    name: name.clone(),
                    url: Some(url),
                },
            );
        }
        self.chat
            .record(SystemKind::ServerShared, format!("Shared server {name} on port {port}"));
        Ok(())
    }

    fn share_terminal(&mut self, terminal_id: String, name: String) -> Result<(), SyncError> {
        self.require_session()?;
        self.send(Message::ShareTerminal {
            terminal_id: terminal_id.clone(),
            name: name.clone(),
        });
        if let Some(session) = self.sessions.active_mut() {
            session.active_terminals.insert(terminal_id, name.clone());
        }
        self.chat
            .record(SystemKind::TerminalShared, format!("Shared terminal {name}"));
        Ok(())
    }

    // ── transport ───────────────────────────────────────────────

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened {
                generation,
                outgoing,
            } => {
                if self.transport.on_opened(generation, outgoing) {
                    self.on_connected().await;
                }
            }
            TransportEvent::Frame { generation, frame } => {
                if self.transport.is_current(generation) {
                    self.dispatch(frame).await;
                } else {
                    log::trace!("Dropping frame from stale connection {generation}");
                }
            }
            TransportEvent::Closed { generation } => {
                if self.transport.on_closed(generation) {
                    self.connection_lost(ConnectionError::Closed).await;
                }
            }
            TransportEvent::Failed { generation, error } => {
                if self.transport.on_failed(generation) {
                    self.connection_lost(error).await;
                }
            }
        }
    }

    async fn on_connected(&mut self) {
        let identity = self.sessions.identity().clone();
        if let Some(role) = self.sessions.pending().map(|p| p.role) {
            match role {
                Role::Host => {
                    self.send(Message::CreateSession {
                        username: identity.display_name,
                        capabilities: self.config.capabilities.clone(),
                    });
                    if let Some(session) = self.sessions.confirm_hosted() {
                        let id = session.id.clone();
                        self.chat
                            .record(SystemKind::Session, format!("Session {id} started"));
                        self.notify(Notice::info(format!(
                            "Session started. Share the code {id} with your collaborators."
                        )));
                    }
                    self.render_presence();
                }
                Role::Guest => {
                    self.send(Message::JoinSession {
                        username: identity.display_name,
                        capabilities: self.config.capabilities.clone(),
                    });
                    self.sessions
                        .set_handshake_deadline(Instant::now() + self.config.connect_timeout());
                }
            }
            return;
        }

        if self.sessions.active().is_some() {
            log::info!("Reconnected; rejoining session");
            self.send(Message::RejoinSession {
                username: identity.display_name,
            });
            // The rejoin acknowledgement asks again for anything still missing.
            self.documents.retry_snapshot_requests();
            let held = self.documents.take_offline();
            if !held.is_empty() {
                log::info!("Replaying {} operation(s) made while offline", held.len());
                for op in &held {
                    self.send_operation(op);
                }
            }
            self.flush_local_changes();
            self.notify(Notice::info("Reconnected to the relay"));
        }
    }

    async fn connection_lost(&mut self, error: ConnectionError) {
        if self.sessions.pending().is_some() {
            self.sessions.fail_pending(error.into());
            self.teardown(None).await;
            return;
        }
        if self.sessions.active().is_none() {
            return;
        }

        match self.transport.schedule_reconnect() {
            Some((attempt, delay)) => {
                self.notify(Notice::warning(format!(
                    "Connection lost ({error}). Reconnecting in {} (attempt {attempt} of {}).",
                    format_delay(delay),
                    self.config.max_reconnect_attempts
                )));
            }
            None => {
                let notice = Notice::error(format!(
                    "Disconnected: could not reach the relay after {} attempts ({error}). \
                     Start or join the session again once it is back.",
                    self.config.max_reconnect_attempts
                ));
                self.teardown(Some(notice)).await;
            }
        }
    }

    // ── editor events ───────────────────────────────────────────

    async fn handle_local(&mut self, event: LocalEvent) {
        if self.sessions.active().is_none() {
            return;
        }
        match event {
            LocalEvent::Edited { key, changes } => self.local_edit(&key, changes),
            LocalEvent::SelectionChanged {
                key,
                cursor,
                selection,
            } => {
                let me = self.sessions.user_id().clone();
                if let Some(session) = self.sessions.active_mut() {
                    session.members.update_cursor(&me, &key, Some(cursor), selection);
                }
                if !self.documents.is_shared(&key) {
                    return;
                }
                let update = Message::CursorUpdate {
                    uri: key,
                    cursor: Some(cursor),
                    selection,
                };
                if let Some(update) = self.cursor.offer(Instant::now(), update) {
                    self.send(update);
                }
            }
            LocalEvent::ActiveChanged {
                key,
                filename,
                content,
                language,
                via_follow,
            } => {
                self.local_switch(&key, &filename, &content, language.as_deref(), via_follow);
            }
        }
    }

    fn local_edit(&mut self, key: &DocumentKey, changes: Vec<TextChange>) {
        if !self.documents.record_local(key, changes, Instant::now()) {
            log::trace!("Ignoring edit to unshared document {key}");
        }
    }

    fn local_switch(
        &mut self,
        key: &DocumentKey,
        filename: &str,
        content: &str,
        language: Option<&str>,
        via_follow: bool,
    ) {
        if !via_follow {
            if let Some(previous) = self.follow.on_local_switch() {
                if let Some(session) = self.sessions.active_mut() {
                    session.members.set_following(None);
                }
                let name = self.member_name(&previous);
                self.notify(Notice::info(format!("Stopped following {name}")));
            }
        }

        let me = self.sessions.user_id().clone();
        if let Some(session) = self.sessions.active_mut() {
            session.members.set_active_document(&me, Some(key.clone()));
        }
        self.flush_local_changes();

        if !self.documents.is_shared(key) {
            match self.documents.share(key, filename, content, language) {
                Ok(message) => {
                    self.send(message);
                    let who = self.sessions.identity().display_name.clone();
                    self.chat
                        .record(SystemKind::DocumentShared, format!("{who} shared {filename}"));
                }
                Err(e) => self.notify(Notice::warning(format!("Could not share {filename}: {e}"))),
            }
        } else if self.documents.request_snapshot(key) {
            self.send(Message::RequestFileContent { uri: key.clone() });
        }

        self.send(Message::ActiveFileChange {
            uri: Some(key.clone()),
            filename: Some(filename.to_string()),
        });
        self.render_presence();
    }

    // ── timers ──────────────────────────────────────────────────

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.documents.flush_deadline(),
            self.cursor.deadline(),
            self.transport.reconnect_deadline(),
            self.sessions.handshake_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    async fn handle_timers(&mut self, now: Instant) {
        if self.documents.flush_deadline().is_some_and(|at| at <= now) {
            self.flush_local_changes();
        }
        if let Some(update) = self.cursor.take_due(now) {
            self.send(update);
        }
        if self.sessions.handshake_deadline().is_some_and(|at| at <= now) {
            let error = ConnectionError::Timeout {
                url: self.transport.url().to_string(),
                after: self.config.connect_timeout(),
            };
            self.sessions.fail_pending(error.into());
            self.teardown(None).await;
        }
        self.transport.reconnect_if_due(now);
    }

    // ── helpers ─────────────────────────────────────────────────

    fn send(&self, message: Message) {
        let mut frame = Frame::new(message).from_user(self.sessions.user_id());
        if let Some(id) = self.sessions.session_id() {
            frame = frame.in_session(id);
        }
        self.transport.send(&frame);
    }

    /// Send buffered local edits, or hold them until the rejoin if the
    /// relay is unreachable.
    fn flush_local_changes(&mut self) {
        let origin = self.sessions.user_id().clone();
        let ops = self.documents.flush_local(&origin);
        if self.transport.is_open() {
            for op in &ops {
                self.send_operation(op);
            }
            return;
        }
        let mut dropped = 0;
        for op in ops {
            if !self.documents.hold_offline(op) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::warn!("Offline queue full; dropped {dropped} local operation(s)");
            self.notify(Notice::warning(format!(
                "{dropped} edit(s) could not be kept while offline. \
                 Reshare the document once reconnected."
            )));
        }
    }

    fn send_operation(&self, op: &DocumentOperation) {
        self.send(Message::DocumentOperation {
            uri: op.document_key.clone(),
            operation: OperationPayload::from_operation(op),
        });
    }

    async fn drain_operations(&mut self) {
        let report = self.documents.drain(self.host.as_ref()).await;
        if report.is_empty() {
            return;
        }
        for error in report.failed {
            self.chat.record(SystemKind::ApplyFailed, error.to_string());
        }
        for key in report.snapshot_requests {
            self.send(Message::RequestFileContent { uri: key });
        }
    }

    async fn navigate(&mut self, key: &DocumentKey) {
        let result = {
            let _scope = self.documents.guard().navigating();
            self.host.open_document(key).await
        };
        if let Err(e) = result {
            let target = self
                .follow
                .target()
                .map(|id| self.member_name(id))
                .unwrap_or_default();
            self.notify(Notice::warning(format!(
                "Could not open {} while following {target}: {e}",
                key.file_name()
            )));
        }
    }

    fn require_session(&self) -> Result<(), SyncError> {
        match self.sessions.active() {
            Some(_) => Ok(()),
            None => Err(SessionError::NotActive.into()),
        }
    }

    fn member_name(&self, id: &UserId) -> String {
        self.sessions
            .active()
            .and_then(|s| s.members.display_name(id))
            .map_or_else(|| id.to_string(), str::to_string)
    }

    fn notify(&self, notice: Notice) {
        self.host.notify(&notice);
    }

    fn presence(&self) -> PresenceSnapshot {
        self.sessions
            .active()
            .map(|s| s.members.snapshot())
            .unwrap_or_default()
    }

    fn render_presence(&self) {
        if self.sessions.active().is_some() {
            self.host.render_presence(&self.presence());
        }
    }

    fn summary(&self) -> Option<SessionSummary> {
        self.sessions.summary(
            self.documents.shared_keys().cloned().collect(),
            self.follow.target().cloned(),
        )
    }

    fn export_header(&self) -> Option<ExportHeader> {
        let session = self.sessions.active()?;
        Some(ExportHeader {
            session_id: session.id.clone(),
            exported_at: now_millis(),
            members: session
                .members
                .members()
                .iter()
                .map(|m| m.display_name.clone())
                .collect(),
        })
    }

    /// Drop every trace of the session. Safe to call repeatedly.
    async fn teardown(&mut self, notice: Option<Notice>) {
        let had_pending = self.sessions.fail_pending(ConnectionError::Cancelled.into());
        self.transport.close();
        let ended = self.sessions.end();
        self.documents.reset();
        self.follow.stop();
        self.chat.clear();
        self.cursor.reset();

        if let Some(session) = &ended {
            log::info!("Left session {}", session.id);
        }
        if had_pending || ended.is_some() {
            self.host.clear_presence();
        }
        if let Some(notice) = notice {
            self.notify(notice);
        }
    }
}

/// "4s", or "500ms" below a second.
fn format_delay(delay: Duration) -> String {
    if delay < Duration::from_secs(1) {
        format!("{}ms", delay.as_millis())
    } else if delay.subsec_millis() == 0 {
        format!("{}s", delay.as_secs())
    } else {
        format!("{:.1}s", delay.as_secs_f32())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
