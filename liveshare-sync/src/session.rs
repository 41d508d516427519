//! Session lifecycle and local identity.
//!
//! ```text
//!             start / join
//!   None ──────────────────► Pending(handshake)
//!    ▲                           │ host: transport open
//!    │                           │ guest: sessionJoined
//!    │  end / sessionEnded /     ▼
//!    └── fatal error / retries ─ Active(Session)
//!        exhausted
//! ```
//!
//! At most one session exists per client. A pending handshake holds the
//! caller's reply channel until the session is confirmed or fails.

use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

use liveshare_core::{CursorColor, DocumentKey, SessionId, User, UserId};

use crate::error::{SessionError, SyncError};
use crate::presence::PresenceRoom;

pub type SessionReply = oneshot::Sender<Result<SessionSummary, SyncError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub user_id: UserId,
    pub display_name: String,
}

impl LocalIdentity {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            user_id: UserId::random(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

#[derive(Debug)]
pub struct Handshake {
    pub role: Role,
    pub session_id: SessionId,
    reply: Option<SessionReply>,
    /// Set once the join request is on the wire.
    pub deadline: Option<Instant>,
}

impl Handshake {
    fn resolve(&mut self, result: Result<SessionSummary, SyncError>) {
        if let Some(reply) = self.reply.take() {
            // The caller may have stopped waiting.
            let _ = reply.send(result);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedServer {
    pub port: u16,
    pub name: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub host_id: UserId,
    pub is_host: bool,
    pub members: PresenceRoom,
    pub shared_servers: BTreeMap<u16, SharedServer>,
    /// Terminal id to display name.
    pub active_terminals: BTreeMap<String, String>,
}

impl Session {
    fn new(id: SessionId, host_id: UserId, identity: &LocalIdentity) -> Self {
        let mut members = PresenceRoom::new(identity.user_id.clone());
        let is_host = host_id == identity.user_id;
        if is_host {
            members.join(identity.user_id.clone(), &identity.display_name);
        }
        Self {
            id,
            host_id,
            is_host,
            members,
            shared_servers: BTreeMap::new(),
            active_terminals: BTreeMap::new(),
        }
    }

    pub fn transfer_host(&mut self, new_host: UserId) {
        self.is_host = &new_host == self.members.local_id();
        self.host_id = new_host;
    }

    pub fn local_user(&self) -> Option<&User> {
        self.members.member(self.members.local_id())
    }
}

/// Read-only view of the session for callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub host_id: UserId,
    pub is_host: bool,
    pub local_user: UserId,
    pub members: Vec<User>,
    pub shared_documents: Vec<DocumentKey>,
    pub shared_servers: Vec<SharedServer>,
    pub active_terminals: Vec<String>,
    pub following: Option<UserId>,
}

impl SessionSummary {
    pub fn color_of(&self, id: &UserId) -> Option<CursorColor> {
        self.members.iter().find(|m| &m.id == id).map(|m| m.color)
    }

    pub fn member_named(&self, name: &str) -> Option<&User> {
        self.members.iter().find(|m| m.display_name == name)
    }
}

/// Owns the local identity, the active session and any pending handshake.
#[derive(Debug)]
pub struct SessionManager {
    identity: LocalIdentity,
    active: Option<Session>,
    pending: Option<Handshake>,
}

impl SessionManager {
    pub fn new(identity: LocalIdentity) -> Self {
        Self {
            identity,
            active: None,
            pending: None,
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut Session> {
        self.active.as_mut()
    }

    pub fn pending(&self) -> Option<&Handshake> {
        self.pending.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.pending.is_none()
    }

    /// The session id frames should carry, pending or active.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.active
            .as_ref()
            .map(|s| &s.id)
            .or_else(|| self.pending.as_ref().map(|p| &p.session_id))
    }

    /// Begin hosting or joining. Fails if a session exists or is pending.
    pub fn begin(&mut self, role: Role, session_id: SessionId, reply: SessionReply) -> Result<(), (SessionError, SessionReply)> {
        if let Some(existing) = self.session_id() {
            return Err((SessionError::AlreadyActive(existing.to_string()), reply));
        }
        log::info!("{role:?} handshake for session {session_id}");
        self.pending = Some(Handshake {
            role,
            session_id,
            reply: Some(reply),
            deadline: None,
        });
        Ok(())
    }

    pub fn set_handshake_deadline(&mut self, deadline: Instant) {
        if let Some(pending) = self.pending.as_mut() {
            pending.deadline = Some(deadline);
        }
    }

    pub fn handshake_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().and_then(|p| p.deadline)
    }

    /// Host handshake: the session exists as soon as the transport opens.
    pub fn confirm_hosted(&mut self) -> Option<&Session> {
        let mut pending = self.pending.take_if(|p| p.role == Role::Host)?;
        let session = Session::new(
            pending.session_id.clone(),
            self.identity.user_id.clone(),
            &self.identity,
        );
        self.active = Some(session);
        let summary = self.summary(Vec::new(), None);
        if let Some(summary) = summary {
            pending.resolve(Ok(summary));
        }
        log::info!("Hosting session {}", pending.session_id);
        self.active.as_ref()
    }

    /// Guest handshake: the join acknowledgement arrived.
    ///
    /// Members are added in the order listed, which fixes their colours.
    /// The caller resolves the reply once the documents are registered.
    pub fn confirm_joined(
        &mut self,
        session_id: &SessionId,
        host_id: UserId,
        members: Vec<(UserId, String, Option<DocumentKey>)>,
    ) -> Option<Handshake> {
        let pending = self
            .pending
            .take_if(|p| p.role == Role::Guest && &p.session_id == session_id)?;
        let mut session = Session::new(session_id.clone(), host_id, &self.identity);
        if !members.iter().any(|(id, _, _)| id == &self.identity.user_id) {
            session
                .members
                .join(self.identity.user_id.clone(), &self.identity.display_name);
        }
        session.members.replace_members(members);
        log::info!(
            "Joined session {} with {} other member(s)",
            session.id,
            session.members.peer_count()
        );
        self.active = Some(session);
        Some(pending)
    }

    /// Resolve a handshake returned by [`SessionManager::confirm_joined`].
    pub fn resolve(handshake: &mut Handshake, result: Result<SessionSummary, SyncError>) {
        handshake.resolve(result);
    }

    /// Fail the pending handshake, if any. Returns true if there was one.
    pub fn fail_pending(&mut self, error: SyncError) -> bool {
        match self.pending.take() {
            Some(mut pending) => {
                log::warn!("Session {} handshake failed: {error}", pending.session_id);
                pending.resolve(Err(error));
                true
            }
            None => false,
        }
    }

    /// The relay assigned this client an id.
    pub fn adopt_user_id(&mut self, id: UserId) {
        if id == self.identity.user_id {
            return;
        }
        log::debug!("Relay assigned user id {id}");
        if let Some(session) = self.active.as_mut() {
            if session.host_id == self.identity.user_id {
                session.host_id = id.clone();
            }
            session.members.rekey_local(id.clone());
        }
        self.identity.user_id = id;
    }

    /// Drop the session. Returns it if there was one.
    pub fn end(&mut self) -> Option<Session> {
        self.active.take()
    }

    pub fn summary(&self, shared_documents: Vec<DocumentKey>, following: Option<UserId>) -> Option<SessionSummary> {
        let session = self.active.as_ref()?;
        Some(SessionSummary {
            id: session.id.clone(),
            host_id: session.host_id.clone(),
            is_host: session.is_host,
            local_user: self.identity.user_id.clone(),
            members: session.members.members().to_vec(),
            shared_documents,
            shared_servers: session.shared_servers.values().cloned().collect(),
            active_terminals: session.active_terminals.values().cloned().collect(),
            following,
        })
    }
}
