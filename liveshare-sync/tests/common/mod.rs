//! In-process relay server for integration tests.
//!
//! Speaks the same JSON protocol as the production relay, with just enough
//! room bookkeeping to exercise the client end to end:
//! ```text
//! Client A ──┐
//!             ├── Room (session id) ── stored documents + chat history
//! Client B ──┘          │
//!                       └── fan-out to every member but the sender
//! ```

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use liveshare_core::{DocumentKey, SessionId, UserId};
use liveshare_sync::host::splice;
use liveshare_sync::protocol::{DocumentInfo, Frame, MemberInfo, Message};
use liveshare_sync::SyncConfig;

const WAIT: Duration = Duration::from_secs(3);

enum Outgoing {
    Text(String),
    /// Drop the socket without a close frame.
    Kick,
}

struct Peer {
    tx: mpsc::UnboundedSender<Outgoing>,
    username: String,
    session: Option<SessionId>,
    active_file: Option<DocumentKey>,
}

struct StoredDocument {
    filename: String,
    content: String,
}

struct Room {
    host: UserId,
    members: Vec<UserId>,
    documents: BTreeMap<DocumentKey, StoredDocument>,
    chat: Vec<serde_json::Value>,
}

#[derive(Default)]
struct State {
    peers: HashMap<UserId, Peer>,
    rooms: HashMap<SessionId, Room>,
    received: HashMap<&'static str, usize>,
}

impl State {
    fn send_to(&self, id: &UserId, frame: &Frame) {
        let Some(peer) = self.peers.get(id) else { return };
        match frame.encode() {
            Ok(text) => {
                let _ = peer.tx.send(Outgoing::Text(text));
            }
            Err(e) => log::error!("Relay could not encode frame: {e}"),
        }
    }

    fn send_room(&self, session: &SessionId, frame: &Frame, except: Option<&UserId>) {
        let Some(room) = self.rooms.get(session) else { return };
        for member in &room.members {
            if Some(member) != except {
                self.send_to(member, frame);
            }
        }
    }

    /// The connection claims an id of its own; honour it.
    fn rebind(&mut self, me: &mut UserId, claimed: Option<UserId>, username: &str) {
        if let Some(id) = claimed.filter(|id| id != me) {
            if let Some(peer) = self.peers.remove(me) {
                self.peers.insert(id.clone(), peer);
            }
            *me = id;
        }
        if let Some(peer) = self.peers.get_mut(me) {
            peer.username = username.to_string();
        }
    }

    fn enter(&mut self, me: &UserId, session: &SessionId) {
        if let Some(peer) = self.peers.get_mut(me) {
            peer.session = Some(session.clone());
        }
        if let Some(room) = self.rooms.get_mut(session) {
            if !room.members.contains(me) {
                room.members.push(me.clone());
            }
        }
    }

    fn joined_ack(&self, me: &UserId, session: &SessionId) -> Option<Frame> {
        let room = self.rooms.get(session)?;
        let users = room
            .members
            .iter()
            .filter_map(|id| {
                self.peers.get(id).map(|p| MemberInfo {
                    id: id.clone(),
                    username: p.username.clone(),
                    active_file: p.active_file.clone(),
                })
            })
            .collect();
        let documents = room
            .documents
            .iter()
            .map(|(uri, doc)| DocumentInfo {
                uri: uri.clone(),
                filename: Some(doc.filename.clone()),
            })
            .collect();
        Some(
            Frame::new(Message::SessionJoined {
                host_id: Some(room.host.clone()),
                users,
                shared_files: Vec::new(),
                documents,
                chat_history: room.chat.clone(),
            })
            .in_session(session)
            .from_user(me),
        )
    }

    fn depart(&mut self, me: &UserId) {
        let Some(peer) = self.peers.remove(me) else { return };
        let Some(session) = peer.session else { return };
        if let Some(room) = self.rooms.get_mut(&session) {
            room.members.retain(|m| m != me);
        }
        let left = Frame::new(Message::UserLeft {
            username: Some(peer.username),
        })
        .in_session(&session)
        .from_user(me);
        self.send_room(&session, &left, None);
    }
}

/// A relay listening on a random local port.
pub struct Relay {
    url: String,
    state: Arc<Mutex<State>>,
    accept: JoinHandle<()>,
}

impl Relay {
    pub async fn start() -> Relay {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let accept_state = state.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        log::debug!("Relay connection ended: {e}");
                    }
                });
            }
        });

        Relay {
            url: format!("ws://{addr}"),
            state,
            accept,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Client settings pointed at this relay, with short timers.
    pub fn config(&self, name: &str) -> SyncConfig {
        SyncConfig {
            server_url: self.url.clone(),
            display_name: name.to_string(),
            reconnect_base_ms: 50,
            connect_timeout_ms: 2_000,
            debounce_ms: 20,
            cursor_throttle_ms: 20,
            ..SyncConfig::default()
        }
    }

    pub async fn wait_for_session(&self, session: &SessionId) {
        self.wait_for("session to exist", |s| s.rooms.contains_key(session))
            .await;
    }

    pub async fn wait_for_members(&self, session: &SessionId, count: usize) {
        self.wait_for("room membership", |s| {
            s.rooms.get(session).is_some_and(|r| r.members.len() == count)
        })
        .await;
    }

    pub async fn wait_for_document(&self, session: &SessionId, key: &DocumentKey, content: &str) {
        self.wait_for("stored document", |s| {
            s.rooms
                .get(session)
                .and_then(|r| r.documents.get(key))
                .is_some_and(|d| d.content == content)
        })
        .await;
    }

    pub async fn wait_for_received(&self, type_name: &'static str, count: usize) {
        self.wait_for("frames", |s| {
            s.received.get(type_name).copied().unwrap_or(0) >= count
        })
        .await;
    }

    pub async fn received(&self, type_name: &'static str) -> usize {
        self.state
            .lock()
            .await
            .received
            .get(type_name)
            .copied()
            .unwrap_or(0)
    }

    pub async fn members(&self, session: &SessionId) -> Vec<UserId> {
        self.state
            .lock()
            .await
            .rooms
            .get(session)
            .map(|r| r.members.clone())
            .unwrap_or_default()
    }

    /// Deliver a frame to every member of a session, as if relayed.
    pub async fn inject(&self, session: &SessionId, frame: Frame) {
        let state = self.state.lock().await;
        state.send_room(session, &frame.in_session(session), None);
    }

    /// Stop listening and drop every socket. Later connects are refused.
    pub async fn shutdown(self) {
        self.accept.abort();
        let _ = self.accept.await;
        let state = self.state.lock().await;
        for peer in state.peers.values() {
            let _ = peer.tx.send(Outgoing::Kick);
        }
    }

    /// Drop a member's socket.
    pub async fn kick(&self, user: &UserId) {
        let state = self.state.lock().await;
        if let Some(peer) = state.peers.get(user) {
            let _ = peer.tx.send(Outgoing::Kick);
        }
    }

    async fn wait_for(&self, what: &str, check: impl Fn(&State) -> bool) {
        let deadline = Instant::now() + WAIT;
        loop {
            if check(&*self.state.lock().await) {
                return;
            }
            if Instant::now() > deadline {
                panic!("Timed out waiting for {what}");
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Poll `check` until it holds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        if Instant::now() > deadline {
            panic!("Timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<State>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut me = UserId::random();
    {
        let mut s = state.lock().await;
        s.peers.insert(
            me.clone(),
            Peer {
                tx,
                username: "Anonymous".to_string(),
                session: None,
                active_file: None,
            },
        );
        s.send_to(&me, &Frame::new(Message::ConnectionEstablished).from_user(&me));
    }

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(Outgoing::Text(text)) => sink.send(WsMessage::text(text)).await?,
                Some(Outgoing::Kick) | None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => match Frame::decode(text.as_str()) {
                    Ok(frame) => handle_frame(&mut *state.lock().await, &mut me, frame),
                    Err(e) => log::warn!("Relay dropped a frame: {e}"),
                },
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.lock().await.depart(&me);
    Ok(())
}

fn handle_frame(s: &mut State, me: &mut UserId, frame: Frame) {
    *s.received.entry(frame.message.type_name()).or_default() += 1;
    let claimed = frame.user_id.clone();
    let current = s.peers.get(me).and_then(|p| p.session.clone());

    match frame.message {
        Message::CreateSession { username, .. } => {
            s.rebind(me, claimed, &username);
            let session = frame.session_id.unwrap_or_else(SessionId::generate);
            s.rooms.insert(
                session.clone(),
                Room {
                    host: me.clone(),
                    members: Vec::new(),
                    documents: BTreeMap::new(),
                    chat: Vec::new(),
                },
            );
            s.enter(me, &session);
            s.send_to(me, &Frame::new(Message::SessionCreated).in_session(&session).from_user(me));
        }
        Message::JoinSession { username, .. } | Message::RejoinSession { username } => {
            let Some(session) = frame.session_id.filter(|id| s.rooms.contains_key(id)) else {
                s.send_to(
                    me,
                    &Frame::new(Message::SessionError {
                        message: "Session not found".to_string(),
                        fatal: true,
                    }),
                );
                return;
            };
            s.rebind(me, claimed, &username);
            s.enter(me, &session);
            if let Some(ack) = s.joined_ack(me, &session) {
                s.send_to(me, &ack);
            }
            let joined = Frame::new(Message::UserJoined {
                username: Some(username),
            })
            .in_session(&session)
            .from_user(me);
            s.send_room(&session, &joined, Some(me));
        }
        Message::EndSession => {
            let Some(session) = current else { return };
            if s.rooms.get(&session).is_none_or(|r| &r.host != me) {
                return;
            }
            let ended = Frame::new(Message::SessionEnded {
                reason: Some("The host ended the session".to_string()),
            })
            .in_session(&session);
            s.send_room(&session, &ended, Some(me));
            if let Some(room) = s.rooms.remove(&session) {
                for member in room.members {
                    if let Some(peer) = s.peers.get_mut(&member) {
                        peer.session = None;
                    }
                }
            }
        }
        Message::ShareFile {
            uri,
            filename,
            content,
            language,
        } => {
            let Some(session) = current else { return };
            if let Some(room) = s.rooms.get_mut(&session) {
                room.documents.insert(
                    uri.clone(),
                    StoredDocument {
                        filename: filename.clone(),
                        content: content.clone(),
                    },
                );
            }
            let shared = Frame::new(Message::FileShared {
                uri,
                filename: Some(filename),
                content,
                language,
            })
            .in_session(&session)
            .from_user(me);
            s.send_room(&session, &shared, None);
        }
        Message::UnshareFile { uri, .. } => {
            let Some(session) = current else { return };
            if let Some(room) = s.rooms.get_mut(&session) {
                room.documents.remove(&uri);
            }
            let unshared = Frame::new(Message::FileUnshared { uri })
                .in_session(&session)
                .from_user(me);
            s.send_room(&session, &unshared, Some(me));
        }
        Message::RequestFileContent { uri } => {
            let Some(session) = current else { return };
            let reply = s
                .rooms
                .get(&session)
                .and_then(|r| r.documents.get(&uri))
                .map(|doc| Message::FileContent {
                    uri: uri.clone(),
                    filename: Some(doc.filename.clone()),
                    content: doc.content.clone(),
                })
                .unwrap_or_else(|| Message::SessionError {
                    message: format!("{uri} is not shared"),
                    fatal: false,
                });
            s.send_to(me, &Frame::new(reply).in_session(&session));
        }
        Message::DocumentOperation { uri, operation } => {
            let Some(session) = current else { return };
            if let Some(doc) = s
                .rooms
                .get_mut(&session)
                .and_then(|r| r.documents.get_mut(&uri))
            {
                splice(&mut doc.content, operation.range, &operation.text);
            }
            let relayed = Frame::new(Message::DocumentOperation { uri, operation })
                .in_session(&session)
                .from_user(me);
            s.send_room(&session, &relayed, Some(me));
        }
        message @ Message::CursorUpdate { .. } => {
            let Some(session) = current else { return };
            s.send_room(&session, &Frame::new(message).in_session(&session).from_user(me), Some(me));
        }
        Message::ActiveFileChange { uri, filename } => {
            let Some(session) = current else { return };
            if let Some(peer) = s.peers.get_mut(me) {
                peer.active_file = uri.clone();
            }
            let relayed = Frame::new(Message::ActiveFileChange { uri, filename })
                .in_session(&session)
                .from_user(me);
            s.send_room(&session, &relayed, Some(me));
        }
        message @ Message::ChatMessage { .. } => {
            let Some(session) = current else { return };
            let relayed = Frame::new(message).in_session(&session).from_user(me);
            if let (Some(room), Ok(value)) = (s.rooms.get_mut(&session), serde_json::to_value(&relayed)) {
                room.chat.push(value);
            }
            s.send_room(&session, &relayed, None);
        }
        Message::ExecuteCode {
            language, filename, ..
        } => {
            let Some(session) = current else { return };
            let result = Message::CodeExecution {
                output: Some(format!("ran {filename}")),
                error: None,
                language: Some(language),
            };
            s.send_to(me, &Frame::new(result).in_session(&session));
        }
        Message::ShareServer { port, name, url } => {
            let Some(session) = current else { return };
            let shared = Frame::new(Message::ServerShared {
                port,
                name,
                url: Some(url),
            })
            .in_session(&session)
            .from_user(me);
            s.send_room(&session, &shared, Some(me));
        }
        Message::ShareTerminal { terminal_id, name } => {
            let Some(session) = current else { return };
            let shared = Frame::new(Message::TerminalShared { terminal_id, name })
                .in_session(&session)
                .from_user(me);
            s.send_room(&session, &shared, Some(me));
        }
        Message::Ping => s.send_to(me, &Frame::new(Message::Pong)),
        _ => {}
    }
}
