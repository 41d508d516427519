//! WebSocket transport to the relay server.
//!
//! Provides:
//! - One connection at a time, each tagged with a generation number
//! - JSON text framing of [`Frame`]s
//! - Exponential reconnect backoff (2s, 4s, 8s, … with the default 1s base)
//! - Cancellation of in-flight connects on teardown
//!
//! The connection runs as a single background task that owns both halves
//! of the socket. It reports what happens through [`TransportEvent`]s;
//! events from an older generation are stale and ignored by the owner.
//!
//! ```text
//! connect() ──► task: connect_async (bounded by timeout)
//!                  │ ok                      │ err
//!                  ▼                         ▼
//!            Opened{gen, tx}          Failed{gen, error}
//!                  │
//!        ┌─────────┴─────────┐
//!   outgoing rx ─► ws sink   ws stream ─► Frame{gen, frame}
//!                  │
//!                  ▼ (close / error)
//!            Closed{gen}
//! ```

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

use crate::error::{ConnectionError, ProtocolError};
use crate::protocol::Frame;

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
}

/// Events emitted by the connection task.
#[derive(Debug)]
pub enum TransportEvent {
    Opened {
        generation: u64,
        outgoing: mpsc::UnboundedSender<WsMessage>,
    },
    Frame {
        generation: u64,
        frame: Frame,
    },
    Closed {
        generation: u64,
    },
    Failed {
        generation: u64,
        error: ConnectionError,
    },
}

/// Exponential backoff between reconnect attempts.
///
/// Attempt `n` (starting at 1) waits `base * 2^n`. The counter only goes
/// back to zero through [`Backoff::reset`], i.e. after a successful open.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempt: 0,
        }
    }

    /// Advance to the next attempt and return its delay, or `None` once
    /// the maximum has been used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// The relay connection.
pub struct Transport {
    url: String,
    connect_timeout: Duration,
    state: ConnectionState,
    /// Bumped on every connect/close; older events are ignored.
    generation: u64,
    task: Option<JoinHandle<()>>,
    outgoing: Option<mpsc::UnboundedSender<WsMessage>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
}

impl Transport {
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        backoff: Backoff,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            state: ConnectionState::Disconnected,
            generation: 0,
            task: None,
            outgoing: None,
            events,
            backoff,
            reconnect_at: None,
        }
    }

    /// Start connecting. Any previous connection or attempt is dropped.
    pub fn connect(&mut self) {
        self.abort_task();
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.reconnect_at = None;

        log::info!("Connecting to {} (generation {})", self.url, self.generation);
        let task = tokio::spawn(run_connection(
            self.url.clone(),
            self.connect_timeout,
            self.generation,
            self.events.clone(),
        ));
        self.task = Some(task);
    }

    /// Accept an `Opened` event. Returns false if it is stale.
    pub fn on_opened(
        &mut self,
        generation: u64,
        outgoing: mpsc::UnboundedSender<WsMessage>,
    ) -> bool {
        if generation != self.generation {
            return false;
        }
        self.outgoing = Some(outgoing);
        self.state = ConnectionState::Connected;
        self.backoff.reset();
        true
    }

    /// Accept a `Closed` event. Returns true if the current connection closed.
    pub fn on_closed(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.outgoing = None;
        self.task = None;
        self.state = ConnectionState::Disconnected;
        true
    }

    /// Accept a `Failed` event. Returns true if the current attempt failed.
    pub fn on_failed(&mut self, generation: u64) -> bool {
        self.on_closed(generation)
    }

    /// Whether a frame from `generation` belongs to the live connection.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.state == ConnectionState::Connected
    }

    /// Send a frame. Never fails: when the connection is not open the frame
    /// is dropped with a warning, so callers must not assume delivery.
    pub fn send(&self, frame: &Frame) {
        let Some(outgoing) = self.outgoing.as_ref().filter(|_| self.is_open()) else {
            log::warn!(
                "Dropping '{}' frame: connection is {:?}",
                frame.message.type_name(),
                self.state
            );
            return;
        };
        match frame.encode() {
            Ok(text) => {
                if outgoing.send(WsMessage::text(text)).is_err() {
                    log::warn!("Dropping '{}' frame: writer has stopped", frame.message.type_name());
                }
            }
            Err(e) => log::error!("Failed to encode '{}': {e}", frame.message.type_name()),
        }
    }

    /// Schedule the next reconnect attempt after an unexpected close.
    ///
    /// Returns `(attempt, delay)`, or `None` when attempts are exhausted.
    pub fn schedule_reconnect(&mut self) -> Option<(u32, Duration)> {
        let delay = self.backoff.next_delay()?;
        self.state = ConnectionState::Reconnecting;
        self.reconnect_at = Some(Instant::now() + delay);
        log::info!(
            "Reconnect attempt {} of {} in {:?}",
            self.backoff.attempt(),
            self.backoff.max_attempts(),
            delay
        );
        Some((self.backoff.attempt(), delay))
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Start the scheduled reconnect if its deadline has passed.
    pub fn reconnect_if_due(&mut self, now: Instant) -> bool {
        match self.reconnect_at {
            Some(at) if at <= now => {
                self.connect();
                true
            }
            _ => false,
        }
    }

    /// Close gracefully, cancel any in-flight connect and pending backoff.
    /// Safe to call repeatedly.
    pub fn close(&mut self) {
        self.reconnect_at = None;
        if let Some(outgoing) = self.outgoing.take() {
            // The task flushes the close frame and exits on its own.
            let _ = outgoing.send(WsMessage::Close(None));
            self.task = None;
        } else {
            self.abort_task();
        }
        if self.state != ConnectionState::Disconnected {
            log::debug!("Transport closed (generation {})", self.generation);
        }
        self.generation += 1;
        self.state = ConnectionState::Disconnected;
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.outgoing = None;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// Map a tungstenite connect error onto the refused/generic split.
pub fn classify_connect_error(url: &str, err: &tungstenite::Error) -> ConnectionError {
    match err {
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            ConnectionError::Refused {
                url: url.to_string(),
            }
        }
        other => ConnectionError::Failed {
            url: url.to_string(),
            reason: other.to_string(),
        },
    }
}

async fn run_connection(
    url: String,
    connect_timeout: Duration,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let ws = match tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
        .await
    {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            let error = classify_connect_error(&url, &e);
            log::warn!("{error}");
            let _ = events.send(TransportEvent::Failed { generation, error });
            return;
        }
        Err(_) => {
            let error = ConnectionError::Timeout {
                url,
                after: connect_timeout,
            };
            log::warn!("{error}");
            let _ = events.send(TransportEvent::Failed { generation, error });
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<WsMessage>();
    if events
        .send(TransportEvent::Opened {
            generation,
            outgoing: outgoing_tx,
        })
        .is_err()
    {
        return;
    }
    log::info!("Connected to {url}");

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(message) => {
                    let closing = matches!(message, WsMessage::Close(_));
                    if let Err(e) = sink.send(message).await {
                        log::warn!("WebSocket write failed: {e}");
                        break;
                    }
                    if closing {
                        return;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => forward(&events, generation, text.as_str()),
                Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => forward(&events, generation, text),
                    Err(_) => log::warn!("Dropping non-UTF-8 binary frame ({} bytes)", bytes.len()),
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    log::info!("Relay closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("WebSocket error: {e}");
                    break;
                }
            },
        }
    }

    let _ = events.send(TransportEvent::Closed { generation });
}

fn forward(events: &mpsc::UnboundedSender<TransportEvent>, generation: u64, text: &str) {
    match Frame::decode(text) {
        Ok(frame) => {
            let _ = events.send(TransportEvent::Frame { generation, frame });
        }
        Err(ProtocolError::MissingType) => log::warn!("Dropping frame without a type: {text}"),
        Err(e) => log::warn!("Dropping malformed frame: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;

    fn transport(url: &str, timeout: Duration) -> (Transport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let t = Transport::new(url, timeout, Backoff::new(Duration::from_secs(1), 5), tx);
        (t, rx)
    }

    #[test]
    fn test_backoff_sequence() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 5);
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
        // Exhausted: stays exhausted until a success resets it.
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 5);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_backoff_zero_attempts() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 0);
        assert_eq!(backoff.next_delay(), None);
    }

    #[tokio::test]
    async fn test_send_when_closed_is_noop() {
        let (t, mut rx) = transport("ws://127.0.0.1:1", Duration::from_secs(1));
        assert_eq!(t.state(), ConnectionState::Disconnected);
        t.send(&Frame::new(Message::Ping));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_is_classified() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (mut t, mut rx) = transport(&format!("ws://127.0.0.1:{port}"), Duration::from_secs(5));
        t.connect();
        assert_eq!(t.state(), ConnectionState::Connecting);

        match rx.recv().await.unwrap() {
            TransportEvent::Failed { generation, error } => {
                assert_eq!(generation, t.generation());
                assert!(matches!(error, ConnectionError::Refused { .. }), "got {error:?}");
                assert!(t.on_failed(generation));
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
        assert_eq!(t.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Accepts TCP but never answers the WebSocket handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let (mut t, mut rx) =
            transport(&format!("ws://127.0.0.1:{port}"), Duration::from_millis(200));
        t.connect();
        match rx.recv().await.unwrap() {
            TransportEvent::Failed { error, .. } => {
                assert!(matches!(error, ConnectionError::Timeout { .. }), "got {error:?}");
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_generation_ignored() {
        let (mut t, _rx) = transport("ws://127.0.0.1:1", Duration::from_secs(1));
        t.connect();
        let old = t.generation();
        t.close();
        let (tx, _out) = mpsc::unbounded_channel();
        assert!(!t.on_opened(old, tx));
        assert!(!t.on_closed(old));
        assert!(!t.is_open());
    }

    #[tokio::test]
    async fn test_schedule_reconnect_sets_deadline() {
        let (mut t, _rx) = transport("ws://127.0.0.1:1", Duration::from_secs(1));
        let before = Instant::now();
        let (attempt, delay) = t.schedule_reconnect().unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(delay, Duration::from_secs(2));
        assert_eq!(t.state(), ConnectionState::Reconnecting);
        assert!(t.reconnect_deadline().unwrap() >= before + delay);
        assert!(!t.reconnect_if_due(before));

        t.close();
        assert_eq!(t.reconnect_deadline(), None);
        assert_eq!(t.state(), ConnectionState::Disconnected);
    }
}
