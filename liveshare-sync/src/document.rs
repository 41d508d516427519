//! Document synchronization.
//!
//! ```text
//!  relay ──documentOperation──► enqueue ──► queue (FIFO)
//!                                 │ seen?       │
//!                                 ▼             ▼ drain (one at a time)
//!                              dropped     resolver ─► host.apply_edit (echo guard up)
//!
//!  editor ──edited──► PendingEdits ──(quiet window)──► flush_local ──► documentOperation
//! ```
//!
//! Remote operations are applied strictly in arrival order and only one
//! drain runs at a time (it holds `&mut self`). Operations for a document
//! that has no local copy yet trigger a single `requestFileContent` and are
//! dropped; the snapshot that comes back already contains them.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use liveshare_core::{now_millis, DocumentKey, DocumentOperation, OperationId, UserId, ValidationError};

use crate::error::{ApplyError, HostError};
use crate::host::{EchoGuard, EditorHost, TextChange};
use crate::protocol::Message;
use crate::resolver::{ConflictResolver, Resolution};

/// Largest document that can be shared.
pub const MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

/// Local operations kept while the relay is unreachable.
pub const OFFLINE_QUEUE_CAPACITY: usize = 10_000;

// ───────────────────────────────────────────────────────────────────
// Building blocks
// ───────────────────────────────────────────────────────────────────

/// Bounded memory of operation ids already handled.
#[derive(Debug)]
pub struct SeenOperations {
    ids: HashSet<OperationId>,
    order: VecDeque<OperationId>,
    capacity: usize,
}

impl SeenOperations {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns false if `id` was already seen.
    pub fn insert(&mut self, id: OperationId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id);
        true
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}

/// Millisecond timestamps that never repeat or go backwards.
#[derive(Debug, Default)]
pub struct OperationClock {
    last: u64,
}

impl OperationClock {
    pub fn tick(&mut self) -> u64 {
        self.last = now_millis().max(self.last + 1);
        self.last
    }
}

/// Local operations made while disconnected, replayed after the rejoin.
#[derive(Debug)]
pub struct OfflineQueue {
    queue: VecDeque<DocumentOperation>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max_size,
        }
    }

    /// Returns false when the queue is full.
    pub fn enqueue(&mut self, op: DocumentOperation) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(op);
        true
    }

    pub fn drain(&mut self) -> Vec<DocumentOperation> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Local edits waiting for the quiet window to pass.
#[derive(Debug, Default)]
struct PendingEdits {
    changes: Vec<(DocumentKey, TextChange)>,
    deadline: Option<Instant>,
}

impl PendingEdits {
    /// Every new edit restarts the window.
    fn push(&mut self, key: &DocumentKey, changes: Vec<TextChange>, now: Instant, window: Duration) {
        self.changes
            .extend(changes.into_iter().map(|c| (key.clone(), c)));
        self.deadline = Some(now + window);
    }

    fn take(&mut self) -> Vec<(DocumentKey, TextChange)> {
        self.deadline = None;
        std::mem::take(&mut self.changes)
    }

    fn clear(&mut self) {
        self.changes.clear();
        self.deadline = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedDocument {
    pub filename: String,
    pub language: Option<String>,
    /// Whether this client has a local copy.
    pub materialized: bool,
}

/// Outcome of [`DocumentSync::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    Duplicate,
}

/// What a drain did.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub applied: usize,
    pub discarded: Vec<(OperationId, OperationId)>,
    pub failed: Vec<ApplyError>,
    /// Documents that need a `requestFileContent`.
    pub snapshot_requests: Vec<DocumentKey>,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.applied == 0
            && self.discarded.is_empty()
            && self.failed.is_empty()
            && self.snapshot_requests.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────────
// Engine
// ───────────────────────────────────────────────────────────────────

pub struct DocumentSync {
    shared: BTreeMap<DocumentKey, SharedDocument>,
    queue: VecDeque<DocumentOperation>,
    seen: SeenOperations,
    resolver: Box<dyn ConflictResolver>,
    awaiting_snapshot: HashSet<DocumentKey>,
    pending: PendingEdits,
    offline: OfflineQueue,
    debounce: Duration,
    clock: OperationClock,
    guard: EchoGuard,
}

impl DocumentSync {
    pub fn new(
        resolver: Box<dyn ConflictResolver>,
        seen_capacity: usize,
        debounce: Duration,
        guard: EchoGuard,
    ) -> Self {
        Self {
            shared: BTreeMap::new(),
            queue: VecDeque::new(),
            seen: SeenOperations::new(seen_capacity),
            resolver,
            awaiting_snapshot: HashSet::new(),
            pending: PendingEdits::default(),
            offline: OfflineQueue::new(OFFLINE_QUEUE_CAPACITY),
            debounce,
            clock: OperationClock::default(),
            guard,
        }
    }

    pub fn guard(&self) -> &EchoGuard {
        &self.guard
    }

    pub fn resolver_name(&self) -> &'static str {
        self.resolver.name()
    }

    // ── sharing ─────────────────────────────────────────────────

    /// Share a local document. Returns the `shareFile` body to send.
    pub fn share(
        &mut self,
        key: &DocumentKey,
        filename: &str,
        content: &str,
        language: Option<&str>,
    ) -> Result<Message, ValidationError> {
        if key.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyDocumentKey);
        }
        if content.len() > MAX_DOCUMENT_BYTES {
            return Err(ValidationError::DocumentTooLarge {
                len: content.len(),
                max: MAX_DOCUMENT_BYTES,
            });
        }
        self.shared.insert(
            key.clone(),
            SharedDocument {
                filename: filename.to_string(),
                language: language.map(str::to_string),
                materialized: true,
            },
        );
        log::info!("Sharing {key} ({} bytes)", content.len());
        Ok(Message::ShareFile {
            uri: key.clone(),
            filename: filename.to_string(),
            content: content.to_string(),
            language: language.map(str::to_string),
        })
    }

    /// Stop sharing. Returns the `unshareFile` body, or `None` if the
    /// document was not shared.
    pub fn unshare(&mut self, key: &DocumentKey) -> Option<Message> {
        let document = self.forget(key)?;
        Some(Message::UnshareFile {
            uri: key.clone(),
            filename: document.filename,
        })
    }

    /// A document the relay says is shared but that has no local copy yet.
    pub fn register(&mut self, key: &DocumentKey, filename: Option<&str>) {
        self.shared.entry(key.clone()).or_insert_with(|| SharedDocument {
            filename: filename.unwrap_or_else(|| key.file_name()).to_string(),
            language: None,
            materialized: false,
        });
    }

    /// Install (or overwrite) the local copy from a full snapshot.
    pub async fn materialize<H: EditorHost + ?Sized>(
        &mut self,
        host: &H,
        key: &DocumentKey,
        filename: Option<&str>,
        content: &str,
        language: Option<&str>,
    ) -> Result<(), HostError> {
        let filename = filename.unwrap_or_else(|| key.file_name()).to_string();
        let result = {
            let _scope = self.guard.applying();
            host.materialize(key, &filename, content, language).await
        };
        self.awaiting_snapshot.remove(key);
        result?;

        let entry = self.shared.entry(key.clone()).or_insert_with(|| SharedDocument {
            filename: filename.clone(),
            language: None,
            materialized: false,
        });
        entry.filename = filename;
        if language.is_some() {
            entry.language = language.map(str::to_string);
        }
        entry.materialized = true;
        Ok(())
    }

    /// The relay unshared a document: drop it locally.
    pub async fn remove<H: EditorHost + ?Sized>(&mut self, host: &H, key: &DocumentKey) -> Option<SharedDocument> {
        let document = self.forget(key)?;
        if document.materialized {
            if let Err(e) = host.close_document(key).await {
                log::warn!("Could not close {key}: {e}");
            }
        }
        Some(document)
    }

    fn forget(&mut self, key: &DocumentKey) -> Option<SharedDocument> {
        let document = self.shared.remove(key)?;
        self.resolver.forget(key);
        self.awaiting_snapshot.remove(key);
        self.queue.retain(|op| &op.document_key != key);
        self.pending.changes.retain(|(k, _)| k != key);
        self.offline.queue.retain(|op| &op.document_key != key);
        Some(document)
    }

    pub fn is_shared(&self, key: &DocumentKey) -> bool {
        self.shared.contains_key(key)
    }

    pub fn is_materialized(&self, key: &DocumentKey) -> bool {
        self.shared.get(key).is_some_and(|d| d.materialized)
    }

    pub fn document(&self, key: &DocumentKey) -> Option<&SharedDocument> {
        self.shared.get(key)
    }

    pub fn shared_keys(&self) -> impl Iterator<Item = &DocumentKey> {
        self.shared.keys()
    }

    /// Shared documents without a local copy that nobody has asked for yet.
    /// Marks them as requested.
    pub fn request_missing(&mut self) -> Vec<DocumentKey> {
        let missing: Vec<DocumentKey> = self
            .shared
            .iter()
            .filter(|(k, d)| !d.materialized && !self.awaiting_snapshot.contains(*k))
            .map(|(k, _)| k.clone())
            .collect();
        self.awaiting_snapshot.extend(missing.iter().cloned());
        missing
    }

    /// Forget which snapshots were asked for. Requests sent on a connection
    /// that dropped never get an answer, so they must be sent again.
    pub fn retry_snapshot_requests(&mut self) {
        self.awaiting_snapshot.clear();
    }

    /// Ask for a fresh snapshot of a document. Returns false if one is
    /// already on its way.
    pub fn request_snapshot(&mut self, key: &DocumentKey) -> bool {
        self.awaiting_snapshot.insert(key.clone())
    }

    // ── remote operations ───────────────────────────────────────

    /// Queue a remote operation. Ids are recorded here, so a duplicate that
    /// arrives while the original is still queued is dropped too.
    pub fn enqueue(&mut self, op: DocumentOperation) -> Enqueued {
        if !self.seen.insert(op.id) {
            log::debug!("Ignoring duplicate operation {}", op.id);
            return Enqueued::Duplicate;
        }
        self.queue.push_back(op);
        Enqueued::Queued
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Apply queued operations in order. A failed operation is reported and
    /// the rest of the queue still runs.
    pub async fn drain<H: EditorHost + ?Sized>(&mut self, host: &H) -> DrainReport {
        let mut report = DrainReport::default();
        while let Some(op) = self.queue.pop_front() {
            let key = op.document_key.clone();
            if !self.is_materialized(&key) {
                if self.awaiting_snapshot.insert(key.clone()) {
                    log::debug!("First operation for {key}; requesting its content");
                    report.snapshot_requests.push(key);
                }
                continue;
            }

            if let Resolution::Discard { superseded_by } = self.resolver.resolve(&op) {
                log::debug!("Operation {} on {key} superseded by {superseded_by}", op.id);
                report.discarded.push((op.id, superseded_by));
                continue;
            }

            let result = {
                let _scope = self.guard.applying();
                host.apply_edit(&key, op.range, &op.text).await
            };
            match result {
                Ok(()) => {
                    self.resolver.record(&op);
                    report.applied += 1;
                }
                Err(e) => {
                    let error = ApplyError {
                        document: key,
                        operation: op.id,
                        reason: e.to_string(),
                    };
                    log::warn!("{error}");
                    report.failed.push(error);
                }
            }
        }
        report
    }

    // ── local edits ─────────────────────────────────────────────

    /// Buffer a local edit. Edits to documents that are not shared (or not
    /// yet materialized) are ignored.
    pub fn record_local(&mut self, key: &DocumentKey, changes: Vec<TextChange>, now: Instant) -> bool {
        if !self.is_materialized(key) {
            return false;
        }
        self.pending.push(key, changes, now, self.debounce);
        true
    }

    pub fn flush_deadline(&self) -> Option<Instant> {
        self.pending.deadline
    }

    pub fn has_pending_local(&self) -> bool {
        !self.pending.changes.is_empty()
    }

    /// Turn buffered edits into operations, oldest first.
    pub fn flush_local(&mut self, origin: &UserId) -> Vec<DocumentOperation> {
        self.pending
            .take()
            .into_iter()
            .filter(|(key, _)| self.shared.contains_key(key))
            .map(|(key, change)| {
                let op = DocumentOperation::new(
                    key,
                    change.range,
                    change.text,
                    change.replaced_len,
                    self.clock.tick(),
                    origin.clone(),
                );
                self.seen.insert(op.id);
                self.resolver.record(&op);
                op
            })
            .collect()
    }

    /// Keep an operation that could not be sent. Returns false if the
    /// offline queue is full.
    pub fn hold_offline(&mut self, op: DocumentOperation) -> bool {
        self.offline.enqueue(op)
    }

    /// Operations held while disconnected, oldest first.
    pub fn take_offline(&mut self) -> Vec<DocumentOperation> {
        self.offline.drain()
    }

    pub fn offline_len(&self) -> usize {
        self.offline.len()
    }

    /// Forget everything. Used on teardown.
    pub fn reset(&mut self) {
        self.shared.clear();
        self.queue.clear();
        self.seen.clear();
        self.resolver.reset();
        self.awaiting_snapshot.clear();
        self.pending.clear();
        self.offline.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::resolver::{ArrivalOrder, LastTimestampWins};
    use liveshare_core::{Position, TextRange};

    fn key() -> DocumentKey {
        DocumentKey::new("file:///a.py")
    }

    fn engine() -> DocumentSync {
        DocumentSync::new(
            Box::new(LastTimestampWins::new()),
            16,
            Duration::from_millis(50),
            EchoGuard::new(),
        )
    }

    fn insert_at(col: u32, text: &str, origin: &str, ts: u64) -> DocumentOperation {
        DocumentOperation::new(
            key(),
            TextRange::caret(Position::new(0, col)),
            text,
            0,
            ts,
            UserId::new(origin),
        )
    }

    fn replace_hello(text: &str, origin: &str, ts: u64) -> DocumentOperation {
        DocumentOperation::new(
            key(),
            TextRange::new(Position::new(0, 0), Position::new(0, 5)),
            text,
            5,
            ts,
            UserId::new(origin),
        )
    }

    async fn shared_engine(host: &MemoryHost, content: &str) -> DocumentSync {
        let mut sync = engine();
        sync.register(&key(), Some("a.py"));
        sync.materialize(host, &key(), None, content, None).await.unwrap();
        sync
    }

    #[test]
    fn test_seen_operations_bounded() {
        let mut seen = SeenOperations::new(2);
        let (a, b, c) = (OperationId::new(), OperationId::new(), OperationId::new());
        assert!(seen.insert(a));
        assert!(!seen.insert(a));
        assert!(seen.insert(b));
        assert!(seen.insert(c));
        assert_eq!(seen.len(), 2);
        assert!(!seen.contains(&a));
        assert!(seen.contains(&c));
    }

    #[test]
    fn test_clock_is_strictly_increasing() {
        let mut clock = OperationClock::default();
        let stamps: Vec<u64> = (0..100).map(|_| clock.tick()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_share_rejects_large_documents() {
        let mut sync = engine();
        let big = "x".repeat(MAX_DOCUMENT_BYTES + 1);
        assert!(matches!(
            sync.share(&key(), "a.py", &big, None),
            Err(ValidationError::DocumentTooLarge { .. })
        ));
        assert!(!sync.is_shared(&key()));

        let message = sync.share(&key(), "a.py", "print(1)", Some("python")).unwrap();
        assert_eq!(message.type_name(), "shareFile");
        assert!(sync.is_materialized(&key()));
    }

    #[tokio::test]
    async fn test_operations_apply_in_arrival_order() {
        let host = MemoryHost::new();
        let mut sync = shared_engine(&host, "").await;

        sync.enqueue(insert_at(0, "A", "b", 1));
        sync.enqueue(insert_at(1, "B", "b", 2));
        sync.enqueue(insert_at(2, "C", "b", 3));
        let report = sync.drain(&host).await;

        assert_eq!(report.applied, 3);
        assert_eq!(host.text(&key()).as_deref(), Some("ABC"));
    }

    #[tokio::test]
    async fn test_duplicate_operation_applied_once() {
        let host = MemoryHost::new();
        let mut sync = shared_engine(&host, "").await;
        let op = insert_at(0, "x", "b", 1);

        assert_eq!(sync.enqueue(op.clone()), Enqueued::Queued);
        assert_eq!(sync.enqueue(op.clone()), Enqueued::Duplicate);
        sync.drain(&host).await;
        assert_eq!(sync.enqueue(op), Enqueued::Duplicate);
        sync.drain(&host).await;

        assert_eq!(host.text(&key()).as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_conflicting_operations_converge() {
        let o1 = replace_hello("HELLO", "a", 100);
        let o2 = replace_hello("howdy", "b", 200);

        for order in [[&o1, &o2], [&o2, &o1]] {
            let host = MemoryHost::new();
            let mut sync = shared_engine(&host, "hello world").await;
            for op in order {
                sync.enqueue(op.clone());
            }
            sync.drain(&host).await;
            assert_eq!(host.text(&key()).as_deref(), Some("howdy world"));
        }
    }

    #[tokio::test]
    async fn test_arrival_order_resolver() {
        let host = MemoryHost::new();
        let mut sync = DocumentSync::new(Box::new(ArrivalOrder), 16, Duration::ZERO, EchoGuard::new());
        sync.materialize(&host, &key(), Some("a.py"), "hello world", None).await.unwrap();
        sync.enqueue(replace_hello("howdy", "b", 200));
        sync.enqueue(replace_hello("HELLO", "a", 100));
        sync.drain(&host).await;
        assert_eq!(host.text(&key()).as_deref(), Some("HELLO world"));
        assert_eq!(sync.resolver_name(), "arrival-order");
    }

    #[tokio::test]
    async fn test_failed_operation_does_not_stop_queue() {
        let host = MemoryHost::new();
        let mut sync = shared_engine(&host, "ab").await;
        sync.enqueue(insert_at(10, "bad", "b", 1));
        sync.enqueue(insert_at(2, "c", "b", 2));
        let report = sync.drain(&host).await;

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].reason.contains("out of bounds"));
        assert_eq!(report.applied, 1);
        assert_eq!(host.text(&key()).as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_reversed_range_fails_alone() {
        let host = MemoryHost::new();
        let mut sync = shared_engine(&host, "hello world").await;
        let mut bad = insert_at(0, "", "b", 1);
        bad.range = TextRange {
            start: Position::new(0, 4),
            end: Position::new(0, 1),
        };
        sync.enqueue(bad);
        sync.enqueue(insert_at(11, "!", "b", 2));
        let report = sync.drain(&host).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.applied, 1);
        assert_eq!(host.text(&key()).as_deref(), Some("hello world!"));
    }

    #[tokio::test]
    async fn test_reversed_range_from_the_wire_is_normalized() {
        use crate::protocol::{Frame, Message};

        let host = MemoryHost::new();
        let mut sync = shared_engine(&host, "hello world").await;
        let raw = serde_json::json!({
            "type": "documentOperation",
            "userId": "peer",
            "uri": "file:///a.py",
            "operation": {
                "kind": "delete",
                "range": { "start": { "line": 0, "character": 4 },
                           "end": { "line": 0, "character": 1 } },
                "text": "",
                "timestamp": 5,
                "operationId": "67e55044-10b1-426f-9247-bb680e5fe0c8"
            }
        });
        let op = match Frame::decode(&raw.to_string()).unwrap().message {
            Message::DocumentOperation { uri, operation } => {
                operation.into_operation(uri, UserId::new("peer"))
            }
            other => panic!("Expected DocumentOperation, got {other:?}"),
        };
        sync.enqueue(op);
        let report = sync.drain(&host).await;

        assert!(report.failed.is_empty());
        assert_eq!(host.text(&key()).as_deref(), Some("ho world"));
    }

    #[tokio::test]
    async fn test_unmaterialized_document_requests_snapshot_once() {
        let host = MemoryHost::new();
        let mut sync = engine();
        sync.enqueue(insert_at(0, "x", "b", 1));
        sync.enqueue(insert_at(1, "y", "b", 2));
        let report = sync.drain(&host).await;

        assert_eq!(report.snapshot_requests, vec![key()]);
        assert_eq!(report.applied, 0);
        assert_eq!(host.text(&key()), None);

        // The snapshot arrives with both edits folded in.
        sync.materialize(&host, &key(), None, "xy", None).await.unwrap();
        sync.enqueue(insert_at(2, "z", "b", 3));
        let report = sync.drain(&host).await;
        assert!(report.snapshot_requests.is_empty());
        assert_eq!(host.text(&key()).as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_local_edits_batch_until_flushed() {
        let host = MemoryHost::new();
        let mut sync = shared_engine(&host, "").await;
        let now = Instant::now();
        let change = |text: &str, col| TextChange {
            range: TextRange::caret(Position::new(0, col)),
            replaced_len: 0,
            text: text.to_string(),
        };

        assert!(sync.record_local(&key(), vec![change("a", 0)], now));
        assert!(sync.record_local(&key(), vec![change("b", 1)], now + Duration::from_millis(30)));
        assert_eq!(sync.flush_deadline(), Some(now + Duration::from_millis(80)));
        assert!(!sync.record_local(&DocumentKey::new("unshared"), vec![change("x", 0)], now));

        let me = UserId::new("me");
        let ops = sync.flush_local(&me);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].text, "a");
        assert!(ops[0].timestamp < ops[1].timestamp);
        assert!(ops.iter().all(|op| op.origin == me));
        assert_eq!(sync.flush_deadline(), None);

        // Our own ops echoed back are duplicates.
        assert_eq!(sync.enqueue(ops[0].clone()), Enqueued::Duplicate);
    }

    #[tokio::test]
    async fn test_remote_apply_does_not_echo() {
        let host = MemoryHost::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let guard = EchoGuard::new();
        host.attach(crate::host::ChangeSink::new(tx, guard.clone()));
        let mut sync = DocumentSync::new(Box::new(LastTimestampWins::new()), 16, Duration::ZERO, guard);
        sync.materialize(&host, &key(), Some("a.py"), "", None).await.unwrap();

        sync.enqueue(insert_at(0, "remote", "b", 1));
        sync.drain(&host).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(host.text(&key()).as_deref(), Some("remote"));
    }

    #[tokio::test]
    async fn test_unshare_drops_queued_work() {
        let host = MemoryHost::new();
        let mut sync = shared_engine(&host, "").await;
        sync.enqueue(insert_at(0, "x", "b", 1));
        let message = sync.unshare(&key()).unwrap();
        assert_eq!(message.type_name(), "unshareFile");
        assert_eq!(sync.queued(), 0);
        assert!(sync.unshare(&key()).is_none());
    }

    #[tokio::test]
    async fn test_request_missing_marks_requested() {
        let mut sync = engine();
        sync.register(&key(), None);
        assert_eq!(sync.request_missing(), vec![key()]);
        assert!(sync.request_missing().is_empty());
        assert_eq!(sync.document(&key()).unwrap().filename, "a.py");
    }

    #[tokio::test]
    async fn test_lost_snapshot_request_is_sent_again() {
        let host = MemoryHost::new();
        let mut sync = engine();
        sync.register(&key(), None);
        assert_eq!(sync.request_missing(), vec![key()]);

        // The connection dropped before fileContent came back.
        sync.retry_snapshot_requests();
        assert_eq!(sync.request_missing(), vec![key()]);

        sync.retry_snapshot_requests();
        sync.enqueue(insert_at(0, "x", "b", 1));
        let report = sync.drain(&host).await;
        assert_eq!(report.snapshot_requests, vec![key()]);
    }

    #[test]
    fn test_offline_queue_bounded() {
        let mut queue = OfflineQueue::new(2);
        assert!(queue.enqueue(insert_at(0, "a", "me", 1)));
        assert!(queue.enqueue(insert_at(1, "b", "me", 2)));
        assert!(!queue.enqueue(insert_at(2, "c", "me", 3)));
        let held: Vec<String> = queue.drain().into_iter().map(|op| op.text).collect();
        assert_eq!(held, ["a", "b"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_offline_operations_kept_until_taken() {
        let host = MemoryHost::new();
        let mut sync = shared_engine(&host, "").await;
        assert!(sync.hold_offline(insert_at(0, "a", "me", 1)));
        assert_eq!(sync.offline_len(), 1);
        assert_eq!(sync.take_offline().len(), 1);
        assert_eq!(sync.offline_len(), 0);

        sync.hold_offline(insert_at(0, "a", "me", 2));
        sync.unshare(&key());
        assert_eq!(sync.offline_len(), 0);
    }
}
