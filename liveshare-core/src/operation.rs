//! The unit of document synchronization.

use serde::{Deserialize, Serialize};

use crate::{DocumentKey, OperationId, TextRange, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Delete,
    Replace,
}

impl OperationKind {
    /// Classify an editor change by what it inserts and how much it replaces.
    ///
    /// Inserted text over nothing is an insert, no inserted text is a delete,
    /// anything else replaces.
    pub fn classify(inserted: &str, replaced_len: usize) -> Self {
        match (inserted.is_empty(), replaced_len) {
            (false, 0) => OperationKind::Insert,
            (true, _) => OperationKind::Delete,
            (false, _) => OperationKind::Replace,
        }
    }
}

/// One insert/delete/replace edit against a shared document.
///
/// Immutable once created. `timestamp` is the origin's logical clock
/// (wall-clock millis, forced monotonic per origin) and `id` is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOperation {
    pub kind: OperationKind,
    pub document_key: DocumentKey,
    pub range: TextRange,
    /// Payload for insert/replace; empty for delete.
    pub text: String,
    pub timestamp: u64,
    pub origin: UserId,
    pub id: OperationId,
}

impl DocumentOperation {
    pub fn new(
        document_key: DocumentKey,
        range: TextRange,
        text: impl Into<String>,
        replaced_len: usize,
        timestamp: u64,
        origin: UserId,
    ) -> Self {
        let text = text.into();
        let kind = OperationKind::classify(&text, replaced_len);
        let text = if kind == OperationKind::Delete { String::new() } else { text };
        Self {
            kind,
            document_key,
            range,
            text,
            timestamp,
            origin,
            id: OperationId::new(),
        }
    }

    /// Ordering key used for "larger timestamp wins": timestamp first, id
    /// second so ties still resolve the same way on every receiver.
    pub fn precedence(&self) -> (u64, OperationId) {
        (self.timestamp, self.id)
    }
}
