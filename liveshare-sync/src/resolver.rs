//! Conflict policies for remote operations.
//!
//! The relay forwards operations without transforming them, so two edits to
//! the same region can reach participants in different orders. A
//! [`ConflictResolver`] decides, per incoming operation, whether it is
//! applied. Operations that are applied (and local ones that were sent)
//! are recorded so later arrivals can be judged against them.
//!
//! This is a deterministic tie-break, not convergence: concurrent edits to
//! disjoint regions whose positions shift each other can still diverge.

use std::collections::{HashMap, VecDeque};

use liveshare_core::{DocumentKey, DocumentOperation, OperationId};

/// How many recent operations per document are kept for comparison.
pub const HISTORY_PER_DOCUMENT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Apply,
    /// Dropped because a conflicting operation with higher precedence
    /// has already been applied.
    Discard { superseded_by: OperationId },
}

pub trait ConflictResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&mut self, incoming: &DocumentOperation) -> Resolution;

    /// Remember an operation that is now part of the local document.
    fn record(&mut self, applied: &DocumentOperation);

    fn forget(&mut self, key: &DocumentKey);

    fn reset(&mut self);
}

/// Larger `(timestamp, id)` wins among operations from different origins
/// whose ranges touch.
#[derive(Debug, Default)]
pub struct LastTimestampWins {
    history: HashMap<DocumentKey, VecDeque<DocumentOperation>>,
}

impl LastTimestampWins {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConflictResolver for LastTimestampWins {
    fn name(&self) -> &'static str {
        "last-timestamp-wins"
    }

    fn resolve(&mut self, incoming: &DocumentOperation) -> Resolution {
        let Some(history) = self.history.get(&incoming.document_key) else {
            return Resolution::Apply;
        };
        let winner = history
            .iter()
            .filter(|prior| prior.origin != incoming.origin)
            .filter(|prior| prior.range.touches(&incoming.range))
            .filter(|prior| prior.precedence() > incoming.precedence())
            .max_by_key(|prior| prior.precedence());

        match winner {
            Some(prior) => Resolution::Discard {
                superseded_by: prior.id,
            },
            None => Resolution::Apply,
        }
    }

    fn record(&mut self, applied: &DocumentOperation) {
        let history = self
            .history
            .entry(applied.document_key.clone())
            .or_default();
        if history.len() >= HISTORY_PER_DOCUMENT {
            history.pop_front();
        }
        history.push_back(applied.clone());
    }

    fn forget(&mut self, key: &DocumentKey) {
        self.history.remove(key);
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}

/// Apply everything in arrival order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrivalOrder;

impl ConflictResolver for ArrivalOrder {
    fn name(&self) -> &'static str {
        "arrival-order"
    }

    fn resolve(&mut self, _incoming: &DocumentOperation) -> Resolution {
        Resolution::Apply
    }

    fn record(&mut self, _applied: &DocumentOperation) {}

    fn forget(&mut self, _key: &DocumentKey) {}

    fn reset(&mut self) {}
}
