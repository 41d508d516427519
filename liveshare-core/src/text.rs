//! Positions and ranges in line/character coordinates.

use serde::{Deserialize, Serialize};

/// Zero-based line and character offset. Orders line-major.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open range `[start, end)`.
///
/// Ranges read off the wire go through [`TextRange::new`], so `start` never
/// comes after `end` once decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireRange")]
pub struct TextRange {
    pub start: Position,
    pub end: Position,
}

#[derive(Deserialize)]
struct WireRange {
    start: Position,
    end: Position,
}

impl From<WireRange> for TextRange {
    fn from(raw: WireRange) -> Self {
        TextRange::new(raw.start, raw.end)
    }
}

impl TextRange {
    /// Build a range, swapping the endpoints if they arrive reversed.
    pub fn new(start: Position, end: Position) -> Self {
        if end < start {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    /// Empty range at `pos` (an insertion point).
    pub const fn caret(pos: Position) -> Self {
        Self { start: pos, end: pos }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether two ranges overlap or touch.
    ///
    /// Touching counts: two insertions at the same caret compete for the
    /// same spot even though both ranges are empty.
    pub fn touches(&self, other: &TextRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}
