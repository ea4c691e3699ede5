//! In-memory chain cursor for ingestion (no disk persistence).
//!
//! A restart begins uninitialized again, so the first head seen after start is recorded
//! without replaying its history.

/// Cursor: last chain height whose transactions were ingested. In-memory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    last_seen_block: Option<u64>,
}

impl Cursor {
    pub fn new(last_seen_block: u64) -> Self {
        Self {
            last_seen_block: Some(last_seen_block),
        }
    }

    pub fn last_seen_block(&self) -> Option<u64> {
        self.last_seen_block
    }

    pub fn is_initialized(&self) -> bool {
        self.last_seen_block.is_some()
    }

    /// Moves forward to `block`; never moves backwards.
    pub fn advance_to(&mut self, block: u64) {
        self.last_seen_block = Some(self.last_seen_block.map_or(block, |b| b.max(block)));
    }
}
