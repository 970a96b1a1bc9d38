//! Sync cursor — the resume point of the indexer.
//!
//! The cursor is the digest of the last transaction of the last committed
//! page, together with that transaction's checkpoint. It is persisted in the
//! same storage transaction as the page it points past, so a crash can never
//! leave the cursor ahead of (or behind) the materialized state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// The indexer's current position in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Digest of the last processed transaction; passed as the `after`
    /// argument of the next page request.
    pub digest: String,
    /// Checkpoint of the last processed transaction.
    pub checkpoint: u64,
}

impl Cursor {
    /// Create a new cursor at the given position.
    pub fn new(digest: impl Into<String>, checkpoint: u64) -> Self {
        Self {
            digest: digest.into(),
            checkpoint,
        }
    }

    /// Advance the cursor past another transaction.
    pub fn advance(&mut self, digest: impl Into<String>, checkpoint: u64) {
        self.digest = digest.into();
        self.checkpoint = checkpoint;
    }

    /// Returns `true` if `checkpoint` lies behind this cursor.
    ///
    /// Used to flag pages the ledger serves from before the resume point.
    pub fn is_behind(&self, checkpoint: u64) -> bool {
        checkpoint < self.checkpoint
    }
}

/// A persisted cursor row, keyed by indexer id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCursor {
    /// Unique indexer identifier.
    pub indexer_id: String,
    /// The resume position.
    pub cursor: Cursor,
    /// Unix timestamp (ms) of when this cursor was written.
    pub updated_at: i64,
}

/// Trait for storing and loading cursors.
///
/// Implemented by every storage backend. Backends also advance the cursor
/// as part of [`crate::store::BatchStore::commit_batch`]; `save` exists for
/// operator tooling (seeding a start position).
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the cursor for an indexer (`None` before the first commit).
    async fn load_cursor(&self, indexer_id: &str) -> Result<Option<StoredCursor>, IndexerError>;

    /// Save (upsert) a cursor.
    async fn save_cursor(&self, indexer_id: &str, cursor: &Cursor) -> Result<(), IndexerError>;

    /// Delete a cursor (e.g. when resetting an indexer).
    async fn delete_cursor(&self, indexer_id: &str) -> Result<(), IndexerError>;
}
