//! Storage traits implemented by every backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, CursorStore};
use crate::error::IndexerError;
use crate::event::ClassifiedBatch;
use crate::types::{DomainEventRecord, StateKey, StateRecord};

/// Row counts written by one [`BatchStore::commit_batch`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub transactions: usize,
    pub domain_events: usize,
    /// State sets after in-batch dedup.
    pub state_sets: usize,
    pub state_removes: usize,
    /// Cursor persisted with the batch.
    pub cursor: Option<Cursor>,
}

/// A backend that can reconcile a classified page atomically.
///
/// `commit_batch` runs, inside one storage transaction:
/// 1. insert transaction records
/// 2. insert domain event records
/// 3. plan state changes with [`plan_state_changes`](crate::dedup::plan_state_changes):
///    per key the newest set by (checkpoint, arrival), plus a remove only if
///    it outranks that set
/// 4. upsert sets where the stored checkpoint is strictly older
/// 5. tombstone the planned removes where the stored checkpoint is `<=`
/// 6. upsert the cursor
///
/// Either everything is visible afterwards or nothing is.
#[async_trait]
pub trait BatchStore: CursorStore {
    async fn commit_batch(
        &self,
        indexer_id: &str,
        batch: &ClassifiedBatch,
    ) -> Result<CommitSummary, IndexerError>;
}

/// Table sizes, used by `status` and `/metrics`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub transactions: u64,
    pub domain_events: u64,
    pub state_records: u64,
    /// State rows that are not tombstoned.
    pub live_state_records: u64,
}

/// Read access to the materialized tables.
#[async_trait]
pub trait StateQuery: Send + Sync {
    /// Look up one row by its logical key (tombstones included).
    async fn get_state(&self, key: &StateKey) -> Result<Option<StateRecord>, IndexerError>;

    /// Live rows of one table ordered by id, starting after `after_id`.
    async fn list_states(
        &self,
        name: &str,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StateRecord>, IndexerError>;

    /// Live rows of one table whose `value.<field>` equals `expected`.
    ///
    /// String fields compare verbatim, numbers compare by their decimal text.
    async fn states_by_value_field(
        &self,
        name: &str,
        field: &str,
        expected: &str,
    ) -> Result<Vec<StateRecord>, IndexerError>;

    /// Most recent domain events with the given (stripped) name, newest first.
    async fn domain_events(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<DomainEventRecord>, IndexerError>;

    async fn counts(&self) -> Result<StoreCounts, IndexerError>;

    /// Delete every row of every table, cursors included.
    async fn clear_all(&self) -> Result<(), IndexerError>;
}
