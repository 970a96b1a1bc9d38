//! Shared types for the indexing pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Ledger input ─────────────────────────────────────────────────────────────

/// Which transactions the ledger client should return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionFilter {
    /// Transactions that changed (mutated, created, wrapped…) the given object.
    ChangedObject(String),
}

impl TransactionFilter {
    /// Filter for transactions touching the schema object `id`.
    pub fn changed_object(id: impl Into<String>) -> Self {
        Self::ChangedObject(id.into())
    }
}

/// A single Move call inside a programmable transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveCall {
    pub package: String,
    pub module: String,
    pub function: String,
    /// Call arguments with input references resolved.
    pub arguments: Value,
}

/// An event emitted by a transaction, as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Fully qualified Move event type (`0x…::module::Name`).
    pub event_type: String,
    /// Address that emitted the event.
    pub sender: String,
    /// Decoded event payload.
    pub payload: Value,
}

/// One transaction of a fetched page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Content-addressed transaction id.
    pub digest: String,
    /// Checkpoint the transaction was included in.
    pub checkpoint: u64,
    /// Ledger timestamp in milliseconds since epoch.
    pub timestamp_ms: u64,
    pub sender: String,
    pub calls: Vec<MoveCall>,
    pub events: Vec<RawEvent>,
}

// ─── Stored records ───────────────────────────────────────────────────────────

/// One row of the append-only transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub sender: String,
    pub checkpoint: u64,
    pub digest: String,
    pub package: String,
    pub module: String,
    pub function: String,
    pub arguments: Value,
    /// Resume cursor this row corresponds to (the transaction digest).
    pub cursor: String,
    /// Ingestion timestamp (ms).
    pub created_at: i64,
}

/// One row of the append-only domain event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEventRecord {
    pub sender: String,
    pub checkpoint: u64,
    pub digest: String,
    /// Event name with the `_event` marker stripped.
    pub name: String,
    /// Event name exactly as emitted.
    pub raw_name: String,
    pub value: Value,
    pub created_at: i64,
}

/// Composite logical key of a schema table row.
///
/// `None` keys compare equal to `None`, so a table with zero or one key
/// column still has exactly one row per logical key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub name: String,
    pub key1: Option<String>,
    pub key2: Option<String>,
}

impl StateKey {
    pub fn new(name: impl Into<String>, key1: Option<String>, key2: Option<String>) -> Self {
        Self {
            name: name.into(),
            key1,
            key2,
        }
    }

    /// Key of a singleton table (no key columns).
    pub fn singleton(name: impl Into<String>) -> Self {
        Self::new(name, None, None)
    }
}

/// A state mutation extracted from a page, before reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub key: StateKey,
    /// New value for a set; `None` for a remove.
    pub value: Option<Value>,
    pub checkpoint: u64,
    pub digest: String,
    pub sender: String,
}

impl StateChange {
    /// Returns `true` if this change deletes the row.
    pub fn is_remove(&self) -> bool {
        self.value.is_none()
    }
}

/// The materialized projection of a schema table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: i64,
    pub name: String,
    pub key1: Option<String>,
    pub key2: Option<String>,
    pub value: Value,
    pub last_update_checkpoint: u64,
    pub last_update_digest: String,
    pub is_removed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StateRecord {
    /// The logical key of this row.
    pub fn key(&self) -> StateKey {
        StateKey::new(self.name.clone(), self.key1.clone(), self.key2.clone())
    }
}

/// Current wall-clock time in milliseconds, used for `created_at`/`updated_at`.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
