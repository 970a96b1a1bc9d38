//! schemaindex-core — foundation for the Sui schema-table indexer.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → SyncLoop
//!                      ├── LedgerClient         (page fetch, head checkpoint)
//!                      ├── classify_page        (DomainEvent / StateSet / StateRemove)
//!                      ├── BatchStore           (atomic reconcile + cursor)
//!                      ├── ProgressEstimator    (rate, ETA)
//!                      └── SubscriptionRegistry (live fan-out)
//! ```

pub mod cursor;
pub mod dedup;
pub mod error;
pub mod event;
pub mod indexer;
pub mod ledger;
pub mod progress;
pub mod store;
pub mod subscription;
pub mod types;

pub use cursor::{Cursor, CursorStore, StoredCursor};
pub use dedup::{plan_state_changes, StatePlan};
pub use error::IndexerError;
pub use event::{classify_page, classify_page_with, ClassifiedBatch, EventTypeFilter, ParsedEvent};
pub use indexer::{IndexerConfig, SyncState, SyncStatus};
pub use ledger::LedgerClient;
pub use progress::{ProgressEstimator, ProgressReport};
pub use store::{BatchStore, CommitSummary, StateQuery, StoreCounts};
pub use subscription::{
    ConnectionId, FanoutStats, PushMessage, SubscriptionFilter, SubscriptionKind,
    SubscriptionRegistry,
};
pub use types::{
    DomainEventRecord, LedgerTransaction, MoveCall, RawEvent, StateChange, StateKey, StateRecord,
    TransactionFilter, TransactionRecord,
};
