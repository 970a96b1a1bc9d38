//! Indexer configuration and state types.

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::event::EventTypeFilter;
use crate::progress::ProgressReport;

/// Default poll interval against a remote RPC endpoint.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Default poll interval against a local node.
pub const LOCAL_POLL_INTERVAL_MS: u64 = 100;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used as the cursor key).
    pub id: String,
    /// Schema object whose transactions are ingested.
    pub tracked_object: String,
    /// Maximum transactions per page request.
    pub page_size: usize,
    /// Wait between iterations (milliseconds).
    pub poll_interval_ms: u64,
    /// Wall-clock interval between progress samples (seconds).
    pub progress_interval_secs: u64,
    /// Events outside this filter are never classified. Empty accepts all.
    #[serde(default)]
    pub event_filter: EventTypeFilter,
    /// Transactions below this checkpoint are skipped on a fresh start.
    #[serde(default)]
    pub start_checkpoint: Option<u64>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            tracked_object: String::new(),
            page_size: 50,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            progress_interval_secs: 10,
            event_filter: EventTypeFilter::default(),
            start_checkpoint: None,
        }
    }
}

/// Poll interval to use for a given RPC URL.
pub fn default_poll_interval_ms(rpc_url: &str) -> u64 {
    if rpc_url.contains("localhost") || rpc_url.contains("127.0.0.1") {
        LOCAL_POLL_INTERVAL_MS
    } else {
        DEFAULT_POLL_INTERVAL_MS
    }
}

/// State of the sync loop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Between iterations.
    Idle,
    /// Waiting on the ledger for the next page.
    Fetching,
    /// Committing a classified page.
    Reconciling,
    /// Pushing committed changes to subscribers.
    Notifying,
    /// Cancellation observed; finishing up.
    Stopping,
    /// Terminated.
    Stopped,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Fetching => write!(f, "fetching"),
            Self::Reconciling => write!(f, "reconciling"),
            Self::Notifying => write!(f, "notifying"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot published by the sync loop after every state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub cursor: Option<Cursor>,
    pub progress: Option<ProgressReport>,
    pub pages: u64,
    pub transactions: u64,
    pub domain_events: u64,
    pub state_changes: u64,
    pub skipped_events: u64,
    /// Fetch failures since the last successful fetch.
    pub consecutive_fetch_failures: u64,
    /// Total fetch failures since start.
    pub fetch_failures: u64,
    /// `true` once the loop has reached the ledger head.
    pub caught_up: bool,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            cursor: None,
            progress: None,
            pages: 0,
            transactions: 0,
            domain_events: 0,
            state_changes: 0,
            skipped_events: 0,
            consecutive_fetch_failures: 0,
            fetch_failures: 0,
            caught_up: false,
        }
    }
}

impl SyncStatus {
    /// Checkpoint of the last committed transaction.
    pub fn checkpoint(&self) -> Option<u64> {
        self.cursor.as_ref().map(|c| c.checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_depends_on_endpoint() {
        assert_eq!(default_poll_interval_ms("http://127.0.0.1:9000"), 100);
        assert_eq!(default_poll_interval_ms("http://localhost:9000"), 100);
        assert_eq!(
            default_poll_interval_ms("https://fullnode.mainnet.sui.io:443"),
            1_000
        );
    }

    #[test]
    fn state_display() {
        assert_eq!(SyncState::Reconciling.to_string(), "reconciling");
        assert_eq!(SyncState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn status_checkpoint() {
        let mut status = SyncStatus::default();
        assert_eq!(status.checkpoint(), None);
        status.cursor = Some(Cursor::new("D", 42));
        assert_eq!(status.checkpoint(), Some(42));
    }
}
