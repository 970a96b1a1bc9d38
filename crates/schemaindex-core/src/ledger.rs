//! The ledger boundary.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{LedgerTransaction, TransactionFilter};

/// Source of transaction pages and the current chain head.
///
/// Implementations return transactions in ascending ledger order, each with
/// its events decoded. Any transport failure maps to [`IndexerError::Rpc`].
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch up to `limit` transactions matching `filter`, strictly after the
    /// transaction `after` (or from the beginning when `None`).
    async fn fetch_page(
        &self,
        filter: &TransactionFilter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LedgerTransaction>, IndexerError>;

    /// Latest checkpoint sequence number known to the ledger.
    async fn head_checkpoint(&self) -> Result<u64, IndexerError>;
}
