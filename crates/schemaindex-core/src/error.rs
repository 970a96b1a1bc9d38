//! Error types for the schemaindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed event in {digest}: {reason}")]
    Malformed { digest: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the error is a transient ledger fetch failure.
    ///
    /// Transient errors are retried by the sync loop with the same cursor;
    /// everything else is fatal for the current iteration.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` if the error came from the storage backend.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
