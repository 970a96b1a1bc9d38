//! Fluent builder API for creating Sui schema indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use schemaindex_sui::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .id("dubhe")
//!     .tracked_object("0x8d1c…")
//!     .page_size(50)
//!     .rpc_url("http://127.0.0.1:9000")
//!     .build_config();
//! ```

use std::sync::Arc;

use schemaindex_core::error::IndexerError;
use schemaindex_core::event::EventTypeFilter;
use schemaindex_core::indexer::{default_poll_interval_ms, IndexerConfig};
use schemaindex_core::ledger::LedgerClient;
use schemaindex_core::store::BatchStore;

use crate::fetcher::{HttpSuiClient, SuiFetcher};
use crate::index_loop::SyncLoop;
use crate::rpc::HttpTransport;

/// Fluent builder for [`IndexerConfig`] and [`SyncLoop`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    rpc_url: Option<String>,
    poll_interval_set: bool,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the indexer ID (used as the cursor key).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the schema object whose transactions are indexed.
    pub fn tracked_object(mut self, object_id: impl Into<String>) -> Self {
        self.config.tracked_object = object_id.into();
        self
    }

    /// Set the number of transactions per page request.
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the polling interval in milliseconds.
    ///
    /// Overrides the default derived from [`rpc_url`](Self::rpc_url).
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self.poll_interval_set = true;
        self
    }

    /// Set the progress sampling interval in seconds.
    pub fn progress_interval_secs(mut self, secs: u64) -> Self {
        self.config.progress_interval_secs = secs;
        self
    }

    /// Only classify events whose type matches `filter`.
    pub fn event_filter(mut self, filter: EventTypeFilter) -> Self {
        self.config.event_filter = filter;
        self
    }

    /// Skip transactions below `checkpoint` when no cursor is stored.
    pub fn start_checkpoint(mut self, checkpoint: u64) -> Self {
        self.config.start_checkpoint = Some(checkpoint);
        self
    }

    /// Set the JSON-RPC endpoint. A local endpoint polls faster by default.
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if !self.poll_interval_set {
            self.config.poll_interval_ms = default_poll_interval_ms(&url);
        }
        self.rpc_url = Some(url);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    fn validate(&self) -> Result<(), IndexerError> {
        if self.config.tracked_object.is_empty() {
            return Err(IndexerError::Config("tracked_object is required".into()));
        }
        if self.config.page_size == 0 {
            return Err(IndexerError::Config("page_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Build a sync loop over any ledger client.
    pub fn build<L: LedgerClient>(
        self,
        ledger: L,
        store: Arc<dyn BatchStore>,
    ) -> Result<SyncLoop<L>, IndexerError> {
        self.validate()?;
        Ok(SyncLoop::new(self.config, ledger, store))
    }

    /// Build a sync loop against the configured HTTP JSON-RPC endpoint.
    pub fn build_http(
        self,
        store: Arc<dyn BatchStore>,
    ) -> Result<SyncLoop<SuiFetcher<HttpSuiClient>>, IndexerError> {
        let url = self
            .rpc_url
            .clone()
            .ok_or_else(|| IndexerError::Config("rpc_url is required".into()))?;
        let transport = HttpTransport::default_for(url)?;
        self.build(SuiFetcher::new(HttpSuiClient::new(transport)), store)
    }
}
