//! YAML configuration for the `schemaindex` binary.
//!
//! ```yaml
//! ledger:
//!   rpc_url: https://fullnode.testnet.sui.io:443
//!   tracked_object: "0x1f3c…"
//!   start_checkpoint: 1200000
//!   event_filter:
//!     packages: ["0x8d1c…"]
//!     type_names: [Dubhe_Store_SetRecord, Dubhe_Store_SetField, Dubhe_Store_DeleteRecord]
//! storage:
//!   backend: sqlite
//!   url: ./schemaindex.db
//! subscriptions:
//!   bind: 0.0.0.0:8080
//! logging:
//!   level: info
//!   components:
//!     schemaindex-sui: debug
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use schemaindex_core::event::EventTypeFilter;
use schemaindex_sui::IndexerBuilder;

use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Indexer id, used as the cursor key.
    #[serde(default = "default_id")]
    pub id: String,
    pub rpc_url: String,
    /// Schema object whose transactions are indexed.
    pub tracked_object: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Defaults to 100 ms for a local node and 1000 ms otherwise.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
    /// Only events of these packages / struct names are indexed.
    #[serde(default)]
    pub event_filter: EventTypeFilter,
    #[serde(default)]
    pub start_checkpoint: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            rpc_url: "http://127.0.0.1:9000".into(),
            tracked_object: String::new(),
            page_size: default_page_size(),
            poll_interval_ms: None,
            progress_interval_secs: default_progress_interval(),
            event_filter: EventTypeFilter::default(),
            start_checkpoint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// File path / `sqlite:` URL, or `postgresql://` URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ws_bind")]
    pub bind: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Per-connection outbound queue length.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_ws_bind(),
            max_clients: default_max_clients(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_http_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_http_bind(),
        }
    }
}

fn default_id() -> String {
    "default".into()
}
fn default_page_size() -> usize {
    50
}
fn default_progress_interval() -> u64 {
    10
}
fn default_max_connections() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_ws_bind() -> String {
    "0.0.0.0:8080".into()
}
fn default_max_clients() -> usize {
    1_000
}
fn default_channel_capacity() -> usize {
    256
}
fn default_http_bind() -> String {
    "0.0.0.0:9184".into()
}

impl AppConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply command-line overrides.
    pub fn apply_overrides(&mut self, rpc_url: Option<String>, database_url: Option<String>) {
        if let Some(url) = rpc_url {
            self.ledger.rpc_url = url;
        }
        if let Some(url) = database_url {
            if self.storage.backend == StorageBackend::Memory {
                self.storage.backend = if url.starts_with("postgres") {
                    StorageBackend::Postgres
                } else {
                    StorageBackend::Sqlite
                };
            }
            self.storage.url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.rpc_url.is_empty() {
            bail!("ledger.rpc_url must not be empty");
        }
        if self.ledger.tracked_object.is_empty() {
            bail!("ledger.tracked_object must not be empty");
        }
        if self.ledger.page_size == 0 {
            bail!("ledger.page_size must be greater than zero");
        }
        if self.storage.backend != StorageBackend::Memory && self.storage.url.is_none() {
            bail!("storage.url is required for the {:?} backend", self.storage.backend);
        }
        if self.subscriptions.channel_capacity == 0 {
            bail!("subscriptions.channel_capacity must be greater than zero");
        }
        Ok(())
    }

    /// Indexer builder seeded from the `ledger` section.
    pub fn indexer_builder(&self) -> IndexerBuilder {
        let ledger = &self.ledger;
        let mut builder = IndexerBuilder::new()
            .id(ledger.id.clone())
            .tracked_object(ledger.tracked_object.clone())
            .page_size(ledger.page_size)
            .progress_interval_secs(ledger.progress_interval_secs)
            .event_filter(ledger.event_filter.clone())
            .rpc_url(ledger.rpc_url.clone());
        if let Some(ms) = ledger.poll_interval_ms {
            builder = builder.poll_interval_ms(ms);
        }
        if let Some(checkpoint) = ledger.start_checkpoint {
            builder = builder.start_checkpoint(checkpoint);
        }
        builder
    }
}
