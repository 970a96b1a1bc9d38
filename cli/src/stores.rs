//! Storage backend selection.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use schemaindex_core::store::{BatchStore, StateQuery};
use schemaindex_storage::postgres::PostgresOptions;
use schemaindex_storage::{InMemoryStorage, PostgresStorage, SqliteStorage};

use crate::config::{StorageBackend, StorageConfig};

/// One backend seen through both the write and the read interface.
pub struct Stores {
    pub batch: Arc<dyn BatchStore>,
    pub query: Arc<dyn StateQuery>,
}

impl Stores {
    fn from_backend<S: BatchStore + StateQuery + 'static>(store: S) -> Self {
        let store = Arc::new(store);
        Self {
            batch: store.clone(),
            query: store,
        }
    }
}

pub async fn open(config: &StorageConfig) -> Result<Stores> {
    let url = || {
        config
            .url
            .as_deref()
            .with_context(|| format!("storage.url is required for the {:?} backend", config.backend))
    };
    let stores = match config.backend {
        StorageBackend::Memory => Stores::from_backend(InMemoryStorage::new()),
        StorageBackend::Sqlite => {
            let store = SqliteStorage::open_with(url()?, config.max_connections)
                .await
                .context("opening sqlite storage")?;
            Stores::from_backend(store)
        }
        StorageBackend::Postgres => {
            let opts = PostgresOptions {
                max_connections: config.max_connections,
                ..PostgresOptions::default()
            };
            let store = PostgresStorage::connect_with_options(url()?, opts)
                .await
                .context("connecting to postgres")?;
            Stores::from_backend(store)
        }
    };
    info!(backend = ?config.backend, "storage opened");
    Ok(stores)
}
