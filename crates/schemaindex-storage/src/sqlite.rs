//! SQLite storage backend for SchemaIndex.
//!
//! Persists the transaction log, domain event log, materialized schema
//! state and the sync cursor to a single SQLite file. Uses `sqlx` with WAL
//! mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use schemaindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./index.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use schemaindex_core::cursor::{Cursor, CursorStore, StoredCursor};
use schemaindex_core::dedup::plan_state_changes;
use schemaindex_core::error::IndexerError;
use schemaindex_core::event::ClassifiedBatch;
use schemaindex_core::store::{BatchStore, CommitSummary, StateQuery, StoreCounts};
use schemaindex_core::types::{now_ms, DomainEventRecord, StateKey, StateRecord};

use crate::INSERT_CHUNK;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed storage for schema state, logs and cursors.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite:./index.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        Self::open_with(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Open with an explicit pool size.
    pub async fn open_with(path: &str, max_connections: u32) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(&url)
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// The pool holds a single connection, since every connection to
    /// `sqlite::memory:` is a separate database. All data is lost when the
    /// pool is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        // WAL mode
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS transactions (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                sender     TEXT    NOT NULL,
                checkpoint INTEGER NOT NULL,
                digest     TEXT    NOT NULL,
                package    TEXT    NOT NULL,
                module     TEXT    NOT NULL,
                function   TEXT    NOT NULL,
                arguments  TEXT    NOT NULL,
                cursor     TEXT    NOT NULL,
                created_at INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS domain_events (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                sender     TEXT    NOT NULL,
                checkpoint INTEGER NOT NULL,
                digest     TEXT    NOT NULL,
                name       TEXT    NOT NULL,
                raw_name   TEXT    NOT NULL,
                value      TEXT    NOT NULL,
                created_at INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS state_records (
                id                     INTEGER PRIMARY KEY AUTOINCREMENT,
                name                   TEXT    NOT NULL,
                key1                   TEXT,
                key2                   TEXT,
                value                  TEXT    NOT NULL,
                last_update_checkpoint INTEGER NOT NULL,
                last_update_digest     TEXT    NOT NULL,
                is_removed             INTEGER NOT NULL DEFAULT 0,
                created_at             INTEGER NOT NULL,
                updated_at             INTEGER NOT NULL
            );",
            // NULL-safe uniqueness: a NULL key maps to a blob no TEXT key can equal
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_state_records_key
                ON state_records (name, IFNULL(key1, x'00'), IFNULL(key2, x'00'));",
            "CREATE TABLE IF NOT EXISTS sync_cursor (
                indexer_id TEXT    PRIMARY KEY,
                digest     TEXT    NOT NULL,
                checkpoint INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_transactions_checkpoint ON transactions (checkpoint);",
            "CREATE INDEX IF NOT EXISTS idx_domain_events_name ON domain_events (name);",
        ];
        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Number of rows in the transaction log for `digest`.
    pub async fn transaction_count_for(&self, digest: &str) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM transactions WHERE digest = ?")
            .bind(digest)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }
}

fn state_from_row(row: &SqliteRow) -> Result<StateRecord, IndexerError> {
    let value: String = row.get("value");
    Ok(StateRecord {
        id: row.get("id"),
        name: row.get("name"),
        key1: row.get("key1"),
        key2: row.get("key2"),
        value: serde_json::from_str(&value).map_err(storage_err)?,
        last_update_checkpoint: row.get::<i64, _>("last_update_checkpoint") as u64,
        last_update_digest: row.get("last_update_digest"),
        is_removed: row.get::<i64, _>("is_removed") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const STATE_COLUMNS: &str = "id, name, key1, key2, value, last_update_checkpoint, \
     last_update_digest, is_removed, created_at, updated_at";

// ─── CursorStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for SqliteStorage {
    async fn load_cursor(&self, indexer_id: &str) -> Result<Option<StoredCursor>, IndexerError> {
        let row = sqlx::query(
            "SELECT indexer_id, digest, checkpoint, updated_at
             FROM sync_cursor WHERE indexer_id = ?",
        )
        .bind(indexer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| StoredCursor {
            indexer_id: r.get("indexer_id"),
            cursor: Cursor::new(
                r.get::<String, _>("digest"),
                r.get::<i64, _>("checkpoint") as u64,
            ),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save_cursor(&self, indexer_id: &str, cursor: &Cursor) -> Result<(), IndexerError> {
        sqlx::query(UPSERT_CURSOR)
            .bind(indexer_id)
            .bind(&cursor.digest)
            .bind(cursor.checkpoint as i64)
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        debug!(indexer_id, checkpoint = cursor.checkpoint, "cursor saved");
        Ok(())
    }

    async fn delete_cursor(&self, indexer_id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM sync_cursor WHERE indexer_id = ?")
            .bind(indexer_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

const UPSERT_CURSOR: &str = "INSERT INTO sync_cursor (indexer_id, digest, checkpoint, updated_at)
     VALUES (?, ?, ?, ?)
     ON CONFLICT (indexer_id) DO UPDATE SET
        digest = excluded.digest,
        checkpoint = excluded.checkpoint,
        updated_at = excluded.updated_at";

// ─── BatchStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl BatchStore for SqliteStorage {
    async fn commit_batch(
        &self,
        indexer_id: &str,
        batch: &ClassifiedBatch,
    ) -> Result<CommitSummary, IndexerError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        // 1. transaction log
        for chunk in batch.transactions.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO transactions
                 (sender, checkpoint, digest, package, module, function, arguments, cursor, created_at) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(&r.sender)
                    .push_bind(r.checkpoint as i64)
                    .push_bind(&r.digest)
                    .push_bind(&r.package)
                    .push_bind(&r.module)
                    .push_bind(&r.function)
                    .push_bind(r.arguments.to_string())
                    .push_bind(&r.cursor)
                    .push_bind(r.created_at);
            });
            qb.build().execute(&mut *tx).await.map_err(storage_err)?;
        }

        // 2. domain event log
        for chunk in batch.domain_events.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO domain_events
                 (sender, checkpoint, digest, name, raw_name, value, created_at) ",
            );
            qb.push_values(chunk, |mut b, e| {
                b.push_bind(&e.sender)
                    .push_bind(e.checkpoint as i64)
                    .push_bind(&e.digest)
                    .push_bind(&e.name)
                    .push_bind(&e.raw_name)
                    .push_bind(e.value.to_string())
                    .push_bind(e.created_at);
            });
            qb.build().execute(&mut *tx).await.map_err(storage_err)?;
        }

        // 3-4. dedup, stage, update older rows, insert missing keys
        let plan = plan_state_changes(&batch.state_changes);
        let sets = &plan.sets;
        if !sets.is_empty() {
            sqlx::query(
                "CREATE TEMP TABLE IF NOT EXISTS state_stage (
                    name       TEXT    NOT NULL,
                    key1       TEXT,
                    key2       TEXT,
                    value      TEXT    NOT NULL,
                    checkpoint INTEGER NOT NULL,
                    digest     TEXT    NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
            sqlx::query("DELETE FROM state_stage")
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;

            for chunk in sets.chunks(INSERT_CHUNK) {
                let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                    "INSERT INTO state_stage (name, key1, key2, value, checkpoint, digest) ",
                );
                qb.push_values(chunk, |mut b, c| {
                    let value = c.value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "null".into());
                    b.push_bind(&c.key.name)
                        .push_bind(&c.key.key1)
                        .push_bind(&c.key.key2)
                        .push_bind(value)
                        .push_bind(c.checkpoint as i64)
                        .push_bind(&c.digest);
                });
                qb.build().execute(&mut *tx).await.map_err(storage_err)?;
            }

            sqlx::query(
                "UPDATE state_records SET
                    value = s.value,
                    last_update_checkpoint = s.checkpoint,
                    last_update_digest = s.digest,
                    is_removed = 0,
                    updated_at = ?
                 FROM state_stage s
                 WHERE state_records.name = s.name
                   AND state_records.key1 IS s.key1
                   AND state_records.key2 IS s.key2
                   AND state_records.last_update_checkpoint < s.checkpoint",
            )
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

            sqlx::query(
                "INSERT INTO state_records
                    (name, key1, key2, value, last_update_checkpoint, last_update_digest,
                     is_removed, created_at, updated_at)
                 SELECT s.name, s.key1, s.key2, s.value, s.checkpoint, s.digest, 0, ?, ?
                 FROM state_stage s
                 WHERE NOT EXISTS (
                    SELECT 1 FROM state_records r
                    WHERE r.name = s.name AND r.key1 IS s.key1 AND r.key2 IS s.key2
                 )",
            )
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        // 5. tombstones that outrank the set of the same key
        for change in &plan.removes {
            sqlx::query(
                "UPDATE state_records SET
                    is_removed = 1,
                    last_update_checkpoint = ?,
                    last_update_digest = ?,
                    updated_at = ?
                 WHERE name = ? AND key1 IS ? AND key2 IS ?
                   AND last_update_checkpoint <= ?",
            )
            .bind(change.checkpoint as i64)
            .bind(&change.digest)
            .bind(now)
            .bind(&change.key.name)
            .bind(&change.key.key1)
            .bind(&change.key.key2)
            .bind(change.checkpoint as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        // 6. cursor
        if let Some(cursor) = &batch.cursor {
            sqlx::query(UPSERT_CURSOR)
                .bind(indexer_id)
                .bind(&cursor.digest)
                .bind(cursor.checkpoint as i64)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;

        let summary = CommitSummary {
            transactions: batch.transactions.len(),
            domain_events: batch.domain_events.len(),
            state_sets: sets.len(),
            state_removes: plan.removes.len(),
            cursor: batch.cursor.clone(),
        };
        debug!(
            indexer_id,
            transactions = summary.transactions,
            domain_events = summary.domain_events,
            state_sets = summary.state_sets,
            state_removes = summary.state_removes,
            "batch committed"
        );
        Ok(summary)
    }
}

// ─── StateQuery impl ─────────────────────────────────────────────────────────

#[async_trait]
impl StateQuery for SqliteStorage {
    async fn get_state(&self, key: &StateKey) -> Result<Option<StateRecord>, IndexerError> {
        let sql = format!(
            "SELECT {STATE_COLUMNS} FROM state_records
             WHERE name = ? AND key1 IS ? AND key2 IS ?"
        );
        let row = sqlx::query(&sql)
            .bind(&key.name)
            .bind(&key.key1)
            .bind(&key.key2)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(state_from_row).transpose()
    }

    async fn list_states(
        &self,
        name: &str,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StateRecord>, IndexerError> {
        let sql = format!(
            "SELECT {STATE_COLUMNS} FROM state_records
             WHERE name = ? AND is_removed = 0 AND id > ?
             ORDER BY id LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(name)
            .bind(after_id.unwrap_or(0))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(state_from_row).collect()
    }

    async fn states_by_value_field(
        &self,
        name: &str,
        field: &str,
        expected: &str,
    ) -> Result<Vec<StateRecord>, IndexerError> {
        let sql = format!(
            "SELECT {STATE_COLUMNS} FROM state_records
             WHERE name = ?1 AND is_removed = 0
               AND (CASE json_type(value, ?2)
                      WHEN 'true' THEN 'true'
                      WHEN 'false' THEN 'false'
                      ELSE CAST(json_extract(value, ?2) AS TEXT)
                    END) = ?3
             ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(name)
            .bind(format!("$.\"{field}\""))
            .bind(expected)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(state_from_row).collect()
    }

    async fn domain_events(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<DomainEventRecord>, IndexerError> {
        let rows = sqlx::query(
            "SELECT sender, checkpoint, digest, name, raw_name, value, created_at
             FROM domain_events WHERE name = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let value: String = row.get("value");
            events.push(DomainEventRecord {
                sender: row.get("sender"),
                checkpoint: row.get::<i64, _>("checkpoint") as u64,
                digest: row.get("digest"),
                name: row.get("name"),
                raw_name: row.get("raw_name"),
                value: serde_json::from_str(&value).map_err(storage_err)?,
                created_at: row.get("created_at"),
            });
        }
        Ok(events)
    }

    async fn counts(&self) -> Result<StoreCounts, IndexerError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM transactions) AS transactions,
                (SELECT COUNT(*) FROM domain_events) AS domain_events,
                (SELECT COUNT(*) FROM state_records) AS state_records,
                (SELECT COUNT(*) FROM state_records WHERE is_removed = 0) AS live_state_records",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(StoreCounts {
            transactions: row.get::<i64, _>("transactions") as u64,
            domain_events: row.get::<i64, _>("domain_events") as u64,
            state_records: row.get::<i64, _>("state_records") as u64,
            live_state_records: row.get::<i64, _>("live_state_records") as u64,
        })
    }

    async fn clear_all(&self) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for table in ["transactions", "domain_events", "state_records", "sync_cursor"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        debug!("all tables cleared");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
