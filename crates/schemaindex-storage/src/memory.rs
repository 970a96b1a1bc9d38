//! In-memory storage backend.
//!
//! Keeps every table in RAM behind a single mutex, so a commit is atomic
//! with respect to readers. Useful for tests and throwaway indexers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use schemaindex_core::cursor::{Cursor, CursorStore, StoredCursor};
use schemaindex_core::dedup::plan_state_changes;
use schemaindex_core::error::IndexerError;
use schemaindex_core::event::ClassifiedBatch;
use schemaindex_core::store::{BatchStore, CommitSummary, StateQuery, StoreCounts};
use schemaindex_core::types::{
    now_ms, DomainEventRecord, StateKey, StateRecord, TransactionRecord,
};

use crate::value_field_text;

#[derive(Default)]
struct Tables {
    transactions: Vec<TransactionRecord>,
    domain_events: Vec<DomainEventRecord>,
    states: HashMap<StateKey, StateRecord>,
    next_state_id: i64,
    cursors: HashMap<String, StoredCursor>,
}

/// In-memory indexer storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, IndexerError> {
        self.tables
            .lock()
            .map_err(|e| IndexerError::Storage(e.to_string()))
    }

    /// All transaction records in insertion order.
    pub fn transactions(&self) -> Result<Vec<TransactionRecord>, IndexerError> {
        Ok(self.lock()?.transactions.clone())
    }
}

#[async_trait]
impl CursorStore for InMemoryStorage {
    async fn load_cursor(&self, indexer_id: &str) -> Result<Option<StoredCursor>, IndexerError> {
        Ok(self.lock()?.cursors.get(indexer_id).cloned())
    }

    async fn save_cursor(&self, indexer_id: &str, cursor: &Cursor) -> Result<(), IndexerError> {
        self.lock()?.cursors.insert(
            indexer_id.to_string(),
            StoredCursor {
                indexer_id: indexer_id.to_string(),
                cursor: cursor.clone(),
                updated_at: now_ms(),
            },
        );
        Ok(())
    }

    async fn delete_cursor(&self, indexer_id: &str) -> Result<(), IndexerError> {
        self.lock()?.cursors.remove(indexer_id);
        Ok(())
    }
}

#[async_trait]
impl BatchStore for InMemoryStorage {
    async fn commit_batch(
        &self,
        indexer_id: &str,
        batch: &ClassifiedBatch,
    ) -> Result<CommitSummary, IndexerError> {
        let mut tables = self.lock()?;
        let now = now_ms();

        tables.transactions.extend(batch.transactions.iter().cloned());
        tables.domain_events.extend(batch.domain_events.iter().cloned());

        let plan = plan_state_changes(&batch.state_changes);
        let sets = &plan.sets;
        for change in sets {
            let value = change.value.clone().unwrap_or(serde_json::Value::Null);
            match tables.states.get_mut(&change.key) {
                Some(row) => {
                    if row.last_update_checkpoint < change.checkpoint {
                        row.value = value;
                        row.last_update_checkpoint = change.checkpoint;
                        row.last_update_digest = change.digest.clone();
                        row.is_removed = false;
                        row.updated_at = now;
                    }
                }
                None => {
                    tables.next_state_id += 1;
                    let id = tables.next_state_id;
                    tables.states.insert(
                        change.key.clone(),
                        StateRecord {
                            id,
                            name: change.key.name.clone(),
                            key1: change.key.key1.clone(),
                            key2: change.key.key2.clone(),
                            value,
                            last_update_checkpoint: change.checkpoint,
                            last_update_digest: change.digest.clone(),
                            is_removed: false,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                }
            }
        }

        for change in &plan.removes {
            if let Some(row) = tables.states.get_mut(&change.key) {
                if row.last_update_checkpoint <= change.checkpoint {
                    row.is_removed = true;
                    row.last_update_checkpoint = change.checkpoint;
                    row.last_update_digest = change.digest.clone();
                    row.updated_at = now;
                }
            }
        }

        if let Some(cursor) = &batch.cursor {
            tables.cursors.insert(
                indexer_id.to_string(),
                StoredCursor {
                    indexer_id: indexer_id.to_string(),
                    cursor: cursor.clone(),
                    updated_at: now,
                },
            );
        }

        Ok(CommitSummary {
            transactions: batch.transactions.len(),
            domain_events: batch.domain_events.len(),
            state_sets: sets.len(),
            state_removes: plan.removes.len(),
            cursor: batch.cursor.clone(),
        })
    }
}

#[async_trait]
impl StateQuery for InMemoryStorage {
    async fn get_state(&self, key: &StateKey) -> Result<Option<StateRecord>, IndexerError> {
        Ok(self.lock()?.states.get(key).cloned())
    }

    async fn list_states(
        &self,
        name: &str,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StateRecord>, IndexerError> {
        let tables = self.lock()?;
        let after = after_id.unwrap_or(0);
        let mut rows: Vec<StateRecord> = tables
            .states
            .values()
            .filter(|r| r.name == name && !r.is_removed && r.id > after)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn states_by_value_field(
        &self,
        name: &str,
        field: &str,
        expected: &str,
    ) -> Result<Vec<StateRecord>, IndexerError> {
        let tables = self.lock()?;
        let mut rows: Vec<StateRecord> = tables
            .states
            .values()
            .filter(|r| r.name == name && !r.is_removed)
            .filter(|r| value_field_text(&r.value, field).as_deref() == Some(expected))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn domain_events(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<DomainEventRecord>, IndexerError> {
        let tables = self.lock()?;
        Ok(tables
            .domain_events
            .iter()
            .rev()
            .filter(|e| e.name == name)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<StoreCounts, IndexerError> {
        let tables = self.lock()?;
        Ok(StoreCounts {
            transactions: tables.transactions.len() as u64,
            domain_events: tables.domain_events.len() as u64,
            state_records: tables.states.len() as u64,
            live_state_records: tables.states.values().filter(|r| !r.is_removed).count() as u64,
        })
    }

    async fn clear_all(&self) -> Result<(), IndexerError> {
        *self.lock()? = Tables::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use schemaindex_core::types::StateChange;
    use serde_json::json;

    #[tokio::test]
    async fn cursor_roundtrip() {
        let store = InMemoryStorage::new();
        assert!(store.load_cursor("idx").await.unwrap().is_none());
        store.save_cursor("idx", &Cursor::new("D1", 5)).await.unwrap();
        let loaded = store.load_cursor("idx").await.unwrap().unwrap();
        assert_eq!(loaded.cursor, Cursor::new("D1", 5));
        store.delete_cursor("idx").await.unwrap();
        assert!(store.load_cursor("idx").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_remove() {
        let store = InMemoryStorage::new();
        store
            .commit_batch("idx", &batch(vec![set("position", None, json!({"x": 1}), 10)], vec![], 10))
            .await
            .unwrap();
        store
            .commit_batch("idx", &batch(vec![], vec![remove("position", None, 11)], 11))
            .await
            .unwrap();

        let row = store
            .get_state(&StateKey::singleton("position"))
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_removed);
        assert_eq!(row.last_update_checkpoint, 11);
        assert!(store.list_states("position", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_is_idempotent() {
        let store = InMemoryStorage::new();
        let b = batch(
            vec![set("balance", Some("0xa"), json!(5), 10)],
            vec![],
            10,
        );
        store.commit_batch("idx", &b).await.unwrap();
        let before = store.get_state(&StateKey::new("balance", Some("0xa".into()), None)).await.unwrap();
        store.commit_batch("idx", &b).await.unwrap();
        let after = store.get_state(&StateKey::new("balance", Some("0xa".into()), None)).await.unwrap();

        assert_eq!(before.map(|r| (r.value, r.last_update_checkpoint)),
                   after.map(|r| (r.value, r.last_update_checkpoint)));
        assert_eq!(store.counts().await.unwrap().state_records, 1);
    }

    #[tokio::test]
    async fn older_checkpoint_does_not_overwrite() {
        let store = InMemoryStorage::new();
        store
            .commit_batch("idx", &batch(vec![set("A", None, json!(2), 20)], vec![], 20))
            .await
            .unwrap();
        store
            .commit_batch("idx", &batch(vec![set("A", None, json!(1), 15)], vec![], 15))
            .await
            .unwrap();
        let row = store.get_state(&StateKey::singleton("A")).await.unwrap().unwrap();
        assert_eq!(row.value, json!(2));
        assert_eq!(row.last_update_checkpoint, 20);
    }

    #[tokio::test]
    async fn set_and_remove_in_same_checkpoint_leave_tombstone() {
        let store = InMemoryStorage::new();
        let b = batch(
            vec![set("A", None, json!(1), 10)],
            vec![remove("A", None, 10)],
            10,
        );
        let summary = store.commit_batch("idx", &b).await.unwrap();
        assert_eq!(summary.state_sets, 1);
        assert_eq!(summary.state_removes, 1);
        let row = store.get_state(&StateKey::singleton("A")).await.unwrap().unwrap();
        assert!(row.is_removed);
    }

    #[tokio::test]
    async fn out_of_order_writes_keep_highest_checkpoint() {
        let store = InMemoryStorage::new();
        let b = ordered(vec![set("A", None, json!("c2"), 20), set("A", None, json!("c1"), 10)], 20);
        store.commit_batch("idx", &b).await.unwrap();

        let row = store.get_state(&StateKey::singleton("A")).await.unwrap().unwrap();
        assert_eq!(row.value, json!("c2"));
        assert_eq!(row.last_update_checkpoint, 20);
    }

    #[tokio::test]
    async fn three_changes_on_one_key() {
        let store = InMemoryStorage::new();
        let b = ordered(
            vec![
                set("A", Some("k"), json!(1), 10),
                set("A", Some("k"), json!(3), 12),
                set("A", Some("k"), json!(2), 11),
            ],
            12,
        );
        store.commit_batch("idx", &b).await.unwrap();
        let k = StateKey::new("A", Some("k".into()), None);
        assert_eq!(store.get_state(&k).await.unwrap().unwrap().value, json!(3));

        let b = ordered(
            vec![
                set("pos", None, json!(1), 10),
                remove("pos", None, 11),
                set("pos", None, json!(2), 12),
            ],
            12,
        );
        store.commit_batch("idx", &b).await.unwrap();
        let row = store.get_state(&StateKey::singleton("pos")).await.unwrap().unwrap();
        assert!(!row.is_removed);
        assert_eq!(row.value, json!(2));
        assert_eq!(row.last_update_checkpoint, 12);
    }

    #[tokio::test]
    async fn set_after_remove_at_same_checkpoint_stays_live() {
        let store = InMemoryStorage::new();
        let b = ordered(vec![remove("A", None, 10), set("A", None, json!(1), 10)], 10);
        store.commit_batch("idx", &b).await.unwrap();
        let row = store.get_state(&StateKey::singleton("A")).await.unwrap().unwrap();
        assert!(!row.is_removed);
        assert_eq!(row.value, json!(1));
    }

    #[tokio::test]
    async fn absent_key1_with_present_key2() {
        let store = InMemoryStorage::new();
        for cp in [1, 2] {
            let b = ordered(
                vec![
                    set2("A", None, Some("x"), json!(cp), cp),
                    set2("A", None, Some("y"), json!(cp), cp),
                    set2("A", None, None, json!(cp), cp),
                ],
                cp,
            );
            store.commit_batch("idx", &b).await.unwrap();
        }
        assert_eq!(store.counts().await.unwrap().state_records, 3);

        let ax = StateKey::new("A", None, Some("x".into()));
        assert_eq!(store.get_state(&ax).await.unwrap().unwrap().value, json!(2));

        let tombstone = StateChange {
            value: None,
            ..set2("A", None, Some("x"), json!(null), 3)
        };
        store.commit_batch("idx", &ordered(vec![tombstone], 3)).await.unwrap();
        assert!(store.get_state(&ax).await.unwrap().unwrap().is_removed);
        let ay = StateKey::new("A", None, Some("y".into()));
        assert!(!store.get_state(&ay).await.unwrap().unwrap().is_removed);
        assert!(!store.get_state(&StateKey::singleton("A")).await.unwrap().unwrap().is_removed);
    }

    #[tokio::test]
    async fn value_field_lookup_matches_booleans() {
        let store = InMemoryStorage::new();
        let b = batch(
            vec![
                set("player", Some("1"), json!({"alive": true, "hp": 1.5}), 1),
                set("player", Some("2"), json!({"alive": false, "hp": 2}), 1),
            ],
            vec![],
            1,
        );
        store.commit_batch("idx", &b).await.unwrap();

        let alive = store.states_by_value_field("player", "alive", "true").await.unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].key1.as_deref(), Some("1"));
        assert_eq!(store.states_by_value_field("player", "alive", "false").await.unwrap().len(), 1);
        assert!(store.states_by_value_field("player", "alive", "1").await.unwrap().is_empty());
        assert_eq!(store.states_by_value_field("player", "hp", "1.5").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn value_field_lookup_and_pagination() {
        let store = InMemoryStorage::new();
        let b = batch(
            vec![
                set("player", Some("1"), json!({"team": "red", "hp": 10}), 1),
                set("player", Some("2"), json!({"team": "blue", "hp": 10}), 1),
                set("player", Some("3"), json!({"team": "red", "hp": 3}), 1),
            ],
            vec![],
            1,
        );
        store.commit_batch("idx", &b).await.unwrap();

        let red = store.states_by_value_field("player", "team", "red").await.unwrap();
        assert_eq!(red.len(), 2);
        let hp10 = store.states_by_value_field("player", "hp", "10").await.unwrap();
        assert_eq!(hp10.len(), 2);

        let first = store.list_states("player", None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = store.list_states("player", Some(first[1].id), 2).await.unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn domain_events_newest_first() {
        let store = InMemoryStorage::new();
        let mut b = batch(vec![], vec![], 1);
        b.domain_events = vec![domain_event("player_moved", 1), domain_event("player_moved", 2)];
        store.commit_batch("idx", &b).await.unwrap();

        let events = store.domain_events("player_moved", 1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].checkpoint, 2);
        assert!(store.domain_events("other", 10).await.unwrap().is_empty());
        assert_eq!(store.transactions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_all_resets_everything() {
        let store = InMemoryStorage::new();
        store
            .commit_batch("idx", &batch(vec![set("A", None, json!(1), 1)], vec![], 1))
            .await
            .unwrap();
        store.clear_all().await.unwrap();
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
        assert!(store.load_cursor("idx").await.unwrap().is_none());
    }
}
