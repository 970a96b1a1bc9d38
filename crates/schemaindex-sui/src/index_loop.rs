//! The sync loop: polls the ledger for pages touching the tracked object and
//! reconciles them into storage.
//!
//! # States
//! `Idle → Fetching → Reconciling → Notifying → Idle`, until cancellation
//! moves the loop through `Stopping` to `Stopped`.
//!
//! # One iteration ([`SyncLoop::step`])
//!   - fetch the page after the in-memory cursor
//!   - on fetch error: log, emit `FetchFailed`, keep the cursor
//!   - drop transactions below the start checkpoint, classify the rest
//!   - commit logs, state and cursor in one storage transaction
//!   - sample progress if the interval elapsed
//!   - fan committed changes out to subscribers
//!
//! [`SyncLoop::run`] waits the poll interval between iterations and checks
//! the shutdown signal only there, so a commit is never interrupted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use schemaindex_core::cursor::Cursor;
use schemaindex_core::error::IndexerError;
use schemaindex_core::event::classify_page_with;
use schemaindex_core::indexer::{IndexerConfig, SyncState, SyncStatus};
use schemaindex_core::ledger::LedgerClient;
use schemaindex_core::progress::{ProgressEstimator, ProgressReport};
use schemaindex_core::store::{BatchStore, CommitSummary};
use schemaindex_core::subscription::{FanoutStats, SubscriptionRegistry};
use schemaindex_core::types::{LedgerTransaction, TransactionFilter};

/// Notifications emitted by the sync loop for observability.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Committed(CommitSummary),
    FetchFailed { error: String, consecutive: u64 },
    /// The ledger served a page that starts behind the cursor.
    LedgerRegression { cursor_checkpoint: u64, page_checkpoint: u64 },
    Progress(ProgressReport),
    FannedOut(FanoutStats),
}

/// Result of one [`SyncLoop::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    /// A non-empty page was committed.
    Committed {
        summary: CommitSummary,
        /// `true` if the page started behind the cursor.
        regression: bool,
    },
    /// The ledger had nothing after the cursor.
    Empty,
    /// The page could not be fetched; the cursor did not move.
    FetchFailed,
}

/// The sync loop implementation.
pub struct SyncLoop<L: LedgerClient> {
    config: IndexerConfig,
    filter: TransactionFilter,
    ledger: L,
    store: Arc<dyn BatchStore>,
    registry: Option<Arc<SubscriptionRegistry>>,
    progress: ProgressEstimator,
    cursor: Option<Cursor>,
    cursor_loaded: bool,
    status: SyncStatus,
    status_tx: watch::Sender<SyncStatus>,
    events_tx: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl<L: LedgerClient> SyncLoop<L> {
    pub fn new(config: IndexerConfig, ledger: L, store: Arc<dyn BatchStore>) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        Self {
            filter: TransactionFilter::changed_object(config.tracked_object.clone()),
            progress: ProgressEstimator::new(Duration::from_secs(config.progress_interval_secs)),
            config,
            ledger,
            store,
            registry: None,
            cursor: None,
            cursor_loaded: false,
            status: SyncStatus::default(),
            status_tx,
            events_tx: None,
        }
    }

    /// Push committed changes to the given registry.
    pub fn with_registry(mut self, registry: Arc<SubscriptionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Receive a [`SyncStatus`] snapshot after every state change.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Receive [`SyncEvent`]s. Only the most recent receiver is fed.
    pub fn events(&mut self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events_tx = Some(tx);
        rx
    }

    pub fn state(&self) -> SyncState {
        self.status.state
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Load the persisted cursor. Called once, lazily, before the first fetch.
    pub async fn load_cursor(&mut self) -> Result<(), IndexerError> {
        if let Some(stored) = self.store.load_cursor(&self.config.id).await? {
            info!(
                indexer = %self.config.id,
                digest = %stored.cursor.digest,
                checkpoint = stored.cursor.checkpoint,
                "resuming from cursor"
            );
            self.cursor = Some(stored.cursor);
        } else {
            info!(indexer = %self.config.id, "no cursor stored, starting from the beginning");
        }
        self.cursor_loaded = true;
        self.status.cursor = self.cursor.clone();
        self.publish();
        Ok(())
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Returns an error only for failures that make progress impossible,
    /// i.e. storage errors.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IndexerError> {
        info!(
            indexer = %self.config.id,
            tracked_object = %self.config.tracked_object,
            page_size = self.config.page_size,
            poll_interval_ms = self.config.poll_interval_ms,
            "sync loop starting"
        );
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                    continue;
                }
            }
            if let Err(e) = self.step().await {
                break Err(e);
            }
        };

        self.set_state(SyncState::Stopping);
        match &result {
            Ok(()) => info!(indexer = %self.config.id, "sync loop stopped"),
            Err(e) => warn!(indexer = %self.config.id, error = %e, "sync loop aborted"),
        }
        self.set_state(SyncState::Stopped);
        result
    }

    /// Perform exactly one iteration.
    pub async fn step(&mut self) -> Result<IterationOutcome, IndexerError> {
        if !self.cursor_loaded {
            self.load_cursor().await?;
        }

        self.set_state(SyncState::Fetching);
        let after = self.cursor.as_ref().map(|c| c.digest.clone());
        let page = match self
            .ledger
            .fetch_page(&self.filter, after.as_deref(), self.config.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.status.consecutive_fetch_failures += 1;
                self.status.fetch_failures += 1;
                warn!(
                    error = %e,
                    consecutive = self.status.consecutive_fetch_failures,
                    "fetch failed, retrying with the same cursor"
                );
                self.emit(SyncEvent::FetchFailed {
                    error: e.to_string(),
                    consecutive: self.status.consecutive_fetch_failures,
                });
                self.set_state(SyncState::Idle);
                return Ok(IterationOutcome::FetchFailed);
            }
        };
        self.status.consecutive_fetch_failures = 0;
        let short_page = page.len() < self.config.page_size;

        if page.is_empty() {
            debug!("no new transactions");
            self.status.caught_up = true;
            self.sample_progress().await;
            self.set_state(SyncState::Idle);
            return Ok(IterationOutcome::Empty);
        }
        let mut page = page;

        let mut regression = false;
        if let (Some(cursor), Some(first)) = (&self.cursor, page.first()) {
            if cursor.is_behind(first.checkpoint) {
                regression = true;
                warn!(
                    cursor_checkpoint = cursor.checkpoint,
                    page_checkpoint = first.checkpoint,
                    "ledger returned a page behind the cursor"
                );
                self.emit(SyncEvent::LedgerRegression {
                    cursor_checkpoint: cursor.checkpoint,
                    page_checkpoint: first.checkpoint,
                });
            }
        }

        self.set_state(SyncState::Reconciling);
        let page_end = page
            .last()
            .map(|last| Cursor::new(last.digest.clone(), last.checkpoint));
        let before_start = self.drop_before_start(&mut page);
        let mut batch = classify_page_with(&page, &self.config.event_filter);
        batch.cursor = page_end;
        let summary = match self.store.commit_batch(&self.config.id, &batch).await {
            Ok(summary) => summary,
            Err(e) => {
                self.set_state(SyncState::Idle);
                return Err(e);
            }
        };
        if let Some(cursor) = &batch.cursor {
            self.cursor = Some(cursor.clone());
        }

        self.status.pages += 1;
        self.status.transactions += page.len() as u64;
        self.status.domain_events += batch.domain_events.len() as u64;
        self.status.state_changes += batch.state_change_count() as u64;
        self.status.skipped_events += batch.skipped as u64;
        self.status.cursor = self.cursor.clone();
        info!(
            transactions = summary.transactions,
            domain_events = summary.domain_events,
            state_sets = summary.state_sets,
            state_removes = summary.state_removes,
            skipped = batch.skipped,
            filtered = batch.filtered,
            before_start,
            checkpoint = self.cursor.as_ref().map(|c| c.checkpoint),
            "page committed"
        );
        self.emit(SyncEvent::Committed(summary.clone()));

        self.sample_progress().await;
        self.status.caught_up = short_page
            || self
                .status
                .progress
                .as_ref()
                .map_or(false, ProgressReport::is_caught_up);

        self.set_state(SyncState::Notifying);
        if let Some(registry) = &self.registry {
            match registry.fan_out(&batch) {
                Ok(stats) => {
                    if stats.delivered + stats.dropped + stats.pruned > 0 {
                        debug!(
                            delivered = stats.delivered,
                            dropped = stats.dropped,
                            pruned = stats.pruned,
                            "fan-out complete"
                        );
                    }
                    self.emit(SyncEvent::FannedOut(stats));
                }
                Err(e) => warn!(error = %e, "fan-out failed"),
            }
        }

        self.set_state(SyncState::Idle);
        Ok(IterationOutcome::Committed {
            summary,
            regression,
        })
    }

    /// Remove transactions below `start_checkpoint`. Returns how many.
    fn drop_before_start(&self, page: &mut Vec<LedgerTransaction>) -> usize {
        let Some(start) = self.config.start_checkpoint else {
            return 0;
        };
        let before = page.len();
        page.retain(|t| t.checkpoint >= start);
        before - page.len()
    }

    async fn sample_progress(&mut self) {
        let now = Instant::now();
        if !self.progress.is_due(now) {
            return;
        }
        let head = match self.ledger.head_checkpoint().await {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "head checkpoint lookup failed, skipping progress sample");
                return;
            }
        };
        let local = self.cursor.as_ref().map_or(0, |c| c.checkpoint);
        if let Some(report) = self.progress.sample(local, head, now) {
            self.status.progress = Some(report.clone());
            self.emit(SyncEvent::Progress(report));
        }
    }

    fn set_state(&mut self, state: SyncState) {
        self.status.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event);
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use schemaindex_core::cursor::{CursorStore, StoredCursor};
    use schemaindex_core::event::{ClassifiedBatch, EventTypeFilter};
    use schemaindex_core::store::StateQuery;
    use schemaindex_core::subscription::{SubscriptionFilter, SubscriptionKind};
    use schemaindex_core::types::{MoveCall, RawEvent, StateKey};
    use schemaindex_storage::InMemoryStorage;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Page = Result<Vec<LedgerTransaction>, IndexerError>;

    /// Ledger that serves scripted pages and records the `after` arguments.
    struct MockLedger {
        pages: Mutex<VecDeque<Page>>,
        afters: Arc<Mutex<Vec<Option<String>>>>,
        head: u64,
    }

    impl MockLedger {
        fn new(pages: Vec<Page>, head: u64) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                afters: Arc::new(Mutex::new(Vec::new())),
                head,
            }
        }
    }

    #[async_trait]
    impl LedgerClient for MockLedger {
        async fn fetch_page(
            &self,
            _filter: &TransactionFilter,
            after: Option<&str>,
            _limit: usize,
        ) -> Result<Vec<LedgerTransaction>, IndexerError> {
            self.afters.lock().unwrap().push(after.map(str::to_string));
            self.pages.lock().unwrap().pop_front().unwrap_or(Ok(vec![]))
        }

        async fn head_checkpoint(&self) -> Result<u64, IndexerError> {
            Ok(self.head)
        }
    }

    /// Store whose commits always fail.
    struct FailingStore;

    #[async_trait]
    impl CursorStore for FailingStore {
        async fn load_cursor(&self, _: &str) -> Result<Option<StoredCursor>, IndexerError> {
            Ok(None)
        }
        async fn save_cursor(&self, _: &str, _: &Cursor) -> Result<(), IndexerError> {
            Ok(())
        }
        async fn delete_cursor(&self, _: &str) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    #[async_trait]
    impl BatchStore for FailingStore {
        async fn commit_batch(
            &self,
            _: &str,
            _: &ClassifiedBatch,
        ) -> Result<CommitSummary, IndexerError> {
            Err(IndexerError::Storage("disk full".into()))
        }
    }

    fn tx(digest: &str, checkpoint: u64, payloads: Vec<Value>) -> LedgerTransaction {
        LedgerTransaction {
            digest: digest.into(),
            checkpoint,
            timestamp_ms: 0,
            sender: "0xa".into(),
            calls: vec![MoveCall {
                package: "0xabc".into(),
                module: "map_system".into(),
                function: "move_player".into(),
                arguments: json!([]),
            }],
            events: payloads
                .into_iter()
                .map(|payload| RawEvent {
                    event_type: "0xabc::dubhe_schema::Dubhe_Store_SetRecord".into(),
                    sender: "0xa".into(),
                    payload,
                })
                .collect(),
        }
    }

    fn config() -> IndexerConfig {
        IndexerConfig {
            id: "test".into(),
            tracked_object: "0xschema".into(),
            page_size: 10,
            poll_interval_ms: 0,
            progress_interval_secs: 0,
            ..IndexerConfig::default()
        }
    }

    fn typed_tx(digest: &str, checkpoint: u64, events: Vec<(&str, Value)>) -> LedgerTransaction {
        LedgerTransaction {
            events: events
                .into_iter()
                .map(|(event_type, payload)| RawEvent {
                    event_type: event_type.into(),
                    sender: "0xa".into(),
                    payload,
                })
                .collect(),
            ..tx(digest, checkpoint, vec![])
        }
    }

    #[tokio::test]
    async fn set_then_remove_scenario() {
        let store = Arc::new(InMemoryStorage::new());
        let ledger = MockLedger::new(
            vec![
                Ok(vec![tx("D1", 10, vec![json!({"name": "position", "value": {"x": 1, "y": 2}})])]),
                Ok(vec![tx("D2", 11, vec![json!({"name": "position"})])]),
            ],
            11,
        );
        let mut sync = SyncLoop::new(config(), ledger, store.clone());

        assert!(matches!(sync.step().await.unwrap(), IterationOutcome::Committed { .. }));
        let row = store.get_state(&StateKey::singleton("position")).await.unwrap().unwrap();
        assert_eq!(row.value, json!({"x": 1, "y": 2}));
        assert!(!row.is_removed);

        assert!(matches!(sync.step().await.unwrap(), IterationOutcome::Committed { .. }));
        let row = store.get_state(&StateKey::singleton("position")).await.unwrap().unwrap();
        assert!(row.is_removed);
        assert_eq!(row.last_update_checkpoint, 11);

        let cursor = store.load_cursor("test").await.unwrap().unwrap();
        assert_eq!(cursor.cursor, Cursor::new("D2", 11));
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn domain_event_is_logged_and_pushed() {
        let store = Arc::new(InMemoryStorage::new());
        let registry = Arc::new(SubscriptionRegistry::new(10, 16));
        let (id, mut rx) = registry.register().unwrap();
        registry
            .set_filters(id, vec![SubscriptionFilter::domain_event(Some("player_moved"), None)])
            .unwrap();

        let ledger = MockLedger::new(
            vec![Ok(vec![tx(
                "D1",
                10,
                vec![json!({"name": "player_moved_event", "value": {"x": 1, "y": 2}})],
            )])],
            10,
        );
        let mut sync = SyncLoop::new(config(), ledger, store.clone()).with_registry(registry);
        sync.step().await.unwrap();

        let events = store.domain_events("player_moved", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, json!({"x": 1, "y": 2}));

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.kind, SubscriptionKind::DomainEvent);
        assert_eq!(msg.name, "player_moved");
        assert_eq!(msg.data, json!({"x": 1, "y": 2}));
        assert!(store.get_state(&StateKey::singleton("player_moved_event")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_failure_keeps_cursor() {
        let store = Arc::new(InMemoryStorage::new());
        let ledger = MockLedger::new(
            vec![
                Ok(vec![tx("D1", 10, vec![json!({"name": "a", "value": 1})])]),
                Err(IndexerError::Rpc("connection reset".into())),
                Ok(vec![tx("D2", 11, vec![json!({"name": "a", "value": 2})])]),
            ],
            11,
        );
        let afters = ledger.afters.clone();
        let mut sync = SyncLoop::new(config(), ledger, store.clone());
        let mut events = sync.events();

        sync.step().await.unwrap();
        assert_eq!(sync.step().await.unwrap(), IterationOutcome::FetchFailed);
        assert_eq!(sync.cursor(), Some(&Cursor::new("D1", 10)));
        sync.step().await.unwrap();

        let afters = afters.lock().unwrap().clone();
        assert_eq!(afters, vec![None, Some("D1".into()), Some("D1".into())]);

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::FetchFailed { consecutive, .. } = event {
                assert_eq!(consecutive, 1);
                saw_failure = true;
            }
        }
        assert!(saw_failure);
        assert_eq!(sync.status().borrow().fetch_failures, 1);
    }

    #[tokio::test]
    async fn resumes_from_stored_cursor() {
        let store = Arc::new(InMemoryStorage::new());
        store.save_cursor("test", &Cursor::new("D7", 70)).await.unwrap();
        let ledger = MockLedger::new(vec![Ok(vec![])], 70);
        let afters = ledger.afters.clone();
        let mut sync = SyncLoop::new(config(), ledger, store);

        assert_eq!(sync.step().await.unwrap(), IterationOutcome::Empty);
        assert_eq!(afters.lock().unwrap()[0].as_deref(), Some("D7"));
        assert!(sync.status().borrow().caught_up);
    }

    #[tokio::test]
    async fn regression_is_flagged_but_reconciled() {
        let store = Arc::new(InMemoryStorage::new());
        store.save_cursor("test", &Cursor::new("D20", 20)).await.unwrap();
        let ledger = MockLedger::new(
            vec![Ok(vec![tx("D15", 15, vec![json!({"name": "a", "value": 1})])])],
            20,
        );
        let mut sync = SyncLoop::new(config(), ledger, store.clone());
        let mut events = sync.events();

        match sync.step().await.unwrap() {
            IterationOutcome::Committed { regression, .. } => assert!(regression),
            other => panic!("unexpected outcome {other:?}"),
        }
        let mut flagged = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::LedgerRegression { cursor_checkpoint, page_checkpoint } = event {
                assert_eq!((cursor_checkpoint, page_checkpoint), (20, 15));
                flagged = true;
            }
        }
        assert!(flagged);
        assert!(store.get_state(&StateKey::singleton("a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn storage_failure_is_fatal() {
        let ledger = MockLedger::new(
            vec![Ok(vec![tx("D1", 1, vec![json!({"name": "a", "value": 1})])])],
            1,
        );
        let mut sync = SyncLoop::new(config(), ledger, Arc::new(FailingStore));
        let (_tx, rx) = watch::channel(false);
        let err = sync.run(rx).await.unwrap_err();
        assert!(err.is_storage());
        assert_eq!(sync.state(), SyncState::Stopped);
        assert!(sync.cursor().is_none());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = Arc::new(InMemoryStorage::new());
        let ledger = MockLedger::new(vec![], 0);
        let mut sync = SyncLoop::new(config(), ledger, store);
        let status = sync.status();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            sync.run(rx).await.unwrap();
            sync
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        let sync = handle.await.unwrap();
        assert_eq!(sync.state(), SyncState::Stopped);
        assert_eq!(status.borrow().state, SyncState::Stopped);
    }

    #[tokio::test]
    async fn progress_is_reported() {
        let store = Arc::new(InMemoryStorage::new());
        let ledger = MockLedger::new(
            vec![
                Ok(vec![tx("D1", 50, vec![])]),
                Ok(vec![tx("D2", 100, vec![])]),
            ],
            100,
        );
        let mut sync = SyncLoop::new(config(), ledger, store);
        sync.step().await.unwrap();
        assert!(sync.status().borrow().progress.is_none());
        sync.step().await.unwrap();
        let status = sync.status().borrow().clone();
        let report = status.progress.unwrap();
        assert_eq!(report.current, 100);
        assert_eq!(report.head, 100);
        assert!(status.caught_up);
    }

    #[tokio::test]
    async fn one_transaction_yields_log_event_and_state() {
        let store = Arc::new(InMemoryStorage::new());
        let ledger = MockLedger::new(
            vec![Ok(vec![tx(
                "D1",
                10,
                vec![
                    json!({"name": "player_moved_event", "value": {"x": 1, "y": 2}}),
                    json!({"name": "position", "key1": "0xp1", "value": {"x": 1, "y": 2}}),
                ],
            )])],
            10,
        );
        let mut sync = SyncLoop::new(config(), ledger, store.clone());
        sync.step().await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.transactions, 1);
        assert_eq!(counts.domain_events, 1);
        assert_eq!(counts.state_records, 1);

        let events = store.domain_events("player_moved", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "player_moved");

        let key = StateKey::new("position", Some("0xp1".into()), None);
        let row = store.get_state(&key).await.unwrap().unwrap();
        assert_eq!(row.value, json!({"x": 1, "y": 2}));
        assert_eq!(row.last_update_checkpoint, 10);
    }

    #[tokio::test]
    async fn events_outside_the_filter_are_ignored() {
        let store = Arc::new(InMemoryStorage::new());
        let ledger = MockLedger::new(
            vec![Ok(vec![typed_tx(
                "D1",
                10,
                vec![
                    (
                        "0xabc::dubhe_schema::Dubhe_Store_SetRecord",
                        json!({"name": "position", "value": 1}),
                    ),
                    (
                        "0x2::coin::CoinDeposited",
                        json!({"name": "balance", "value": 5}),
                    ),
                    (
                        "0xabc::dubhe_schema::Dubhe_Store_SetRecord",
                        json!({"name": "player_moved_event", "value": 2}),
                    ),
                ],
            )])],
            10,
        );
        let mut cfg = config();
        cfg.event_filter = EventTypeFilter {
            packages: vec!["0x0abc".into()],
            type_names: vec!["Dubhe_Store_SetRecord".into()],
        };
        let mut sync = SyncLoop::new(cfg, ledger, store.clone());
        sync.step().await.unwrap();

        assert!(store.get_state(&StateKey::singleton("position")).await.unwrap().is_some());
        assert!(store.get_state(&StateKey::singleton("balance")).await.unwrap().is_none());
        assert_eq!(store.domain_events("player_moved", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_checkpoint_skips_older_transactions() {
        let store = Arc::new(InMemoryStorage::new());
        let ledger = MockLedger::new(
            vec![
                Ok(vec![
                    tx("D1", 5, vec![json!({"name": "a", "value": 1})]),
                    tx("D2", 8, vec![json!({"name": "b", "value": 1})]),
                ]),
                Ok(vec![
                    tx("D3", 9, vec![json!({"name": "c", "value": 1})]),
                    tx("D4", 10, vec![json!({"name": "d", "value": 1})]),
                ]),
            ],
            10,
        );
        let afters = ledger.afters.clone();
        let mut cfg = config();
        cfg.start_checkpoint = Some(10);
        let mut sync = SyncLoop::new(cfg, ledger, store.clone());

        sync.step().await.unwrap();
        assert_eq!(store.counts().await.unwrap().transactions, 0);
        let cursor = store.load_cursor("test").await.unwrap().unwrap();
        assert_eq!(cursor.cursor, Cursor::new("D2", 8));

        sync.step().await.unwrap();
        assert_eq!(afters.lock().unwrap()[1].as_deref(), Some("D2"));
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.transactions, 1);
        assert_eq!(counts.state_records, 1);
        assert!(store.get_state(&StateKey::singleton("d")).await.unwrap().is_some());
        assert!(store.get_state(&StateKey::singleton("c")).await.unwrap().is_none());
        assert_eq!(sync.cursor(), Some(&Cursor::new("D4", 10)));
    }
}
