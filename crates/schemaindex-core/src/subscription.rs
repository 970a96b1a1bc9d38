//! Live subscription registry and fan-out.
//!
//! Each connection owns a bounded `tokio::sync::mpsc` channel and a list of
//! filters it can replace at any time. After every committed page the sync
//! loop calls [`SubscriptionRegistry::fan_out`], which pushes each domain
//! event and state change to every connection with at least one matching
//! filter. A connection whose receiver is gone is pruned on the spot.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::IndexerError;
use crate::event::ClassifiedBatch;
use crate::types::{DomainEventRecord, StateChange};

/// Unique identifier of a subscriber connection.
pub type ConnectionId = u64;

/// What a filter (or a pushed message) is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    #[serde(rename = "domain_event", alias = "DomainEvent")]
    DomainEvent,
    #[serde(rename = "state_change", alias = "StateChange")]
    StateChange,
}

/// One subscription filter. Absent fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub kind: SubscriptionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Only meaningful for domain events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl SubscriptionFilter {
    pub fn domain_event(name: Option<&str>, sender: Option<&str>) -> Self {
        Self {
            kind: SubscriptionKind::DomainEvent,
            name: name.map(str::to_string),
            sender: sender.map(str::to_string),
        }
    }

    pub fn state_change(name: Option<&str>) -> Self {
        Self {
            kind: SubscriptionKind::StateChange,
            name: name.map(str::to_string),
            sender: None,
        }
    }

    /// Returns `true` if `msg` should be delivered under this filter.
    pub fn matches(&self, msg: &PushMessage) -> bool {
        if self.kind != msg.kind {
            return false;
        }
        let name_ok = self.name.as_deref().map_or(true, |n| n == msg.name);
        match self.kind {
            SubscriptionKind::DomainEvent => {
                let sender_ok = self
                    .sender
                    .as_deref()
                    .map_or(true, |s| msg.sender.as_deref() == Some(s));
                name_ok && sender_ok
            }
            SubscriptionKind::StateChange => name_ok,
        }
    }
}

/// A message pushed to subscribers, serialized as-is onto the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub kind: SubscriptionKind,
    pub name: String,
    /// Schema table of a state change (same as `name`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub checkpoint: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub data: Value,
}

impl PushMessage {
    pub fn from_domain_event(event: &DomainEventRecord) -> Self {
        Self {
            kind: SubscriptionKind::DomainEvent,
            name: event.name.clone(),
            table: None,
            checkpoint: event.checkpoint,
            sender: Some(event.sender.clone()),
            data: event.value.clone(),
        }
    }

    pub fn from_state_change(change: &StateChange) -> Self {
        Self {
            kind: SubscriptionKind::StateChange,
            name: change.key.name.clone(),
            table: Some(change.key.name.clone()),
            checkpoint: change.checkpoint,
            sender: Some(change.sender.clone()),
            data: json!({
                "key1": change.key.key1,
                "key2": change.key.key2,
                "value": change.value,
                "is_removed": change.is_remove(),
            }),
        }
    }
}

/// Result of one [`SubscriptionRegistry::fan_out`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutStats {
    /// Messages queued onto connection channels.
    pub delivered: usize,
    /// Messages dropped because a connection's channel was full.
    pub dropped: usize,
    /// Connections removed because their receiver was gone.
    pub pruned: usize,
}

struct Connection {
    filters: Vec<SubscriptionFilter>,
    tx: mpsc::Sender<PushMessage>,
}

struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    next_id: ConnectionId,
}

/// Registry of live subscriber connections, guarded by a single mutex.
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
    max_clients: usize,
    channel_capacity: usize,
}

impl SubscriptionRegistry {
    pub fn new(max_clients: usize, channel_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                connections: HashMap::new(),
                next_id: 1,
            }),
            max_clients,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Register a connection with no filters.
    ///
    /// Fails with [`IndexerError::Subscription`] once `max_clients` is reached.
    pub fn register(
        &self,
    ) -> Result<(ConnectionId, mpsc::Receiver<PushMessage>), IndexerError> {
        let mut inner = self.lock()?;
        if inner.connections.len() >= self.max_clients {
            return Err(IndexerError::Subscription(format!(
                "connection limit reached ({})",
                self.max_clients
            )));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        inner.connections.insert(
            id,
            Connection {
                filters: Vec::new(),
                tx,
            },
        );
        debug!(connection = id, "subscriber registered");
        Ok((id, rx))
    }

    /// Replace the filter list of a connection. Returns `false` if unknown.
    pub fn set_filters(
        &self,
        id: ConnectionId,
        filters: Vec<SubscriptionFilter>,
    ) -> Result<bool, IndexerError> {
        let mut inner = self.lock()?;
        match inner.connections.get_mut(&id) {
            Some(conn) => {
                debug!(connection = id, filters = filters.len(), "filters replaced");
                conn.filters = filters;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> Result<bool, IndexerError> {
        let removed = self.lock()?.connections.remove(&id).is_some();
        if removed {
            debug!(connection = id, "subscriber removed");
        }
        Ok(removed)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.connections.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push every domain event and state change of `batch` to matching
    /// connections, at most once per connection per item.
    ///
    /// State changes go out ordered by checkpoint, then arrival, so the last
    /// push for a key matches the row the store keeps.
    pub fn fan_out(&self, batch: &ClassifiedBatch) -> Result<FanoutStats, IndexerError> {
        let mut changes: Vec<_> = batch.state_changes.iter().collect();
        changes.sort_by_key(|c| c.checkpoint);

        let messages: Vec<PushMessage> = batch
            .domain_events
            .iter()
            .map(PushMessage::from_domain_event)
            .chain(changes.into_iter().map(PushMessage::from_state_change))
            .collect();
        self.push_all(&messages)
    }

    /// Push pre-built messages to matching connections.
    pub fn push_all(&self, messages: &[PushMessage]) -> Result<FanoutStats, IndexerError> {
        let mut stats = FanoutStats::default();
        if messages.is_empty() {
            return Ok(stats);
        }

        let mut inner = self.lock()?;
        let mut dead = Vec::new();
        for (id, conn) in inner.connections.iter() {
            for msg in messages {
                if !conn.filters.iter().any(|f| f.matches(msg)) {
                    continue;
                }
                match conn.tx.try_send(msg.clone()) {
                    Ok(()) => stats.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        stats.dropped += 1;
                        warn!(connection = id, name = %msg.name, "subscriber channel full, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(*id);
                        break;
                    }
                }
            }
        }
        for id in dead {
            inner.connections.remove(&id);
            stats.pruned += 1;
            debug!(connection = id, "pruned closed subscriber");
        }
        Ok(stats)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, IndexerError> {
        self.inner
            .lock()
            .map_err(|e| IndexerError::Subscription(format!("registry lock poisoned: {e}")))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
