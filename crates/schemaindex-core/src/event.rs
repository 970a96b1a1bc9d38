//! Event classification.
//!
//! Every event emitted by a tracked transaction carries a JSON payload with a
//! `name` field. The payload is parsed once, at the ledger boundary, into a
//! closed [`ParsedEvent`] union:
//!
//! | payload                            | variant        |
//! |------------------------------------|----------------|
//! | `name` ends with `_event`          | `DomainEvent`  |
//! | has a `value` field                | `StateSet`     |
//! | no `value` field                   | `StateRemove`  |
//!
//! Downstream code only ever matches on the variants. An optional
//! [`EventTypeFilter`] drops events from foreign packages before parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cursor::Cursor;
use crate::error::IndexerError;
use crate::types::{
    now_ms, DomainEventRecord, LedgerTransaction, StateChange, StateKey, TransactionRecord,
};

/// Reserved suffix marking a domain event.
pub const EVENT_MARKER: &str = "_event";

/// A classified event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// An application event, to be logged and pushed to subscribers.
    DomainEvent {
        /// Name with [`EVENT_MARKER`] stripped.
        name: String,
        /// Name as emitted.
        raw_name: String,
        value: Value,
    },
    /// Write `value` to the row at `key`.
    StateSet { key: StateKey, value: Value },
    /// Tombstone the row at `key`.
    StateRemove { key: StateKey },
}

impl ParsedEvent {
    /// Parse a raw event payload.
    ///
    /// Fails only when the payload is not an object or has no string `name`;
    /// any well-formed payload maps to exactly one variant.
    pub fn parse(payload: &Value) -> Result<Self, String> {
        let obj = payload
            .as_object()
            .ok_or_else(|| "payload is not an object".to_string())?;
        let raw_name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing string field `name`".to_string())?;

        if let Some(name) = raw_name.strip_suffix(EVENT_MARKER) {
            return Ok(Self::DomainEvent {
                name: name.to_string(),
                raw_name: raw_name.to_string(),
                value: obj.get("value").cloned().unwrap_or(Value::Null),
            });
        }

        let key = StateKey::new(
            raw_name,
            normalize_key(obj.get("key1")),
            normalize_key(obj.get("key2")),
        );
        match obj.get("value") {
            Some(value) => Ok(Self::StateSet {
                key,
                value: value.clone(),
            }),
            None => Ok(Self::StateRemove { key }),
        }
    }
}

/// Convert a JSON key field to its stored text form.
///
/// Strings are kept verbatim, `null`/absent become `None`, anything else is
/// stored as compact JSON.
pub fn normalize_key(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Restricts which on-chain event types are classified.
///
/// Event types have the form `<package>::<module>::<Name>` (optionally with
/// type arguments). An empty list accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeFilter {
    /// Accepted package ids, e.g. `0xabc`.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Accepted struct names, e.g. `Dubhe_Store_SetRecord`.
    #[serde(default)]
    pub type_names: Vec<String>,
}

impl EventTypeFilter {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.type_names.is_empty()
    }

    pub fn accepts(&self, event_type: &str) -> bool {
        let base = event_type.split('<').next().unwrap_or(event_type);
        let mut parts = base.split("::");
        let package = parts.next().unwrap_or_default();
        let name = parts.last().unwrap_or_default();

        let package_ok = self.packages.is_empty()
            || self
                .packages
                .iter()
                .any(|p| same_address(p, package));
        let name_ok = self.type_names.is_empty() || self.type_names.iter().any(|n| n == name);
        package_ok && name_ok
    }
}

/// Compare two hex addresses ignoring case, `0x` prefix and leading zeros.
fn same_address(a: &str, b: &str) -> bool {
    let trim = |s: &str| {
        let s = s.strip_prefix("0x").unwrap_or(s);
        s.trim_start_matches('0').to_ascii_lowercase()
    };
    trim(a) == trim(b)
}

/// Output of classifying one page.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedBatch {
    pub transactions: Vec<TransactionRecord>,
    pub domain_events: Vec<DomainEventRecord>,
    /// State sets and removes, in arrival order.
    pub state_changes: Vec<StateChange>,
    /// Cursor after the last transaction of the page (`None` for an empty page).
    pub cursor: Option<Cursor>,
    /// Events skipped because their payload was malformed.
    pub skipped: usize,
    /// Events dropped by the [`EventTypeFilter`].
    pub filtered: usize,
}

impl ClassifiedBatch {
    /// Returns `true` if the page contained no transactions.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.cursor.is_none()
    }

    /// Number of state sets and removes.
    pub fn state_change_count(&self) -> usize {
        self.state_changes.len()
    }

    pub fn state_sets(&self) -> impl Iterator<Item = &StateChange> {
        self.state_changes.iter().filter(|c| !c.is_remove())
    }

    pub fn state_removes(&self) -> impl Iterator<Item = &StateChange> {
        self.state_changes.iter().filter(|c| c.is_remove())
    }
}

/// Classify every event of every transaction in a page.
pub fn classify_page(page: &[LedgerTransaction]) -> ClassifiedBatch {
    classify_page_with(page, &EventTypeFilter::default())
}

/// Classify a page, ignoring events whose type `filter` rejects.
pub fn classify_page_with(page: &[LedgerTransaction], filter: &EventTypeFilter) -> ClassifiedBatch {
    let mut batch = ClassifiedBatch::default();
    let created_at = now_ms();

    for tx in page {
        batch.transactions.extend(transaction_records(tx, created_at));

        if tx.events.is_empty() {
            warn!(
                digest = %tx.digest,
                checkpoint = tx.checkpoint,
                "transaction has no events; is the page source returning events?"
            );
        }

        for event in &tx.events {
            if !filter.accepts(&event.event_type) {
                debug!(event_type = %event.event_type, digest = %tx.digest, "event type filtered out");
                batch.filtered += 1;
                continue;
            }
            let parsed = match ParsedEvent::parse(&event.payload) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    let err = IndexerError::Malformed {
                        digest: tx.digest.clone(),
                        reason,
                    };
                    warn!(error = %err, event_type = %event.event_type, "skipping event");
                    batch.skipped += 1;
                    continue;
                }
            };

            match parsed {
                ParsedEvent::DomainEvent {
                    name,
                    raw_name,
                    value,
                } => batch.domain_events.push(DomainEventRecord {
                    sender: event.sender.clone(),
                    checkpoint: tx.checkpoint,
                    digest: tx.digest.clone(),
                    name,
                    raw_name,
                    value,
                    created_at,
                }),
                ParsedEvent::StateSet { key, value } => batch.state_changes.push(StateChange {
                    key,
                    value: Some(value),
                    checkpoint: tx.checkpoint,
                    digest: tx.digest.clone(),
                    sender: event.sender.clone(),
                }),
                ParsedEvent::StateRemove { key } => batch.state_changes.push(StateChange {
                    key,
                    value: None,
                    checkpoint: tx.checkpoint,
                    digest: tx.digest.clone(),
                    sender: event.sender.clone(),
                }),
            }
        }
    }

    batch.cursor = page
        .last()
        .map(|tx| Cursor::new(tx.digest.clone(), tx.checkpoint));
    batch
}

fn transaction_records(tx: &LedgerTransaction, created_at: i64) -> Vec<TransactionRecord> {
    let record = |package: &str, module: &str, function: &str, arguments: Value| TransactionRecord {
        sender: tx.sender.clone(),
        checkpoint: tx.checkpoint,
        digest: tx.digest.clone(),
        package: package.to_string(),
        module: module.to_string(),
        function: function.to_string(),
        arguments,
        cursor: tx.digest.clone(),
        created_at,
    };

    if tx.calls.is_empty() {
        return vec![record("", "", "", Value::Array(vec![]))];
    }
    tx.calls
        .iter()
        .map(|call| record(&call.package, &call.module, &call.function, call.arguments.clone()))
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
