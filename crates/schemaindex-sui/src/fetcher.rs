//! Sui transaction page fetcher.
//!
//! Uses JSON-RPC `suix_queryTransactionBlocks` (ascending, with input and
//! events) and `sui_getLatestCheckpointSequenceNumber`, and converts the
//! responses into chain-agnostic [`LedgerTransaction`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use schemaindex_core::error::IndexerError;
use schemaindex_core::ledger::LedgerClient;
use schemaindex_core::types::{LedgerTransaction, MoveCall, RawEvent, TransactionFilter};

use crate::rpc::HttpTransport;

// ─── Response types ──────────────────────────────────────────────────────────

/// One page of `suix_queryTransactionBlocks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionBlocksPage {
    pub data: Vec<SuiTransactionBlock>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

/// A transaction block with `showInput` and `showEvents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiTransactionBlock {
    pub digest: String,
    #[serde(default)]
    pub checkpoint: Option<String>,
    #[serde(default)]
    pub timestamp_ms: Option<String>,
    #[serde(default)]
    pub transaction: Option<SuiTransaction>,
    #[serde(default)]
    pub events: Vec<SuiEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiTransaction {
    pub data: SuiTransactionData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiTransactionData {
    pub sender: String,
    /// Transaction kind; only `ProgrammableTransaction` carries Move calls.
    pub transaction: Value,
}

/// An emitted Move event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub sender: String,
    #[serde(default)]
    pub parsed_json: Value,
}

// ─── Client trait ────────────────────────────────────────────────────────────

/// Trait for fetching Sui data from a JSON-RPC provider.
#[async_trait]
pub trait SuiRpcClient: Send + Sync {
    async fn query_transaction_blocks(
        &self,
        filter: &TransactionFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TransactionBlocksPage, IndexerError>;

    async fn latest_checkpoint(&self) -> Result<u64, IndexerError>;
}

/// [`SuiRpcClient`] over [`HttpTransport`].
pub struct HttpSuiClient {
    transport: HttpTransport,
}

impl HttpSuiClient {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

/// JSON form of a transaction filter.
pub fn filter_json(filter: &TransactionFilter) -> Value {
    match filter {
        TransactionFilter::ChangedObject(id) => json!({ "ChangedObject": id }),
    }
}

#[async_trait]
impl SuiRpcClient for HttpSuiClient {
    async fn query_transaction_blocks(
        &self,
        filter: &TransactionFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<TransactionBlocksPage, IndexerError> {
        let query = json!({
            "filter": filter_json(filter),
            "options": { "showInput": true, "showEvents": true },
        });
        let result = self
            .transport
            .call(
                "suix_queryTransactionBlocks",
                vec![query, json!(cursor), json!(limit), json!(false)],
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("invalid transaction page: {e}")))
    }

    async fn latest_checkpoint(&self) -> Result<u64, IndexerError> {
        let result = self
            .transport
            .call("sui_getLatestCheckpointSequenceNumber", vec![])
            .await?;
        parse_u64(&result)
            .ok_or_else(|| IndexerError::Rpc(format!("invalid checkpoint number: {result}")))
    }
}

// ─── Fetcher ─────────────────────────────────────────────────────────────────

/// Sui fetcher that wraps a `SuiRpcClient` and converts its responses.
pub struct SuiFetcher<C> {
    client: C,
}

impl<C: SuiRpcClient> SuiFetcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: SuiRpcClient> LedgerClient for SuiFetcher<C> {
    async fn fetch_page(
        &self,
        filter: &TransactionFilter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LedgerTransaction>, IndexerError> {
        let page = self
            .client
            .query_transaction_blocks(filter, after, limit)
            .await?;
        debug!(
            transactions = page.data.len(),
            has_next_page = page.has_next_page,
            "fetched transaction page"
        );
        page.data.iter().map(convert_block).collect()
    }

    async fn head_checkpoint(&self) -> Result<u64, IndexerError> {
        self.client.latest_checkpoint().await
    }
}

/// Parse a `u64` sent either as a JSON string or a JSON number.
pub fn parse_u64(v: &Value) -> Option<u64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Convert one transaction block into a [`LedgerTransaction`].
pub fn convert_block(block: &SuiTransactionBlock) -> Result<LedgerTransaction, IndexerError> {
    let checkpoint = block
        .checkpoint
        .as_deref()
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| {
            IndexerError::Rpc(format!("transaction {} has no checkpoint", block.digest))
        })?;
    let timestamp_ms = block
        .timestamp_ms
        .as_deref()
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);

    let (sender, calls) = match &block.transaction {
        Some(tx) => (tx.data.sender.clone(), move_calls(&tx.data.transaction)),
        None => (String::new(), Vec::new()),
    };

    let events = block
        .events
        .iter()
        .map(|e| RawEvent {
            event_type: e.event_type.clone(),
            sender: e.sender.clone(),
            payload: e.parsed_json.clone(),
        })
        .collect();

    Ok(LedgerTransaction {
        digest: block.digest.clone(),
        checkpoint,
        timestamp_ms,
        sender,
        calls,
        events,
    })
}

/// Extract the Move calls of a programmable transaction, resolving
/// `{"Input": n}` arguments against the transaction inputs.
pub fn move_calls(kind: &Value) -> Vec<MoveCall> {
    if kind.get("kind").and_then(Value::as_str) != Some("ProgrammableTransaction") {
        return Vec::new();
    }
    let inputs = kind
        .get("inputs")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let commands = kind
        .get("transactions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    commands
        .iter()
        .filter_map(|cmd| cmd.get("MoveCall"))
        .map(|call| {
            let field = |name: &str| {
                call.get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let arguments = call
                .get("arguments")
                .and_then(Value::as_array)
                .map(|args| args.iter().map(|a| resolve_argument(a, inputs)).collect())
                .unwrap_or_default();
            MoveCall {
                package: field("package"),
                module: field("module"),
                function: field("function"),
                arguments: Value::Array(arguments),
            }
        })
        .collect()
}

fn resolve_argument(arg: &Value, inputs: &[Value]) -> Value {
    let Some(idx) = arg.get("Input").and_then(Value::as_u64) else {
        return arg.clone();
    };
    match inputs.get(idx as usize) {
        Some(input) => match input.get("type").and_then(Value::as_str) {
            Some("pure") => input.get("value").cloned().unwrap_or(Value::Null),
            Some("object") => input.get("objectId").cloned().unwrap_or_else(|| input.clone()),
            _ => input.clone(),
        },
        None => arg.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Value {
        json!({
            "digest": "9xQDig",
            "checkpoint": "1234",
            "timestampMs": "1700000000000",
            "transaction": {
                "data": {
                    "sender": "0xsender",
                    "transaction": {
                        "kind": "ProgrammableTransaction",
                        "inputs": [
                            {"type": "object", "objectType": "sharedObject", "objectId": "0xschema"},
                            {"type": "pure", "valueType": "u64", "value": "10"}
                        ],
                        "transactions": [
                            {"MoveCall": {
                                "package": "0xabc",
                                "module": "map_system",
                                "function": "move_player",
                                "arguments": [{"Input": 0}, {"Input": 1}, {"Result": 0}]
                            }},
                            {"TransferObjects": [[{"Result": 0}], {"Input": 1}]}
                        ]
                    }
                }
            },
            "events": [{
                "id": {"txDigest": "9xQDig", "eventSeq": "0"},
                "packageId": "0xabc",
                "transactionModule": "map_system",
                "sender": "0xsender",
                "type": "0xabc::dubhe_schema::Dubhe_Store_SetRecord",
                "parsedJson": {"name": "position", "value": {"x": 1, "y": 2}}
            }]
        })
    }

    #[test]
    fn convert_block_basic() {
        let block: SuiTransactionBlock = serde_json::from_value(sample_block()).unwrap();
        let tx = convert_block(&block).unwrap();
        assert_eq!(tx.digest, "9xQDig");
        assert_eq!(tx.checkpoint, 1234);
        assert_eq!(tx.timestamp_ms, 1_700_000_000_000);
        assert_eq!(tx.sender, "0xsender");
        assert_eq!(tx.events.len(), 1);
        assert_eq!(tx.events[0].payload["name"], "position");
    }

    #[test]
    fn move_call_arguments_are_resolved() {
        let block: SuiTransactionBlock = serde_json::from_value(sample_block()).unwrap();
        let tx = convert_block(&block).unwrap();
        assert_eq!(tx.calls.len(), 1);
        let call = &tx.calls[0];
        assert_eq!(call.function, "move_player");
        assert_eq!(call.arguments, json!(["0xschema", "10", {"Result": 0}]));
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let mut raw = sample_block();
        raw["checkpoint"] = Value::Null;
        let block: SuiTransactionBlock = serde_json::from_value(raw).unwrap();
        assert!(convert_block(&block).is_err());
    }

    #[test]
    fn non_programmable_has_no_calls() {
        assert!(move_calls(&json!({"kind": "ConsensusCommitPrologue"})).is_empty());
    }

    #[test]
    fn parse_u64_forms() {
        assert_eq!(parse_u64(&json!("42")), Some(42));
        assert_eq!(parse_u64(&json!(42)), Some(42));
        assert_eq!(parse_u64(&json!(null)), None);
    }

    #[test]
    fn page_deserialization() {
        let page: TransactionBlocksPage = serde_json::from_value(json!({
            "data": [sample_block()],
            "nextCursor": "9xQDig",
            "hasNextPage": false
        }))
        .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("9xQDig"));
    }

    #[test]
    fn filter_wire_form() {
        let f = TransactionFilter::changed_object("0xschema");
        assert_eq!(filter_json(&f), json!({"ChangedObject": "0xschema"}));
    }
}
