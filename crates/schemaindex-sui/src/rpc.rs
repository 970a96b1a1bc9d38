//! JSON-RPC 2.0 transport over HTTP.
//!
//! Features:
//! - Automatic retry with exponential backoff for transient errors
//! - HTTP 429 / 5xx treated as transient, other statuses as permanent
//! - Node-side JSON-RPC errors are never retried

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use schemaindex_core::error::IndexerError;

// ─── Wire types ──────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result value or return the node's error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ─── Retry policy ────────────────────────────────────────────────────────────

/// Configuration for the retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier applied to backoff on each retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based), or `None`
    /// once `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        Some(Duration::from_millis(base_ms.min(cap_ms) as u64))
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Why a single request attempt failed.
#[derive(Debug)]
enum AttemptError {
    /// Connection, timeout, 429 or 5xx.
    Transient(String),
    /// Anything a retry won't fix.
    Permanent(String),
}

/// HTTP JSON-RPC transport with retry.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a transport for the given endpoint.
    pub fn new(
        url: impl Into<String>,
        retry: RetryConfig,
        request_timeout: Duration,
    ) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(retry),
            next_id: AtomicU64::new(1),
        })
    }

    /// Create with default retry settings and a 30s timeout.
    pub fn default_for(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(url, RetryConfig::default(), Duration::from_secs(30))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and return its `result`.
    ///
    /// Transient failures are retried per the policy; the final failure
    /// surfaces as [`IndexerError::Rpc`].
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(resp) => {
                    return resp
                        .into_result()
                        .map_err(|e| IndexerError::Rpc(format!("{method}: {e}")));
                }
                Err(AttemptError::Transient(msg)) => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %msg,
                            method,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(attempt, error = %msg, method, url = %self.url, "max retries exceeded");
                        return Err(IndexerError::Rpc(format!("{method}: {msg}")));
                    }
                },
                Err(AttemptError::Permanent(msg)) => {
                    return Err(IndexerError::Rpc(format!("{method}: {msg}")));
                }
            }
        }
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, AttemptError> {
        debug!(method = %req.method, id = req.id, "rpc request");
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!("HTTP {}: {body}", status.as_u16());
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                AttemptError::Transient(msg)
            } else {
                AttemptError::Permanent(msg)
            });
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| AttemptError::Permanent(format!("invalid JSON-RPC response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(1, "sui_getLatestCheckpointSequenceNumber", vec![]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"sui_getLatestCheckpointSequenceNumber\""));
    }

    #[test]
    fn response_into_result() {
        let ok: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"12345"}"#).unwrap();
        assert_eq!(ok.into_result().unwrap(), Value::String("12345".into()));

        let err: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Invalid params"}}"#,
        )
        .unwrap();
        let e = err.into_result().unwrap_err();
        assert_eq!(e.code, -32602);
        assert_eq!(e.to_string(), "JSON-RPC error -32602: Invalid params");
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            multiplier: 2.0,
        });
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(300)));
        assert_eq!(policy.next_delay(6), None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_rpc_error() {
        let transport = HttpTransport::new(
            "http://127.0.0.1:9",
            RetryConfig {
                max_retries: 1,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
                multiplier: 1.0,
            },
            Duration::from_millis(500),
        )
        .unwrap();
        let err = transport
            .call("sui_getLatestCheckpointSequenceNumber", vec![])
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
