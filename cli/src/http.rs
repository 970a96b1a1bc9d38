//! Health and metrics HTTP endpoints.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | 200 once caught up with the ledger, 503 while catching up |
//! | `GET` | `/metrics` | Sync counters as JSON |

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use schemaindex_core::indexer::SyncStatus;
use schemaindex_core::subscription::SubscriptionRegistry;

/// Shared state for the handlers.
#[derive(Clone)]
pub struct AppState {
    pub status: watch::Receiver<SyncStatus>,
    pub registry: Arc<SubscriptionRegistry>,
    pub started: Instant,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub version: &'static str,
    pub state: String,
    pub caught_up: bool,
    pub checkpoint: Option<u64>,
    pub head: Option<u64>,
    pub subscribers: usize,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub checkpoint: Option<u64>,
    pub head: Option<u64>,
    pub lag: Option<u64>,
    pub percent: Option<f64>,
    pub rate: Option<f64>,
    pub eta_secs: Option<f64>,
    pub pages: u64,
    pub transactions: u64,
    pub domain_events: u64,
    pub state_changes: u64,
    pub skipped_events: u64,
    pub fetch_failures: u64,
    pub consecutive_fetch_failures: u64,
    pub subscribers: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let status = state.status.borrow().clone();
    let code = if status.caught_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if status.caught_up { "ok" } else { "syncing" },
        uptime_secs: state.started.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        state: status.state.to_string(),
        caught_up: status.caught_up,
        checkpoint: status.checkpoint(),
        head: status.progress.as_ref().map(|p| p.head),
        subscribers: state.registry.len(),
    };
    (code, Json(body))
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let status = state.status.borrow().clone();
    let progress = status.progress.as_ref();
    Json(MetricsResponse {
        checkpoint: status.checkpoint(),
        head: progress.map(|p| p.head),
        lag: progress.map(|p| p.lag()),
        percent: progress.map(|p| p.percent),
        rate: progress.map(|p| p.rate),
        eta_secs: progress.and_then(|p| p.eta_secs),
        pages: status.pages,
        transactions: status.transactions,
        domain_events: status.domain_events,
        state_changes: status.state_changes,
        skipped_events: status.skipped_events,
        fetch_failures: status.fetch_failures,
        consecutive_fetch_failures: status.consecutive_fetch_failures,
        subscribers: state.registry.len(),
    })
}

/// Serve until `shutdown` turns `true`.
pub async fn serve(bind: &str, state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding http server to {bind}"))?;
    info!(addr = %bind, "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("http server")
}
