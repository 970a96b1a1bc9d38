//! schemaindex CLI — run the Sui schema indexer and manage its state.
//!
//! Usage:
//! ```bash
//! schemaindex run    --config schemaindex.yaml [--force]
//! schemaindex status --config schemaindex.yaml
//! schemaindex reset  --config schemaindex.yaml --force
//! schemaindex info
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use schemaindex_core::cursor::CursorStore;
use schemaindex_core::indexer::{DEFAULT_POLL_INTERVAL_MS, LOCAL_POLL_INTERVAL_MS};
use schemaindex_core::store::StateQuery;
use schemaindex_core::subscription::SubscriptionRegistry;
use schemaindex_ws::SubscriptionServer;

mod config;
mod http;
mod logging;
mod stores;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "schemaindex",
    about = "Sui schema-table indexer with live subscriptions",
    version
)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true, default_value = "schemaindex.yaml")]
    config: PathBuf,

    /// Override `ledger.rpc_url`
    #[arg(long, global = true, env = "SCHEMAINDEX_RPC_URL")]
    rpc_url: Option<String>,

    /// Override `storage.url`
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the tracked schema object until interrupted
    Run {
        /// Clear all indexed data and the cursor before starting
        #[arg(long)]
        force: bool,
    },
    /// Show the stored cursor and table counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete all indexed data and the cursor
    Reset {
        /// Confirm the reset
        #[arg(long, alias = "force")]
        yes: bool,
    },
    /// Show defaults and supported backends
    Info,
    /// Print version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { force } => cmd_run(load_config(&cli)?, *force).await,
        Commands::Status { json } => cmd_status(load_config(&cli)?, *json).await,
        Commands::Reset { yes } => cmd_reset(load_config(&cli)?, *yes).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
        Commands::Version => {
            println!("schemaindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(&cli.config)?;
    config.apply_overrides(cli.rpc_url.clone(), cli.database_url.clone());
    config.validate()?;
    Ok(config)
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_run(config: AppConfig, force: bool) -> Result<()> {
    logging::init_tracing(&config.logging);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        tracked_object = %config.ledger.tracked_object,
        rpc_url = %config.ledger.rpc_url,
        "starting schemaindex"
    );

    let stores = stores::open(&config.storage).await?;
    if force {
        warn!(indexer = %config.ledger.id, "--force given, clearing indexed data");
        stores.query.clear_all().await.context("clearing indexed data")?;
    }
    let registry = Arc::new(SubscriptionRegistry::new(
        config.subscriptions.max_clients,
        config.subscriptions.channel_capacity,
    ));

    let mut sync = config.indexer_builder().build_http(stores.batch.clone())?;
    if config.subscriptions.enabled {
        sync = sync.with_registry(registry.clone());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let mut tasks = Vec::new();

    if config.subscriptions.enabled {
        let server = SubscriptionServer::bind(&config.subscriptions.bind, registry.clone()).await?;
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(rx).await {
                error!(error = %e, "subscription server failed");
            }
        }));
    }

    if config.http.enabled {
        let state = http::AppState {
            status: sync.status(),
            registry: registry.clone(),
            started: Instant::now(),
        };
        let bind = config.http.bind.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = http::serve(&bind, state, rx).await {
                error!(error = %e, "http server failed");
            }
        }));
    }

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
        let _ = signal_tx.send(true);
    });

    let result = sync.run(shutdown_rx).await;
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    result.context("sync loop stopped")
}

async fn cmd_status(config: AppConfig, as_json: bool) -> Result<()> {
    let stores = stores::open(&config.storage).await?;
    let cursor = stores.batch.load_cursor(&config.ledger.id).await?;
    let counts = stores.query.counts().await?;

    if as_json {
        let out = serde_json::json!({
            "indexer": config.ledger.id,
            "tracked_object": config.ledger.tracked_object,
            "cursor": cursor,
            "counts": counts,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Indexer:        {}", config.ledger.id);
    println!("Tracked object: {}", config.ledger.tracked_object);
    match cursor {
        Some(stored) => {
            println!("Checkpoint:     {}", stored.cursor.checkpoint);
            println!("Cursor:         {}", stored.cursor.digest);
            println!("Updated at:     {} ms", stored.updated_at);
        }
        None => println!("Cursor:         (none, will start from genesis)"),
    }
    println!("Transactions:   {}", counts.transactions);
    println!("Domain events:  {}", counts.domain_events);
    println!(
        "State records:  {} ({} live)",
        counts.state_records, counts.live_state_records
    );
    Ok(())
}

async fn cmd_reset(config: AppConfig, yes: bool) -> Result<()> {
    if !yes {
        bail!("reset deletes all indexed data; pass --force to confirm");
    }
    let stores = stores::open(&config.storage).await?;
    stores.query.clear_all().await?;
    println!("Cleared all indexed data for '{}'", config.ledger.id);
    Ok(())
}

fn cmd_info() {
    println!("schemaindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default page size: 50 transactions");
    println!("  Default poll interval: {DEFAULT_POLL_INTERVAL_MS} ms ({LOCAL_POLL_INTERVAL_MS} ms for a local node)");
    println!("  Default progress interval: 10 s");
    println!("  Storage backends: memory, sqlite, postgres");
    println!("  Ledger: Sui JSON-RPC (suix_queryTransactionBlocks)");
    println!("  Event filter: ledger.event_filter (packages, type_names)");
    println!("  Subscriptions: WebSocket, {{\"type\":\"subscribe\",\"filters\":[...]}}");
}
