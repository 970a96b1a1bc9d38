//! schemaindex-sui — Sui JSON-RPC ledger client and sync loop.

pub mod builder;
pub mod fetcher;
pub mod index_loop;
pub mod rpc;

pub use builder::IndexerBuilder;
pub use fetcher::{HttpSuiClient, SuiFetcher, SuiRpcClient};
pub use index_loop::{IterationOutcome, SyncEvent, SyncLoop};
pub use rpc::{HttpTransport, RetryConfig};
