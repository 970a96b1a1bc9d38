//! schemaindex-ws — WebSocket server for live schema subscriptions.
//!
//! Subscribers connect, send `{"type":"subscribe","filters":[…]}` and then
//! receive one JSON frame per matching domain event or state change.

pub mod protocol;
pub mod server;

pub use protocol::ClientMessage;
pub use server::SubscriptionServer;
