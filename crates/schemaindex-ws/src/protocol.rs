//! Control messages sent by subscribers.
//!
//! ```json
//! {"type": "subscribe", "filters": [{"kind": "StateChange", "name": "position"}]}
//! ```
//!
//! Each `subscribe` replaces the connection's filter list. Outbound frames
//! are [`PushMessage`](schemaindex_core::subscription::PushMessage)s.

use serde::{Deserialize, Serialize};

use schemaindex_core::subscription::SubscriptionFilter;

/// A message received from a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the connection's filters.
    Subscribe {
        #[serde(default)]
        filters: Vec<SubscriptionFilter>,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
