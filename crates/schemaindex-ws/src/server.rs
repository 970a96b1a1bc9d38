//! WebSocket subscription server.
//!
//! Every accepted connection is registered with the shared
//! [`SubscriptionRegistry`] and served on its own task, which concurrently
//! forwards pushed messages and applies inbound `subscribe` messages.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use schemaindex_core::error::IndexerError;
use schemaindex_core::subscription::SubscriptionRegistry;

use crate::protocol::ClientMessage;

/// A bound, not yet running, subscription server.
pub struct SubscriptionServer {
    listener: TcpListener,
    registry: Arc<SubscriptionRegistry>,
}

impl SubscriptionServer {
    /// Bind to `addr` (e.g. `"0.0.0.0:8080"`).
    pub async fn bind(addr: &str, registry: Arc<SubscriptionRegistry>) -> Result<Self, IndexerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| IndexerError::Subscription(format!("failed to bind {addr}: {e}")))?;
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IndexerError> {
        self.listener
            .local_addr()
            .map_err(|e| IndexerError::Subscription(e.to_string()))
    }

    /// Accept connections until `shutdown` turns `true`.
    ///
    /// Connection tasks observe the same signal and close their sockets.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), IndexerError> {
        info!(addr = %self.local_addr()?, "subscription server listening");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let _ = stream.set_nodelay(true);
                        let registry = Arc::clone(&self.registry);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, addr, registry, shutdown).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("subscription server shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<SubscriptionRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(addr = %addr, error = %e, "handshake failed");
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    let (id, mut rx) = match registry.register() {
        Ok(registered) => registered,
        Err(e) => {
            warn!(addr = %addr, error = %e, "rejecting subscriber");
            let frame = CloseFrame {
                code: CloseCode::Again,
                reason: e.to_string().into(),
            };
            let _ = write.send(Message::Close(Some(frame))).await;
            return;
        }
    };
    debug!(addr = %addr, connection = id, "subscriber connected");

    loop {
        tokio::select! {
            pushed = rx.recv() => {
                let Some(msg) = pushed else { break };
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(connection = id, error = %e, "failed to encode push");
                        continue;
                    }
                };
                if write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => match ClientMessage::parse(&text) {
                    Ok(ClientMessage::Subscribe { filters }) => {
                        if let Err(e) = registry.set_filters(id, filters) {
                            warn!(connection = id, error = %e, "failed to apply filters");
                        }
                    }
                    Err(e) => warn!(connection = id, error = %e, "ignoring malformed control message"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection = id, error = %e, "read error");
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_ok() && !*shutdown.borrow() {
                    continue;
                }
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }

    let _ = registry.remove(id);
    debug!(addr = %addr, connection = id, "subscriber disconnected");
}
