//! Peer relay
//!
//! A small WebSocket server that lets dashboard processes act as each other's
//! sync peers. Every valid frame received from one connection is re-broadcast
//! unchanged to all other connections.
//!
//! ```text
//! peer A ──frame──►┐
//!                  ├── RelayHub (broadcast) ──► peer B, peer C (not A)
//! peer B ──frame──►┘
//! ```

pub mod connection;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub use connection::handle_connection;

/// Frames buffered per peer before it starts lagging
const RELAY_CAPACITY: usize = 1024;

/// A frame in flight through the relay
#[derive(Debug, Clone)]
pub struct RelayFrame {
    pub from: String,
    pub frame: String,
}

/// Shared fan-out point for all relay connections
pub struct RelayHub {
    tx: broadcast::Sender<RelayFrame>,
    peers: AtomicUsize,
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(RELAY_CAPACITY);
        Self {
            tx,
            peers: AtomicUsize::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayFrame> {
        self.tx.subscribe()
    }

    /// Queue `frame` for every peer except `from`. Returns how many receivers
    /// it was queued for (including the sender's own receiver).
    pub fn publish(&self, from: &str, frame: String) -> usize {
        self.tx
            .send(RelayFrame {
                from: from.to_string(),
                frame,
            })
            .unwrap_or(0)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }

    pub(crate) fn add_peer(&self) {
        self.peers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn remove_peer(&self) {
        self.peers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Accept connections forever, one task per peer
pub async fn serve(listener: TcpListener, hub: Arc<RelayHub>) -> std::io::Result<()> {
    tracing::info!("Relay listening on ws://{}", listener.local_addr()?);
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::info!("Accepted connection from {}", addr);
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    handle_connection(stream, hub).await;
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {}", e);
            }
        }
    }
}
