//! Relay connection handler
//!
//! Reads frames from one peer into the hub and writes everyone else's frames
//! back out.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use super::{RelayFrame, RelayHub};
use crate::protocol;

/// Handle a single peer connection until it closes
pub async fn handle_connection(stream: TcpStream, hub: Arc<RelayHub>) {
    let addr = stream.peer_addr().ok();

    // Accept WebSocket handshake
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    // Register with the hub and serve until either side goes away
    let mut peer = PeerConnection::new(ws, hub);
    tracing::info!("Peer {} connected from {:?}", peer.peer_id, addr);
    peer.run().await;
    tracing::info!("Peer {} disconnected", peer.peer_id);
}

struct PeerConnection {
    ws: WebSocketStream<TcpStream>,
    hub: Arc<RelayHub>,
    peer_id: String,
    frames: broadcast::Receiver<RelayFrame>,
}

impl PeerConnection {
    fn new(ws: WebSocketStream<TcpStream>, hub: Arc<RelayHub>) -> Self {
        let uuid = uuid::Uuid::new_v4().to_string();
        let peer_id = format!("peer_{}", uuid.split('-').next().unwrap_or(&uuid));
        let frames = hub.subscribe();
        hub.add_peer();
        Self {
            ws,
            hub,
            peer_id,
            frames,
        }
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                // Frames from this peer
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.relay(text),
                        Some(Ok(Message::Close(_))) => {
                            tracing::debug!("Peer {} requested close", self.peer_id);
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = self.ws.send(Message::Pong(data)).await;
                        }
                        Some(Err(e)) => {
                            tracing::warn!("WebSocket error from {}: {}", self.peer_id, e);
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }

                // Frames from other peers
                frame = self.frames.recv() => {
                    match frame {
                        Ok(frame) if frame.from != self.peer_id => {
                            if let Err(e) = self.ws.send(Message::Text(frame.frame)).await {
                                tracing::warn!("Failed to forward to {}: {}", self.peer_id, e);
                                break;
                            }
                        }
                        // Our own frame coming back
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("Peer {} lagged, {} frames skipped", self.peer_id, skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    fn relay(&self, text: String) {
        // Only well-formed updates are fanned out
        match protocol::decode(&text) {
            Ok(update) => {
                tracing::debug!("Relaying {} from {}", update.cell_key(), self.peer_id);
                self.hub.publish(&self.peer_id, text);
            }
            Err(e) => {
                tracing::warn!("Dropping malformed frame from {}: {}", self.peer_id, e);
            }
        }
    }
}

impl Drop for PeerConnection {
    // Cleanup on disconnect
    fn drop(&mut self) {
        self.hub.remove_peer();
    }
}
