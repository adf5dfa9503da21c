//! Shared helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;

use panelsync::config::{ReconnectPolicy, SyncConfig, TransportConfig};
use panelsync::relay::{self, RelayHub};
use panelsync::transport::{LocalPeer, LocalTransport};
use panelsync::{ConnectionManager, Transport, TransportError};

/// Poll `cond` every 10ms for up to two seconds
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Policy with short delays so reconnect tests finish quickly
pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay_ms: 10,
        max_delay_ms: 40,
        max_reconnect_attempts: 5,
        pending_limit: 50,
    }
}

/// Manager whose connector fails `failures` times, then hands out one
/// in-process transport. Later builds fail with `Closed`.
pub fn local_manager(failures: u32) -> (Arc<ConnectionManager>, LocalPeer) {
    let (transport, peer) = LocalTransport::pair();
    let slot = Mutex::new(Some(transport));
    let calls = AtomicU32::new(0);

    let connector = move || -> Result<Transport, TransportError> {
        if calls.fetch_add(1, Ordering::SeqCst) < failures {
            return Err(TransportError::Handshake("connection refused".into()));
        }
        slot.lock()
            .take()
            .map(Transport::Local)
            .ok_or(TransportError::Closed)
    };

    (
        Arc::new(ConnectionManager::new(connector, fast_policy())),
        peer,
    )
}

/// Start a relay on an ephemeral port
pub async fn spawn_relay() -> (SocketAddr, Arc<RelayHub>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hub = Arc::new(RelayHub::new());
    tokio::spawn(relay::serve(listener, Arc::clone(&hub)));
    (addr, hub)
}

/// A local address nothing is listening on
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn websocket_config(addr: SocketAddr) -> SyncConfig {
    SyncConfig {
        transport: TransportConfig {
            websocket_url: Some(format!("ws://{}", addr)),
            connect_timeout_ms: 1_000,
            ..TransportConfig::default()
        },
        reconnect: fast_policy(),
        ..SyncConfig::default()
    }
}
