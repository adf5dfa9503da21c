//! ConnectionManager integration tests over in-process transports
//!
//! ```bash
//! cargo test --test connection_manager
//! ```

use std::time::Duration;

use serde_json::json;

use panelsync::protocol::{self, SyncUpdate, UpdateSource};
use panelsync::ConnectionState;

mod common;
use common::{local_manager, wait_for};

fn update(field: &str, n: i64) -> SyncUpdate {
    SyncUpdate::new("project-1", field, json!(n), n, UpdateSource::Editor)
}

// ============================================================================
// CONNECT / RECONNECT
// ============================================================================

#[tokio::test]
async fn connects_after_failed_attempts() {
    let (manager, _peer) = local_manager(3);
    manager.start();

    assert!(wait_for(|| manager.status().connected).await);
    let status = manager.status();
    assert_eq!(status.error_count, 3);
    assert_eq!(manager.attempt(), 0);
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.shutdown().await;
}

#[tokio::test]
async fn peer_going_away_triggers_reconnect() {
    let (manager, peer) = local_manager(0);
    manager.start();
    assert!(wait_for(|| manager.status().connected).await);

    drop(peer);

    assert!(wait_for(|| !manager.status().connected).await);
    assert!(manager.status().error_count >= 1);
    assert_ne!(manager.state(), ConnectionState::Connected);

    manager.shutdown().await;
}

#[tokio::test]
async fn start_twice_is_noop() {
    let (manager, _peer) = local_manager(0);
    manager.start();
    manager.start();
    assert!(wait_for(|| manager.status().connected).await);
    assert_eq!(manager.status().error_count, 0);
    manager.shutdown().await;
}

// ============================================================================
// OUTBOUND
// ============================================================================

#[tokio::test]
async fn publish_reaches_peer() {
    let (manager, mut peer) = local_manager(0);
    manager.start();
    assert!(wait_for(|| manager.status().connected).await);

    let sent = update("title", 42);
    manager.publish(sent.clone());

    let frame = tokio::time::timeout(Duration::from_secs(2), peer.recv_frame())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(protocol::decode(&frame).unwrap(), sent);

    let status = manager.status();
    assert_eq!(status.sync_count, 1);
    assert!(status.last_sync_at.is_some());

    manager.shutdown().await;
}

#[tokio::test]
async fn queue_before_start_keeps_newest() {
    let (manager, mut peer) = local_manager(0);
    for n in 0..60 {
        manager.publish(update("title", n));
    }
    assert_eq!(manager.pending_len(), 50);
    assert_eq!(manager.status().error_count, 0);

    manager.start();

    let mut received = Vec::new();
    for _ in 0..50 {
        let frame = tokio::time::timeout(Duration::from_secs(2), peer.recv_frame())
            .await
            .unwrap()
            .unwrap();
        received.push(protocol::decode(&frame).unwrap().timestamp);
    }
    assert_eq!(received, (10..60).collect::<Vec<i64>>());
    assert_eq!(manager.pending_len(), 0);
    assert_eq!(manager.status().sync_count, 50);

    manager.shutdown().await;
}

// ============================================================================
// INBOUND
// ============================================================================

#[tokio::test]
async fn inbound_updates_are_marked_peer() {
    let (manager, peer) = local_manager(0);
    let mut inbound = manager.subscribe_inbound();
    manager.start();
    assert!(wait_for(|| manager.status().connected).await);

    assert!(peer.send_update(&update("title", 7)));

    let received = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.source, UpdateSource::Peer);
    assert_eq!(received.value, json!(7));
    assert_eq!(manager.status().sync_count, 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_counts_error_and_keeps_connection() {
    let (manager, peer) = local_manager(0);
    let mut inbound = manager.subscribe_inbound();
    manager.start();
    assert!(wait_for(|| manager.status().connected).await);

    assert!(peer.send_frame("not json"));
    assert!(peer.send_frame(r#"{"v":2,"scope_id":"p","field":"f","value":1,"timestamp":1}"#));
    assert!(wait_for(|| manager.status().error_count == 2).await);
    assert!(manager.status().connected);

    assert!(peer.send_update(&update("title", 9)));
    let received = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.timestamp, 9);
    assert_eq!(manager.status().sync_count, 1);

    manager.shutdown().await;
}

// ============================================================================
// STOP
// ============================================================================

#[tokio::test]
async fn stop_closes_and_ignores_publish() {
    let (manager, mut peer) = local_manager(0);
    manager.start();
    assert!(wait_for(|| manager.status().connected).await);

    manager.shutdown().await;
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert!(!manager.status().connected);

    manager.publish(update("title", 1));
    assert_eq!(manager.pending_len(), 0);
    assert!(peer.try_recv_update().is_none());
    assert_eq!(manager.status().sync_count, 0);
}

#[tokio::test]
async fn stop_during_backoff_exits_promptly() {
    let (manager, _peer) = local_manager(u32::MAX);
    manager.start();
    assert!(wait_for(|| manager.status().error_count >= 1).await);

    tokio::time::timeout(Duration::from_secs(1), manager.shutdown())
        .await
        .unwrap();
    assert_eq!(manager.state(), ConnectionState::Closed);
}
