//! Connection state and status snapshot types

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::protocol::SyncUpdate;

/// Connection manager lifecycle
///
/// ```text
/// Idle ──start()──► Connecting ──open──► Connected
///                      ▲   │                │
///                      │   └──fail──┐  close/error
///                   backoff         ▼       │
///                      └──────── Reconnecting ◄┘
///
/// any ──stop()──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Read-only status snapshot handed to callers (connection badges)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub connected: bool,
    /// Time of the last successful send or receive, ms since the epoch
    pub last_sync_at: Option<i64>,
    /// Updates sent or received successfully
    pub sync_count: u64,
    /// Connection failures, failed sends and malformed frames
    pub error_count: u64,
}

/// Bounded FIFO of updates awaiting resend; drops the oldest when full
#[derive(Debug, Clone)]
pub struct PendingQueue {
    items: VecDeque<SyncUpdate>,
    limit: usize,
}

impl PendingQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    /// Queue an update. Returns the update evicted to make room, if any.
    pub fn push(&mut self, update: SyncUpdate) -> Option<SyncUpdate> {
        if self.limit == 0 {
            return Some(update);
        }
        let evicted = if self.items.len() >= self.limit {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(update);
        evicted
    }

    /// Put back updates that could not be flushed, ahead of anything queued
    /// since, then re-apply the bound
    pub fn requeue_front(&mut self, updates: Vec<SyncUpdate>) {
        for update in updates.into_iter().rev() {
            self.items.push_front(update);
        }
        while self.items.len() > self.limit {
            self.items.pop_front();
        }
    }

    /// Oldest queued update
    pub fn pop_front(&mut self) -> Option<SyncUpdate> {
        self.items.pop_front()
    }

    pub fn drain(&mut self) -> Vec<SyncUpdate> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UpdateSource;
    use serde_json::json;

    fn update(n: i64) -> SyncUpdate {
        SyncUpdate::new("p1", "f", json!(n), n, UpdateSource::Editor)
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let mut queue = PendingQueue::new(3);
        for n in 0..3 {
            assert!(queue.push(update(n)).is_none());
        }
        let evicted = queue.push(update(3)).unwrap();
        assert_eq!(evicted.timestamp, 0);

        let kept: Vec<i64> = queue.drain().iter().map(|u| u.timestamp).collect();
        assert_eq!(kept, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_front_preserves_order() {
        let mut queue = PendingQueue::new(4);
        queue.push(update(10));
        queue.requeue_front(vec![update(1), update(2)]);
        let order: Vec<i64> = queue.drain().iter().map(|u| u.timestamp).collect();
        assert_eq!(order, vec![1, 2, 10]);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let status = SyncStatus {
            connected: true,
            last_sync_at: Some(5),
            sync_count: 2,
            error_count: 1,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["last_sync_at"], json!(5));
        assert_eq!(json["error_count"], json!(1));
    }
}
