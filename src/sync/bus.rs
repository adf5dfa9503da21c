//! In-process update bus
//!
//! Routes updates between local editors, local display subscribers, and the
//! connection manager.
//!
//! # Ordering
//!
//! - Local publishes are applied locally first, then forwarded: subscribers see
//!   an editor's own edit before `publish` returns, without waiting on the
//!   network (optimistic local echo).
//! - Inbound updates pass a last-write-wins filter per `(scope_id, field)`: an
//!   update strictly older than the newest one already dispatched for that
//!   cell is dropped. Equal timestamps are dispatched.
//! - Accepting and dispatching an update is one step with respect to other
//!   threads: the last value a subscriber sees for a cell is the newest.
//!
//! # Ownership
//!
//! The bus keeps only `Weak` references to callbacks. The [`Subscription`]
//! handle owns the callback; calling `unsubscribe` or dropping the handle
//! removes the registration.

use std::any::Any;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::manager::ConnectionManager;
use crate::config::BusConfig;
use crate::protocol::{self, now_millis, SyncUpdate, UpdateDraft};

type Callback = dyn Fn(&SyncUpdate) + Send + Sync;
type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

struct Registration {
    id: u64,
    callback: Weak<Callback>,
}

struct BusState {
    next_id: u64,
    scopes: HashMap<String, Vec<Registration>>,
    /// Newest dispatched timestamp per `scope_id:field`
    latest: LruCache<String, i64>,
}

impl BusState {
    fn register(&mut self, scope_id: &str, callback: Weak<Callback>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.scopes
            .entry(scope_id.to_string())
            .or_default()
            .push(Registration { id, callback });
        id
    }

    fn remove(&mut self, scope_id: &str, id: u64) {
        if let Some(regs) = self.scopes.get_mut(scope_id) {
            regs.retain(|r| r.id != id);
            if regs.is_empty() {
                self.scopes.remove(scope_id);
            }
        }
    }

    /// Live callbacks for a scope in registration order, pruning dead ones
    fn callbacks(&mut self, scope_id: &str) -> Vec<Arc<Callback>> {
        let Some(regs) = self.scopes.get_mut(scope_id) else {
            return Vec::new();
        };
        let mut live = Vec::with_capacity(regs.len());
        regs.retain(|r| match r.callback.upgrade() {
            Some(cb) => {
                live.push(cb);
                true
            }
            None => false,
        });
        if regs.is_empty() {
            self.scopes.remove(scope_id);
        }
        live
    }

    /// Record `update` as dispatched unless a newer write to its cell already was
    fn accept(&mut self, update: &SyncUpdate) -> bool {
        let key = update.cell_key();
        match self.latest.get(&key) {
            Some(&newest) if newest > update.timestamp => false,
            _ => {
                self.latest.put(key, update.timestamp);
                true
            }
        }
    }

    /// Record a local write; never moves a cell's timestamp backwards
    fn record(&mut self, update: &SyncUpdate) {
        let key = update.cell_key();
        let newest = match self.latest.get(&key) {
            Some(&existing) => existing.max(update.timestamp),
            None => update.timestamp,
        };
        self.latest.put(key, newest);
    }
}

/// Shared dispatch core; the inbound pump holds this, not the bus
struct Dispatcher {
    /// Held from the last-write-wins check until callbacks return, so
    /// dispatches reach subscribers in the order they were accepted.
    /// Reentrant: a callback may publish.
    order: ReentrantMutex<()>,
    state: Mutex<BusState>,
}

impl Dispatcher {
    fn receive(&self, update: SyncUpdate) -> bool {
        let _order = self.order.lock();
        if !self.state.lock().accept(&update) {
            tracing::debug!(
                "Dropping stale update for {} (timestamp {})",
                update.cell_key(),
                update.timestamp
            );
            return false;
        }
        self.dispatch(&update);
        true
    }

    fn dispatch(&self, update: &SyncUpdate) {
        // Lock released before any callback runs
        let callbacks = self.state.lock().callbacks(&update.scope_id);
        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(update))) {
                tracing::error!(
                    "Subscriber for scope {} panicked: {}",
                    update.scope_id,
                    panic_message(&panic)
                );
            }
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle for one registered callback
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    scope_id: String,
    id: u64,
    callback: Option<Arc<Callback>>,
    dispatcher: Weak<Dispatcher>,
}

impl Subscription {
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// Stop receiving updates. A dispatch already in progress may still
    /// deliver one last update.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.callback.take().is_none() {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.state.lock().remove(&self.scope_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Per-scope pub/sub with last-write-wins ordering
pub struct UpdateBus {
    dispatcher: Arc<Dispatcher>,
    clock: Clock,
    manager: Option<Arc<ConnectionManager>>,
    pump: Option<JoinHandle<()>>,
}

impl UpdateBus {
    /// Standalone bus with no network side
    pub fn new(config: &BusConfig) -> Self {
        let capacity = NonZeroUsize::new(config.lww_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            dispatcher: Arc::new(Dispatcher {
                order: ReentrantMutex::new(()),
                state: Mutex::new(BusState {
                    next_id: 0,
                    scopes: HashMap::new(),
                    latest: LruCache::new(capacity),
                }),
            }),
            clock: Arc::new(now_millis),
            manager: None,
            pump: None,
        }
    }

    /// Bus wired to a connection manager: publishes are forwarded to it and its
    /// inbound updates are dispatched here.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attached(config: &BusConfig, manager: Arc<ConnectionManager>) -> Self {
        let mut bus = Self::new(config);
        let mut inbound = manager.subscribe_inbound();
        let dispatcher = Arc::clone(&bus.dispatcher);
        bus.pump = Some(tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Ok(update) => {
                        dispatcher.receive(update);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Update bus lagged, {} inbound updates skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        bus.manager = Some(manager);
        bus
    }

    /// Replace the timestamp source used by `publish`
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn manager(&self) -> Option<&Arc<ConnectionManager>> {
        self.manager.as_ref()
    }

    /// Register `callback` for every dispatched update whose scope matches
    pub fn subscribe(
        &self,
        scope_id: impl Into<String>,
        callback: impl Fn(&SyncUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        let scope_id = scope_id.into();
        let callback: Arc<Callback> = Arc::new(callback);
        let id = self
            .dispatcher
            .state
            .lock()
            .register(&scope_id, Arc::downgrade(&callback));
        Subscription {
            scope_id,
            id,
            callback: Some(callback),
            dispatcher: Arc::downgrade(&self.dispatcher),
        }
    }

    /// Stamp an editor's draft, dispatch it locally, then forward it to the
    /// connection manager. Returns the stamped update.
    pub fn publish(&self, draft: UpdateDraft) -> SyncUpdate {
        let update = draft.stamp((self.clock)());
        {
            let _order = self.dispatcher.order.lock();
            self.dispatcher.state.lock().record(&update);
            self.dispatcher.dispatch(&update);
        }
        if let Some(manager) = &self.manager {
            manager.publish(update.clone());
        }
        update
    }

    /// Apply an inbound update. Returns `false` if it was stale and dropped.
    pub fn receive(&self, update: SyncUpdate) -> bool {
        self.dispatcher.receive(update)
    }

    /// Decode and apply a raw inbound frame. Malformed frames are logged and
    /// dropped.
    pub fn receive_frame(&self, frame: &str) -> bool {
        match protocol::decode(frame) {
            Ok(update) => self.receive(update.into_peer()),
            Err(e) => {
                tracing::warn!("Dropping malformed inbound frame: {}", e);
                false
            }
        }
    }

    /// Number of live registrations for a scope
    pub fn subscriber_count(&self, scope_id: &str) -> usize {
        self.dispatcher.state.lock().callbacks(scope_id).len()
    }
}

impl Drop for UpdateBus {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
