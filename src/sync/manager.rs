//! Connection manager: one live transport, reconnect with backoff, status
//!
//! The manager is constructed explicitly by the application and shared as an
//! `Arc`. `start()` spawns a driver task on the current tokio runtime; `stop()`
//! cancels it.
//!
//! # Locking
//!
//! All mutable state sits in one `parking_lot::Mutex<ManagerCore>`. The lock is
//! never held across an `.await`; `Transport::send` only enqueues, so calling
//! it under the lock is fine.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::state::{ConnectionState, PendingQueue, SyncStatus};
use crate::config::{ReconnectPolicy, SyncConfig};
use crate::protocol::{self, now_millis, SyncUpdate};
use crate::transport::{ConfiguredConnector, Connector, Transport, TransportError, TransportEvent};

/// Inbound updates buffered per listener before it starts lagging
const INBOUND_CAPACITY: usize = 256;

/// Upper bound on waiting for a failed transport to hand back its backlog
const RECOVER_TIMEOUT: Duration = Duration::from_secs(1);

/// Synchronous state machine behind [`ConnectionManager`]
#[derive(Debug)]
pub(crate) struct ManagerCore {
    policy: ReconnectPolicy,
    state: ConnectionState,
    status: SyncStatus,
    attempt: u32,
    pending: PendingQueue,
    transport: Option<Arc<Transport>>,
}

impl ManagerCore {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        let pending = PendingQueue::new(policy.pending_limit);
        Self {
            policy,
            state: ConnectionState::Idle,
            status: SyncStatus::default(),
            attempt: 0,
            pending,
            transport: None,
        }
    }

    fn open_transport(&self) -> Option<Arc<Transport>> {
        match (&self.transport, self.state) {
            (Some(transport), ConnectionState::Connected) => Some(Arc::clone(transport)),
            _ => None,
        }
    }

    fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub(crate) fn begin_connecting(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// Transport opened. Resets the attempt counter and flushes the pending
    /// queue. Returns `false` if the manager was stopped meanwhile.
    pub(crate) fn on_open(&mut self, transport: Arc<Transport>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.status.connected = true;
        self.attempt = 0;
        self.transport = Some(transport);

        if !self.pending.is_empty() {
            tracing::info!("Flushing {} queued updates", self.pending.len());
        }
        self.flush_pending();
        true
    }

    /// Send queued updates in order through the open transport, stopping at
    /// the first failed send. Returns `true` when the queue was emptied.
    pub(crate) fn flush_pending(&mut self) -> bool {
        let Some(transport) = self.open_transport() else {
            return false;
        };
        while let Some(update) = self.pending.pop_front() {
            if transport.send(&update) {
                self.record_sync();
            } else {
                self.status.error_count += 1;
                self.pending.requeue_front(vec![update]);
                return false;
            }
        }
        true
    }

    /// Delay before bounced updates are retried on a live transport
    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.policy.base_delay_ms)
    }

    /// Connection attempt or live connection failed. Returns the backoff delay
    /// before the next attempt, or `None` if the manager is closed.
    pub(crate) fn on_failure(&mut self) -> Option<Duration> {
        if self.is_closed() {
            return None;
        }
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.state = ConnectionState::Reconnecting;
        self.status.connected = false;
        self.status.error_count += 1;

        let delay = self.policy.delay_for(self.attempt);
        self.attempt = (self.attempt + 1).min(self.policy.max_reconnect_attempts);
        Some(delay)
    }

    /// Queue behind anything still pending, then flush if connected, so a
    /// bounced update never falls behind newer ones
    pub(crate) fn publish(&mut self, update: SyncUpdate) {
        if self.is_closed() {
            return;
        }
        if self.pending.is_empty() {
            if let Some(transport) = self.open_transport() {
                if transport.send(&update) {
                    self.record_sync();
                } else {
                    self.status.error_count += 1;
                    self.enqueue(update);
                }
                return;
            }
        }
        self.enqueue(update);
        self.flush_pending();
    }

    pub(crate) fn on_undelivered(&mut self, update: SyncUpdate) {
        if self.is_closed() {
            return;
        }
        self.status.error_count += 1;
        self.enqueue(update);
    }

    pub(crate) fn on_inbound(&mut self) {
        self.record_sync();
    }

    pub(crate) fn on_malformed(&mut self) {
        self.status.error_count += 1;
    }

    /// Transition to `Closed`, handing back the active transport to close
    pub(crate) fn close(&mut self) -> Option<Arc<Transport>> {
        self.state = ConnectionState::Closed;
        self.status.connected = false;
        self.transport.take()
    }

    fn enqueue(&mut self, update: SyncUpdate) {
        if let Some(dropped) = self.pending.push(update) {
            tracing::warn!(
                "Pending queue full, dropping oldest update for {}",
                dropped.cell_key()
            );
        }
    }

    fn record_sync(&mut self) {
        self.status.sync_count += 1;
        self.status.last_sync_at = Some(now_millis());
    }
}

/// Owns the single transport of one logical sync channel
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    core: Mutex<ManagerCore>,
    inbound: broadcast::Sender<SyncUpdate>,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(connector: impl Connector + 'static, policy: ReconnectPolicy) -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            connector: Arc::new(connector),
            core: Mutex::new(ManagerCore::new(policy)),
            inbound,
            shutdown: CancellationToken::new(),
            driver: Mutex::new(None),
        }
    }

    /// Manager using the configured WebSocket/polling endpoints
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            ConfiguredConnector::new(config.transport.clone()),
            config.reconnect.clone(),
        )
    }

    /// Begin connecting. Only the first call on an idle manager has an effect.
    ///
    /// Must be called from within a tokio runtime. The driver task holds a
    /// reference to the manager until `stop()` is called.
    pub fn start(self: &Arc<Self>) {
        {
            let mut core = self.core.lock();
            if core.state != ConnectionState::Idle {
                return;
            }
            core.state = ConnectionState::Connecting;
        }

        tracing::info!("Starting sync connection");
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.driver.lock() = Some(handle);
    }

    /// Cancel any pending backoff, close the transport and enter `Closed`.
    /// Later `publish` calls are no-ops.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let transport = self.core.lock().close();
        if let Some(transport) = transport {
            transport.close();
        }
        tracing::info!("Sync connection stopped");
    }

    /// `stop()` and wait for the driver task to exit
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Send an update now if connected; otherwise queue it for the next
    /// successful connection.
    pub fn publish(&self, update: SyncUpdate) {
        self.core.lock().publish(update);
    }

    /// Copy of the current status
    pub fn status(&self) -> SyncStatus {
        self.core.lock().status.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.core.lock().state
    }

    /// Current reconnect-attempt counter
    pub fn attempt(&self) -> u32 {
        self.core.lock().attempt
    }

    /// Number of updates waiting for resend
    pub fn pending_len(&self) -> usize {
        self.core.lock().pending.len()
    }

    /// Receive every decoded inbound update (source set to `Peer`)
    pub fn subscribe_inbound(&self) -> broadcast::Receiver<SyncUpdate> {
        self.inbound.subscribe()
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() || !self.core.lock().begin_connecting() {
                break;
            }

            // Fresh transport and event channel per attempt
            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            // Build and connect, abandoning the handshake on stop()
            let outcome = match self.connector.build() {
                Ok(mut transport) => {
                    let connected = tokio::select! {
                        _ = self.shutdown.cancelled() => None,
                        result = transport.connect(events_tx) => Some(result),
                    };
                    let Some(result) = connected else { break };
                    result.map(|()| transport)
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(transport) => {
                    let kind = transport.kind();
                    let transport = Arc::new(transport);
                    // Stopped while the handshake was in flight
                    if !self.core.lock().on_open(Arc::clone(&transport)) {
                        transport.close();
                        break;
                    }
                    tracing::info!("Sync connected over {}", kind);

                    // Serve the open transport until it fails
                    match self.pump(&mut events_rx).await {
                        Some(reason) => {
                            tracing::warn!("Sync connection lost: {}", reason);
                            transport.close();
                            self.recover_undelivered(&mut events_rx).await;
                        }
                        None => break,
                    }
                }
                Err(e) => tracing::warn!("Sync connect failed: {}", e),
            }

            // Count the failure and pick the next delay
            let delay = self.core.lock().on_failure();
            let Some(delay) = delay else { break };
            tracing::info!("Reconnecting in {:?}", delay);

            // Backoff, cut short by stop()
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!("Sync driver exited");
    }

    /// Handle events of an open transport until it fails. Returns `None` when
    /// the manager is being stopped.
    async fn pump(
        &self,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Option<TransportError> {
        let mut retry_at: Option<Instant> = None;
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => None,
                event = events.recv() => Some(event),
            };

            let Some(event) = event else {
                // Retry bounced updates on the still-open transport
                retry_at = None;
                let mut core = self.core.lock();
                if !core.flush_pending() {
                    retry_at = Some(Instant::now() + core.retry_delay());
                }
                continue;
            };

            match event {
                Some(TransportEvent::Frame(frame)) => self.handle_frame(&frame),
                Some(TransportEvent::Undelivered { update, error }) => {
                    tracing::warn!("Update for {} undelivered: {}", update.cell_key(), error);
                    let mut core = self.core.lock();
                    core.on_undelivered(update);
                    if retry_at.is_none() {
                        retry_at = Some(Instant::now() + core.retry_delay());
                    }
                }
                Some(TransportEvent::Error(e)) => return Some(e),
                Some(TransportEvent::Closed) | None => return Some(TransportError::Closed),
            }
        }
    }

    /// Collect updates a dead transport hands back while it shuts down, so
    /// they are resent after reconnecting
    async fn recover_undelivered(&self, events: &mut mpsc::UnboundedReceiver<TransportEvent>) {
        let drain = async {
            while let Some(event) = events.recv().await {
                if let TransportEvent::Undelivered { update, .. } = event {
                    tracing::debug!("Recovered undelivered update for {}", update.cell_key());
                    self.core.lock().on_undelivered(update);
                }
            }
        };
        // Transport tasks drop their senders once closed
        if tokio::time::timeout(RECOVER_TIMEOUT, drain).await.is_err() {
            tracing::debug!("Transport still draining after {:?}", RECOVER_TIMEOUT);
        }
    }

    fn handle_frame(&self, frame: &str) {
        match protocol::decode(frame) {
            Ok(update) => {
                tracing::debug!("Inbound update for {}", update.cell_key());
                self.core.lock().on_inbound();
                // No listeners is not an error
                let _ = self.inbound.send(update.into_peer());
            }
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
                self.core.lock().on_malformed();
            }
        }
    }
}
