//! In-process transport
//!
//! [`LocalTransport::pair`] returns the transport plus the [`LocalPeer`] that
//! plays the remote side. Dropping the peer closes the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{EventSink, TransportError, TransportEvent};
use crate::protocol::{self, SyncUpdate};

pub struct LocalTransport {
    to_peer: mpsc::UnboundedSender<String>,
    from_peer: Option<mpsc::UnboundedReceiver<String>>,
    open: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

/// Remote end of a [`LocalTransport`]
pub struct LocalPeer {
    to_transport: mpsc::UnboundedSender<String>,
    from_transport: mpsc::UnboundedReceiver<String>,
}

impl LocalTransport {
    pub fn pair() -> (LocalTransport, LocalPeer) {
        let (to_peer, from_transport) = mpsc::unbounded_channel();
        let (to_transport, from_peer) = mpsc::unbounded_channel();
        (
            LocalTransport {
                to_peer,
                from_peer: Some(from_peer),
                open: Arc::new(AtomicBool::new(false)),
                task: None,
            },
            LocalPeer {
                to_transport,
                from_transport,
            },
        )
    }

    pub async fn connect(&mut self, events: EventSink) -> Result<(), TransportError> {
        let mut from_peer = self.from_peer.take().ok_or(TransportError::Closed)?;
        let open = Arc::clone(&self.open);
        self.task = Some(tokio::spawn(async move {
            while let Some(frame) = from_peer.recv().await {
                if events.send(TransportEvent::Frame(frame)).is_err() {
                    return;
                }
            }
            open.store(false, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Closed);
        }));
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn send(&self, update: &SyncUpdate) -> bool {
        if !self.is_open() {
            return false;
        }
        match protocol::encode(update) {
            Ok(frame) => self.to_peer.send(frame).is_ok(),
            Err(_) => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl LocalPeer {
    /// Push a raw frame to the transport
    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.to_transport.send(frame.into()).is_ok()
    }

    pub fn send_update(&self, update: &SyncUpdate) -> bool {
        match protocol::encode(update) {
            Ok(frame) => self.send_frame(frame),
            Err(_) => false,
        }
    }

    /// Next frame the transport sent, waiting if none is queued
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.from_transport.recv().await
    }

    /// Next update the transport sent, if one is already queued
    pub fn try_recv_update(&mut self) -> Option<SyncUpdate> {
        let frame = self.from_transport.try_recv().ok()?;
        protocol::decode(&frame).ok()
    }
}
