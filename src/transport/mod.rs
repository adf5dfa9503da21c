//! Duplex transports to a peer process
//!
//! A [`Transport`] is one connection attempt. The connection manager builds a
//! fresh one through a [`Connector`] for every attempt and never looks at which
//! variant it got.
//!
//! # Events
//!
//! `connect` resolving `Ok` is the open event. Everything after that arrives on
//! the [`EventSink`] handed to `connect`:
//!
//! ```text
//! Frame(text)              one inbound JSON frame (or synthesized poll record)
//! Undelivered{update,..}   an accepted outbound update that failed later (polling POST)
//! Error(e) / Closed        the transport is finished; build a new one
//! ```

pub mod connector;
pub mod local;
pub mod polling;
pub mod websocket;

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::SyncUpdate;

pub use connector::{ConfiguredConnector, Connector};
pub use local::{LocalPeer, LocalTransport};
pub use polling::PollingTransport;
pub use websocket::WebSocketTransport;

/// Transport-level failures. Recovered by reconnecting, never surfaced to
/// update subscribers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid endpoint {url}: {message}")]
    InvalidEndpoint { url: String, message: String },

    #[error("no websocket_url or polling_url configured")]
    NotConfigured,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("socket error: {0}")]
    Socket(String),

    #[error("http error: {0}")]
    Http(String),
}

/// Event emitted by an open transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Frame(String),
    Undelivered {
        update: SyncUpdate,
        error: TransportError,
    },
    Error(TransportError),
    Closed,
}

/// Receiving half is owned by the connection manager
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Which variant a transport is, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Polling,
    Local,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Polling => write!(f, "polling"),
            TransportKind::Local => write!(f, "local"),
        }
    }
}

/// One connection to a peer
pub enum Transport {
    WebSocket(WebSocketTransport),
    Polling(PollingTransport),
    Local(LocalTransport),
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::WebSocket(_) => TransportKind::WebSocket,
            Transport::Polling(_) => TransportKind::Polling,
            Transport::Local(_) => TransportKind::Local,
        }
    }

    /// Open the transport. Resolves once it is ready to `send`.
    pub async fn connect(&mut self, events: EventSink) -> Result<(), TransportError> {
        match self {
            Transport::WebSocket(t) => t.connect(events).await,
            Transport::Polling(t) => t.connect(events).await,
            Transport::Local(t) => t.connect(events).await,
        }
    }

    /// Hand an update to the wire. Returns `false` when the transport is not
    /// open or the write could not be queued.
    pub fn send(&self, update: &SyncUpdate) -> bool {
        match self {
            Transport::WebSocket(t) => t.send(update),
            Transport::Polling(t) => t.send(update),
            Transport::Local(t) => t.send(update),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Transport::WebSocket(t) => t.is_open(),
            Transport::Polling(t) => t.is_open(),
            Transport::Local(t) => t.is_open(),
        }
    }

    pub fn close(&self) {
        match self {
            Transport::WebSocket(t) => t.close(),
            Transport::Polling(t) => t.close(),
            Transport::Local(t) => t.close(),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.kind())
            .field("open", &self.is_open())
            .finish()
    }
}
