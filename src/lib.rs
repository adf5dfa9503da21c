//! panelsync: live-update sync for dashboard panels
//!
//! Keeps field-level edits consistent between processes that render the same
//! data, and gives every panel a single way to fetch data with a fallback.
//!
//! - [`transport`] - WebSocket, HTTP polling and in-process channels
//! - [`sync`] - the connection manager (reconnect, queueing, status) and the
//!   scope-keyed update bus with last-write-wins
//! - [`data`] - primary/fallback arbitration with provenance tagging
//! - [`relay`] - a WebSocket server that fans frames out between peers
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use panelsync::{ConnectionManager, SyncConfig, UpdateBus, UpdateDraft};
//!
//! let config = SyncConfig::load_from("panelsync.toml".as_ref())?;
//! let manager = Arc::new(ConnectionManager::from_config(&config));
//! manager.start();
//!
//! let bus = UpdateBus::attached(&config.bus, Arc::clone(&manager));
//! let _sub = bus.subscribe("project-1", |update| println!("{:?}", update.value));
//! bus.publish(UpdateDraft::new("project-1", "title", "Hello".into()));
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod sync;
pub mod transport;

// Re-export commonly used types
pub use cli::Cli;
pub use config::{ArbitratorConfig, BusConfig, ReconnectPolicy, SyncConfig, TransportConfig};
pub use data::{DataArbitrator, DataResponse, DataStatus, FetchOptions, SourceError};
pub use error::{Result, SyncError};
pub use protocol::{SyncUpdate, UpdateDraft, UpdateSource};
pub use relay::RelayHub;
pub use sync::{ConnectionManager, ConnectionState, Subscription, SyncStatus, UpdateBus};
pub use transport::{Connector, Transport, TransportError, TransportKind};
