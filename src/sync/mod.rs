//! Live field-level sync channel
//!
//! # Architecture
//!
//! ```text
//! ┌──────────── process A ────────────┐          ┌──────────── process B ────────────┐
//! │ editor ──publish──► UpdateBus     │          │     UpdateBus ──► display panels  │
//! │            (local echo) │         │          │         ▲ last-write-wins         │
//! │                         ▼         │          │         │                         │
//! │              ConnectionManager ───┼─ frame ──┼─► ConnectionManager               │
//! │              (Transport, backoff) │  (relay) │     (Transport, backoff)          │
//! └───────────────────────────────────┘          └───────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `state` - `ConnectionState`, `SyncStatus`, pending queue
//! - `manager` - `ConnectionManager` (reconnect state machine)
//! - `bus` - `UpdateBus` (pub/sub, ordering, local echo)

pub mod bus;
pub mod manager;
pub mod state;

pub use bus::{Subscription, UpdateBus};
pub use manager::ConnectionManager;
pub use state::{ConnectionState, PendingQueue, SyncStatus};
