//! Sync wire protocol and data model
//!
//! Every message on the wire is one JSON text frame holding a single
//! [`SyncUpdate`] wrapped in a versioned envelope:
//!
//! ```json
//! {"v":1,"scope_id":"p1","field":"headline","value":"Hello","timestamp":100,"source":"editor"}
//! ```
//!
//! Frames without a `v` tag come from peers that predate the envelope and are
//! read as version 1. Frames that carry any other version are rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current wire envelope version
pub const WIRE_VERSION: u32 = 1;

/// Where an update originated, relative to the process observing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// Produced by a local editing surface
    Editor,
    /// Received from another process over a transport
    #[default]
    Peer,
}

/// A single field-level edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncUpdate {
    pub scope_id: String,
    pub field: String,
    pub value: serde_json::Value,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub source: UpdateSource,
}

impl SyncUpdate {
    pub fn new(
        scope_id: impl Into<String>,
        field: impl Into<String>,
        value: serde_json::Value,
        timestamp: i64,
        source: UpdateSource,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            field: field.into(),
            value,
            timestamp,
            source,
        }
    }

    /// Key of the logical cell this update writes (`scope_id:field`)
    pub fn cell_key(&self) -> String {
        format!("{}:{}", self.scope_id, self.field)
    }

    /// Same update re-tagged as having arrived from a peer
    pub fn into_peer(mut self) -> Self {
        self.source = UpdateSource::Peer;
        self
    }
}

/// An edit as produced by an editing surface, before the bus stamps it
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDraft {
    pub scope_id: String,
    pub field: String,
    pub value: serde_json::Value,
}

impl UpdateDraft {
    pub fn new(
        scope_id: impl Into<String>,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            field: field.into(),
            value,
        }
    }

    /// Stamp the draft as an editor update at `timestamp`
    pub fn stamp(self, timestamp: i64) -> SyncUpdate {
        SyncUpdate {
            scope_id: self.scope_id,
            field: self.field,
            value: self.value,
            timestamp,
            source: UpdateSource::Editor,
        }
    }
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a> {
    v: u32,
    #[serde(flatten)]
    update: &'a SyncUpdate,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    #[serde(default = "legacy_version")]
    v: u32,
    #[serde(flatten)]
    update: SyncUpdate,
}

fn legacy_version() -> u32 {
    WIRE_VERSION
}

/// Body returned by the polling endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollResponse {
    /// Raw change records, forwarded one frame each
    #[serde(default)]
    pub changes: Vec<serde_json::Value>,
}

/// Errors decoding or encoding wire frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported envelope version {found}")]
    UnsupportedVersion { found: u32 },
}

/// Encode an update as a versioned JSON text frame
pub fn encode(update: &SyncUpdate) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&OutgoingEnvelope {
        v: WIRE_VERSION,
        update,
    })?)
}

/// Decode a JSON text frame into an update
pub fn decode(frame: &str) -> Result<SyncUpdate, ProtocolError> {
    let envelope: IncomingEnvelope = serde_json::from_str(frame)?;
    check_version(envelope)
}

fn check_version(envelope: IncomingEnvelope) -> Result<SyncUpdate, ProtocolError> {
    if envelope.v != WIRE_VERSION {
        return Err(ProtocolError::UnsupportedVersion { found: envelope.v });
    }
    Ok(envelope.update)
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
