//! Error types and exit codes for panelsync

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Main error type for panelsync operations
///
/// Runtime faults of the sync channel and the data arbitrator are reported as
/// data (`SyncStatus`, `DataResponse`) and never surface here. This type covers
/// setup failures: bad configuration, unreadable files, and transports that
/// cannot be constructed at all.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Config error: {message}")]
    ConfigError { message: String },

    #[error("IO error at {path}: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Convert error to a process exit code:
    /// - 1: IO error
    /// - 2: Config error
    /// - 3: Protocol error
    /// - 4: Transport error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::IoError { .. } | Self::Io(_) => ExitCode::from(1),
            Self::ConfigError { .. } => ExitCode::from(2),
            Self::Protocol(_) => ExitCode::from(3),
            Self::Transport(_) => ExitCode::from(4),
        }
    }
}

/// Result type alias for panelsync operations
pub type Result<T> = std::result::Result<T, SyncError>;
