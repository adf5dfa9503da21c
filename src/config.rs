//! panelsync configuration management.
//!
//! All tunables live in one TOML file. Every section and key is optional;
//! missing values fall back to the defaults below.
//!
//! ```toml
//! [transport]
//! websocket_url = "ws://127.0.0.1:9850"
//! polling_url = "http://127.0.0.1:8080/api/sync"
//!
//! [reconnect]
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::SyncError;

/// panelsync configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    /// Transport endpoints and timeouts
    #[serde(default)]
    pub transport: TransportConfig,

    /// Reconnect and queueing policy
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Update bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Data arbitration settings
    #[serde(default)]
    pub data: ArbitratorConfig,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WebSocket endpoint of the peer channel
    #[serde(default)]
    pub websocket_url: Option<String>,

    /// HTTP endpoint used when no WebSocket can be constructed
    #[serde(default)]
    pub polling_url: Option<String>,

    /// Handshake timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Interval between polling GETs
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_url: None,
            polling_url: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Reconnect-with-backoff policy for the connection manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Attempt counter cap; past it every retry waits `max_delay_ms`
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Updates kept for resend while disconnected
    #[serde(default = "default_pending_limit")]
    pub pending_limit: usize,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_pending_limit() -> usize {
    50
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            pending_limit: default_pending_limit(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry that follows failed attempt `attempt`.
    ///
    /// `min(base * 2^attempt, max)`, and exactly `max` once the attempt
    /// counter has reached its cap. Non-decreasing in `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let max = self.max_delay_ms;
        if attempt >= self.max_reconnect_attempts {
            return Duration::from_millis(max);
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(max))
    }
}

/// Update bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Cells remembered for last-write-wins comparison
    #[serde(default = "default_lww_capacity")]
    pub lww_capacity: usize,
}

fn default_lww_capacity() -> usize {
    500
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            lww_capacity: default_lww_capacity(),
        }
    }
}

/// Data arbitrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitratorConfig {
    /// Primary source timeout before falling back
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl Default for ArbitratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl ArbitratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SyncConfig {
    /// Load configuration from a specific path
    ///
    /// A missing file yields the default configuration.
    pub fn load_from(path: &Path) -> Result<Self, SyncError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| SyncError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, SyncError> {
        let config: Self = toml::from_str(content).map_err(|e| SyncError::ConfigError {
            message: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(SyncError::ConfigError {
                message: format!(
                    "reconnect.base_delay_ms ({}) exceeds reconnect.max_delay_ms ({})",
                    self.reconnect.base_delay_ms, self.reconnect.max_delay_ms
                ),
            });
        }
        if self.bus.lww_capacity == 0 {
            return Err(SyncError::ConfigError {
                message: "bus.lww_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.transport.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.transport.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.reconnect.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect.pending_limit, 50);
        assert_eq!(config.bus.lww_capacity, 500);
        assert_eq!(config.data.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SyncConfig::parse(
            r#"
            [transport]
            websocket_url = "ws://localhost:9850"

            [reconnect]
            base_delay_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(
            config.transport.websocket_url.as_deref(),
            Some("ws://localhost:9850")
        );
        assert_eq!(config.reconnect.base_delay_ms, 250);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let err = SyncConfig::parse("[reconnect]\nbase_delay_ms = 5000\nmax_delay_ms = 10\n")
            .unwrap_err();
        assert!(matches!(err, SyncError::ConfigError { .. }));
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..8)
            .map(|a| policy.delay_for(a).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]
        );
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let policy = ReconnectPolicy {
            base_delay_ms: 300,
            max_delay_ms: 7_000,
            max_reconnect_attempts: 40,
            pending_limit: 10,
        };
        let mut previous = Duration::ZERO;
        for attempt in 0..80 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "attempt {} went backwards", attempt);
            assert!(delay <= Duration::from_millis(7_000));
            previous = delay;
        }
    }
}
