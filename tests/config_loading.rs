//! Config file loading

use std::io::Write;
use std::time::Duration;

use panelsync::{SyncConfig, SyncError};

#[test]
fn full_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[transport]
websocket_url = "ws://relay.local:9850"
polling_url = "http://relay.local/sync"
connect_timeout_ms = 2000
poll_interval_ms = 1500

[reconnect]
base_delay_ms = 500
max_delay_ms = 8000
max_reconnect_attempts = 4
pending_limit = 20

[bus]
lww_capacity = 64

[data]
timeout_ms = 3000
"#
    )
    .unwrap();

    let config = SyncConfig::load_from(file.path()).unwrap();
    assert_eq!(
        config.transport.websocket_url.as_deref(),
        Some("ws://relay.local:9850")
    );
    assert_eq!(config.transport.poll_interval(), Duration::from_millis(1500));
    assert_eq!(config.reconnect.delay_for(0), Duration::from_millis(500));
    assert_eq!(config.reconnect.delay_for(3), Duration::from_millis(4000));
    assert_eq!(config.reconnect.delay_for(4), Duration::from_millis(8000));
    assert_eq!(config.reconnect.pending_limit, 20);
    assert_eq!(config.bus.lww_capacity, 64);
    assert_eq!(config.data.timeout(), Duration::from_secs(3));
}

#[test]
fn missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig::load_from(&dir.path().join("panelsync.toml")).unwrap();
    assert!(config.transport.websocket_url.is_none());
    assert_eq!(config.reconnect.max_delay_ms, 30_000);
}

#[test]
fn invalid_toml_is_config_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[transport\nwebsocket_url = 1").unwrap();

    let err = SyncConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, SyncError::ConfigError { .. }));
}

#[test]
fn zero_lww_capacity_rejected() {
    let err = SyncConfig::parse("[bus]\nlww_capacity = 0").unwrap_err();
    assert!(err.to_string().contains("lww_capacity"));
}
