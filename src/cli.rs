//! CLI argument definitions using clap with subcommand architecture

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::config::SyncConfig;
use crate::error::Result;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG: &str = "panelsync.toml";

/// Live-update sync for dashboard panels
#[derive(Parser, Debug)]
#[command(name = "panelsync")]
#[command(about = "Field-level live sync between dashboard processes")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML config file
    #[arg(long, global = true, env = "PANELSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// WebSocket endpoint, overrides the config file
    #[arg(long, global = true, env = "PANELSYNC_URL")]
    pub url: Option<String>,

    /// HTTP polling endpoint used when WebSocket is unavailable
    #[arg(long, global = true)]
    pub polling_url: Option<String>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands for panelsync
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a relay that forwards updates between peers
    Relay(RelayArgs),

    /// Print every update for a scope as JSON
    #[command(visible_alias = "w")]
    Watch(WatchArgs),

    /// Publish a single field update
    #[command(visible_alias = "p")]
    Publish(PublishArgs),

    /// Fetch a query through the data arbitrator
    Fetch(FetchArgs),
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "9850")]
    pub port: u16,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Scope to watch
    #[arg(short, long)]
    pub scope: String,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Scope the field belongs to
    #[arg(short, long)]
    pub scope: String,

    /// Field name
    #[arg(short, long)]
    pub field: String,

    /// New value as JSON (bare words are sent as strings)
    #[arg(long)]
    pub value: String,

    /// How long to wait for the update to leave the process
    #[arg(long, default_value = "5000")]
    pub wait_ms: u64,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Base URL of the live API
    #[arg(long)]
    pub base_url: String,

    /// Path of the query under the base URL
    #[arg(long)]
    pub path: String,

    /// JSON file of sample payloads used as fallback
    #[arg(long)]
    pub samples: Option<PathBuf>,

    /// Sample key, defaults to the path
    #[arg(long)]
    pub key: Option<String>,

    /// Primary source timeout, overrides the config file
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl PublishArgs {
    /// Parse `--value` as JSON, falling back to a plain string
    pub fn json_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.value)
            .unwrap_or_else(|_| serde_json::Value::String(self.value.clone()))
    }
}

impl FetchArgs {
    pub fn sample_key(&self) -> &str {
        self.key
            .as_deref()
            .unwrap_or_else(|| self.path.trim_start_matches('/'))
    }
}

impl Cli {
    /// Load the config file (explicit path, else `panelsync.toml` if present)
    /// and apply command-line overrides.
    pub fn load_config(&self) -> Result<SyncConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
        let mut config = SyncConfig::load_from(Path::new(&path))?;

        if let Some(url) = &self.url {
            config.transport.websocket_url = Some(url.clone());
        }
        if let Some(url) = &self.polling_url {
            config.transport.polling_url = Some(url.clone());
        }
        Ok(config)
    }
}
