//! panelsync CLI entry point
//!
//! # Usage
//!
//! ```bash
//! panelsync relay --port 9850
//! panelsync --url ws://127.0.0.1:9850 watch --scope project-1
//! panelsync --url ws://127.0.0.1:9850 publish --scope project-1 --field title --value '"Hello"'
//! panelsync fetch --base-url http://localhost:8080/api --path projects --samples samples.json
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::net::TcpListener;

use panelsync::cli::{Cli, Commands, FetchArgs, PublishArgs, RelayArgs, WatchArgs};
use panelsync::config::SyncConfig;
use panelsync::data::{DataArbitrator, HttpSource, SampleStore};
use panelsync::protocol::UpdateDraft;
use panelsync::relay::{self, RelayHub};
use panelsync::sync::{ConnectionManager, UpdateBus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("panelsync={}", level).parse()?),
        )
        .init();

    let config = cli.load_config()?;

    match &cli.command {
        Commands::Relay(args) => run_relay(args).await,
        Commands::Watch(args) => run_watch(&config, args).await,
        Commands::Publish(args) => run_publish(&config, args).await,
        Commands::Fetch(args) => run_fetch(&config, args).await,
    }
}

async fn run_relay(args: &RelayArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding relay to {}", addr))?;
    relay::serve(listener, Arc::new(RelayHub::new())).await?;
    Ok(())
}

fn connect(config: &SyncConfig) -> anyhow::Result<Arc<ConnectionManager>> {
    if config.transport.websocket_url.is_none() && config.transport.polling_url.is_none() {
        bail!("no sync endpoint configured (use --url, --polling-url or the config file)");
    }
    let manager = Arc::new(ConnectionManager::from_config(config));
    manager.start();
    Ok(manager)
}

async fn run_watch(config: &SyncConfig, args: &WatchArgs) -> anyhow::Result<()> {
    let manager = connect(config)?;
    let bus = UpdateBus::attached(&config.bus, Arc::clone(&manager));

    let subscription = bus.subscribe(args.scope.as_str(), |update| {
        match serde_json::to_string(update) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to print update: {}", e),
        }
    });
    tracing::info!("Watching scope {}", subscription.scope_id());

    tokio::signal::ctrl_c().await?;

    subscription.unsubscribe();
    manager.shutdown().await;
    tracing::info!("Final status: {:?}", manager.status());
    Ok(())
}

async fn run_publish(config: &SyncConfig, args: &PublishArgs) -> anyhow::Result<()> {
    let manager = connect(config)?;
    let bus = UpdateBus::attached(&config.bus, Arc::clone(&manager));

    let update = bus.publish(UpdateDraft::new(
        args.scope.as_str(),
        args.field.as_str(),
        args.json_value(),
    ));
    tracing::debug!("Published {} at {}", update.cell_key(), update.timestamp);

    let deadline = tokio::time::Instant::now() + Duration::from_millis(args.wait_ms);
    while manager.status().sync_count == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let status = manager.status();
    let pending = manager.pending_len();
    manager.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&status)?);
    if pending > 0 {
        bail!(
            "update for {} was not delivered within {}ms",
            update.cell_key(),
            args.wait_ms
        );
    }
    Ok(())
}

async fn run_fetch(config: &SyncConfig, args: &FetchArgs) -> anyhow::Result<()> {
    let source = HttpSource::new(args.base_url.as_str())?;
    let samples = match &args.samples {
        Some(path) => SampleStore::load_from(path)?,
        None => SampleStore::new(),
    };

    let arbitrator = DataArbitrator::new(&config.data);
    let mut options = arbitrator.options();
    if let Some(ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let key = args.sample_key();
    let response = arbitrator
        .fetch(
            args.path.as_str(),
            |_| source.get::<serde_json::Value>(&args.path),
            |_| samples.get::<serde_json::Value>(key),
            options,
        )
        .await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
