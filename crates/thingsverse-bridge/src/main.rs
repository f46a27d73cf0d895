//! `thingsverse-bridge` binary.
//!
//! Binds the broker feed, wires an in-memory store behind a call timeout,
//! and runs the bridge until Ctrl-C or a fatal transport error.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use thingsverse_bridge::config::LoggingSection;
use thingsverse_bridge::errors::fatal_exit;
use thingsverse_bridge::transport::feed::FeedServer;
use thingsverse_bridge::{Bridge, BridgeConfig, BridgeError, BridgeRuntime, MemoryStore, TimeoutStore};

#[derive(Debug, Parser)]
#[command(name = "thingsverse-bridge", version, about = "Thingsverse session-to-identity bridge")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the broker feed listen address.
    #[arg(short, long)]
    listen: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        fatal_exit(&e);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = BridgeConfig::load(cli.config.as_deref())?;
    config.apply_env()?;
    if let Some(listen) = cli.listen {
        config.feed.listen_addr = listen;
    }
    config.validate()?;

    init_tracing(&config.logging, cli.verbose);

    let store = Arc::new(TimeoutStore::new(
        MemoryStore::with_capacity(config.storage.max_samples_per_type),
        config.storage.timeout(),
    ));

    let (event_tx, event_rx) = mpsc::channel(config.feed.event_buffer.max(1));
    let (server, publisher) = FeedServer::bind(&config.feed, event_tx)
        .await
        .map_err(|e| BridgeError::Bootstrap(format!("cannot bind {}: {e}", config.feed.listen_addr)))?;
    let addr = server.local_addr().context("feed listener address")?;
    tokio::spawn(server.run());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!(addr = %addr, "Thingsverse bridge is running");
    let bridge = Arc::new(Bridge::new(store, Arc::new(publisher)));
    BridgeRuntime::new(bridge).run(event_rx, shutdown_rx).await?;
    Ok(())
}

fn init_tracing(logging: &LoggingSection, verbose: u8) {
    let default_level = match verbose {
        0 => logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
