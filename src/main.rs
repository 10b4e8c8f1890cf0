//! Lanbridge relay - entry point.
//!
//! This binary captures UDP broadcasts on the local interface and relays
//! them as unicasts to the peers listed in the configuration, until Ctrl-C.

use anyhow::{Context, Result};
use tracing::{info, warn};

use lanbridge::config::Config;
use lanbridge::engine::RelayEngine;

async fn run() -> Result<()> {
    let config = Config::load("config.toml").context("Failed to load configuration")?;

    lanbridge::metrics::init(&config.metrics).context("Failed to start metrics exporter")?;

    info!("Starting lanbridge broadcast relay...");
    info!("Capture port: {}", config.capture_port);

    let engine = RelayEngine::with_config(config.engine());

    for addr in &config.receivers {
        if engine.add_receiver(addr) {
            info!("Receiver: {addr}");
        } else {
            warn!("Skipping unparseable receiver address: {addr}");
        }
    }

    engine
        .start()
        .await
        .context("Failed to start capture engine (raw sockets need elevated privileges)")?;
    info!(
        "Relaying broadcasts to {} receiver(s)",
        engine.list_receivers().len()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Ctrl-C received, shutting down...");

    engine.shutdown().await;
    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    run().await
}
