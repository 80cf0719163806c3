//! `ddi-agent`: polls a hawkBit server and applies the reference device behaviour.

mod config;
mod handler;

use std::sync::Arc;

use anyhow::Context;
use ddi_client::{CancellationToken, DdiClient};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::AgentConfig;
use crate::handler::{DeviceHandler, EnvAuthRestorer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::from_env().context("invalid agent configuration")?;
    info!(
        "Starting ddi-agent {} (downloads in {})",
        env!("CARGO_PKG_VERSION"),
        config.download_dir.display()
    );

    let client = DdiClient::builder(Arc::new(DeviceHandler::new(&config.download_dir)))
        .config(config.client.clone())
        .auth_error_handler(Arc::new(EnvAuthRestorer))
        .build();
    config.apply(&client)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    if let Err(e) = client.run(cancel).await {
        error!("Poll loop stopped: {}", e);
        return Err(e.into());
    }
    info!("ddi-agent stopped");
    Ok(())
}
