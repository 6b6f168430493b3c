use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod api;
mod config;
mod engine;
mod error;
mod models;
mod query;
mod stats;

use crate::config::{MonitorConfig, DEFAULT_SITES};
use crate::engine::Monitor;
use crate::models::MonitorState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .with_ansi(true)
        .init();

    let config_path = std::env::var("SITE_MONITOR_CONFIG").unwrap_or_else(|_| "config.json".into());
    let config = MonitorConfig::load(&config_path)?;

    let state = Arc::new(MonitorState::new(DEFAULT_SITES.iter().copied()));
    let monitor = Arc::new(Monitor::new(config.clone(), Arc::clone(&state))?);

    let api_state = Arc::clone(&state);
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::start_server(api_port, api_state).await {
            error!("API server failed: {:#}", e);
        }
    });

    tokio::spawn(monitor.run());

    signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping site monitor...");

    Ok(())
}
