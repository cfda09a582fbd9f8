//! Structured logging setup

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Install a JSON `tracing` subscriber filtered by `service.log_level`
///
/// An invalid filter falls back to `info`. If a global subscriber is already
/// installed this is a no-op.
pub fn init_tracing(config: &Config) -> Result<()> {
    let log_level = config.service.log_level.clone();

    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    match installed {
        Ok(()) => tracing::info!("Tracing initialized for service: {}", config.service.name),
        Err(_) => tracing::debug!("Global tracing subscriber already installed"),
    }

    Ok(())
}

/// Flush logging before exit
pub fn shutdown_tracing() {
    tracing::info!("Tracing shutdown complete");
}
