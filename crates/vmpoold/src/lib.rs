//! vmpoold — process bootstrap shared by the five loop executables.
//!
//! Each executable is a singleton control loop: it reads its configuration
//! from the environment, builds its own clients, arms its loop, and waits
//! for an interrupt or terminate signal. Exit code 0 means a clean stop;
//! construction failures exit non-zero after a fatal log.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use vmpool_cloud::{AppInsights, NoopTelemetry, TelemetrySink};
use vmpool_core::{RedisConfig, ScaleSetConfig};
use vmpool_state::{RedisStore, StateStore};

/// Structured logging to standard error, filtered by `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();
}

/// Connect to the shared state store using the environment configuration.
pub async fn connect_state_store() -> Result<Arc<dyn StateStore>> {
    let config = RedisConfig::load().context("failed to load redis config")?;
    let store = RedisStore::connect(&config)
        .await
        .context("failed to connect to state store")?;
    Ok(Arc::new(store))
}

/// The telemetry sink for this process: Application Insights when an
/// instrumentation key is configured, a no-op otherwise.
pub fn telemetry_sink(config: &ScaleSetConfig) -> Arc<dyn TelemetrySink> {
    if config.instrumentation_key.is_empty() {
        warn!("no instrumentation key configured, telemetry disabled");
        Arc::new(NoopTelemetry)
    } else {
        Arc::new(AppInsights::new(&config.instrumentation_key))
    }
}

/// Block until SIGINT or SIGTERM.
pub async fn wait_for_shutdown() -> Result<()> {
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for SIGINT")?;
        }
        _ = terminate.recv() => {}
    }
    info!("shutdown signal received");
    Ok(())
}
