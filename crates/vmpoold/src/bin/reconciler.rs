//! Reconciler daemon — converges the state store onto the cloud inventory.

use std::sync::Arc;

use anyhow::{Context, Result};
use vmpool_cloud::{AzureScaleSet, TokenCredential};
use vmpool_core::{ScaleSetConfig, ScalerConfig};
use vmpool_scaler::{JobRunner, JobTimings, Reconciler};

#[tokio::main]
async fn main() -> Result<()> {
    vmpoold::init_tracing();

    let scale_set_config = ScaleSetConfig::load().context("failed to load scale set config")?;
    let scaler_config = ScalerConfig::load().context("failed to load scaler config")?;
    let timings = JobTimings::from_config(&scaler_config)?;

    let credential = Arc::new(TokenCredential::from_env(&scale_set_config.tenant_id));
    let scale_set = Arc::new(AzureScaleSet::new(scale_set_config, credential));
    let store = vmpoold::connect_state_store().await?;

    let reconciler = Reconciler::new(scale_set, store, &scaler_config);

    let runner = JobRunner::start(reconciler, timings);
    vmpoold::wait_for_shutdown().await?;
    runner.stop();
    Ok(())
}
