//! Starter daemon — boots reserved VMs.

use std::sync::Arc;

use anyhow::{Context, Result};
use vmpool_cloud::{AzureScaleSet, TokenCredential};
use vmpool_core::{ScaleSetConfig, ScalerConfig};
use vmpool_scaler::{JobRunner, JobTimings, Starter};

#[tokio::main]
async fn main() -> Result<()> {
    vmpoold::init_tracing();

    let scale_set_config = ScaleSetConfig::load().context("failed to load scale set config")?;
    let scaler_config = ScalerConfig::load().context("failed to load scaler config")?;
    let timings = JobTimings::from_config(&scaler_config)?;

    let credential = Arc::new(TokenCredential::from_env(&scale_set_config.tenant_id));
    let telemetry = vmpoold::telemetry_sink(&scale_set_config);
    let scale_set = Arc::new(AzureScaleSet::new(scale_set_config, credential));
    let store = vmpoold::connect_state_store().await?;

    let starter = Starter::new(scale_set, store, telemetry, &scaler_config);

    let runner = JobRunner::start(starter, timings);
    vmpoold::wait_for_shutdown().await?;
    runner.stop();
    Ok(())
}
