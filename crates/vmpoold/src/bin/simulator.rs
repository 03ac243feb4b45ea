//! Simulator daemon — synthetic reservation traffic for the pool.

use anyhow::{Context, Result};
use vmpool_core::ScalerConfig;
use vmpool_scaler::{JobRunner, JobTimings, Simulator};

#[tokio::main]
async fn main() -> Result<()> {
    vmpoold::init_tracing();

    let scaler_config = ScalerConfig::load().context("failed to load scaler config")?;
    let timings = JobTimings::from_config(&scaler_config)?;

    let store = vmpoold::connect_state_store().await?;
    let simulator = Simulator::new(store);

    let runner = JobRunner::start(simulator, timings);
    vmpoold::wait_for_shutdown().await?;
    runner.stop();
    Ok(())
}
