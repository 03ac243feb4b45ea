//! Provisioner daemon — keeps the scale set at pool capacity.

use std::sync::Arc;

use anyhow::{Context, Result};
use vmpool_cloud::{AzureAppConfig, AzureApplicationGateway, AzureScaleSet, TokenCredential};
use vmpool_core::{AppConfigSettings, GatewayConfig, ScaleSetConfig, ScalerConfig};
use vmpool_scaler::{JobRunner, JobTimings, Provisioner};

#[tokio::main]
async fn main() -> Result<()> {
    vmpoold::init_tracing();

    let scale_set_config = ScaleSetConfig::load().context("failed to load scale set config")?;
    let gateway_config = GatewayConfig::load().context("failed to load gateway config")?;
    let scaler_config = ScalerConfig::load().context("failed to load scaler config")?;
    let app_config_settings =
        AppConfigSettings::load().context("failed to load app configuration settings")?;
    let timings = JobTimings::from_config(&scaler_config)?;

    let credential = Arc::new(TokenCredential::from_env(&scale_set_config.tenant_id));
    let telemetry = vmpoold::telemetry_sink(&scale_set_config);
    let scale_set = Arc::new(AzureScaleSet::new(scale_set_config, credential.clone()));
    let gateway = Arc::new(AzureApplicationGateway::new(
        gateway_config,
        credential.clone(),
    ));
    let app_config = AzureAppConfig::new(&app_config_settings, credential);

    let provisioner = Provisioner::new(
        scale_set,
        gateway,
        telemetry,
        Some(&app_config),
        &scaler_config,
    )
    .await;

    let runner = JobRunner::start(provisioner, timings);
    vmpoold::wait_for_shutdown().await?;
    runner.stop();
    Ok(())
}
