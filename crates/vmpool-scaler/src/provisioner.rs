//! Provisioner loop — keeps the scale set at pool capacity.
//!
//! Each tick grows the scale set to `pool_capacity` (never shrinks it),
//! publishes the resulting inventory's path routes to the gateway, then
//! partitions the newly added VMs: the first `effective_warm` stay untouched
//! (their own provisioning script shuts them into `stopped`), the rest are
//! deallocated into the cold pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info, warn};

use vmpool_cloud::{GatewayProvider, PoolConfigProvider, ScaleSetProvider, TelemetrySink};
use vmpool_core::{ListFilter, PowerState, ScalerConfig, VmOperation};

use crate::schedule::Job;

pub struct Provisioner {
    scale_set: Arc<dyn ScaleSetProvider>,
    gateway: Arc<dyn GatewayProvider>,
    telemetry: Arc<dyn TelemetrySink>,
    geo_name: String,
    pool_capacity: u64,
    warm_pool_size: u64,
    warm_pool_enabled: bool,
}

impl Provisioner {
    /// Build the loop, reading pool sizing from the dynamic-configuration
    /// source once. A failed read falls back to the static configuration
    /// for the lifetime of the process.
    pub async fn new(
        scale_set: Arc<dyn ScaleSetProvider>,
        gateway: Arc<dyn GatewayProvider>,
        telemetry: Arc<dyn TelemetrySink>,
        pool_config: Option<&dyn PoolConfigProvider>,
        config: &ScalerConfig,
    ) -> Self {
        let mut pool_capacity = config.pool_capacity;
        let mut warm_pool_size = config.warm_pool_size;
        let mut warm_pool_enabled = config.warm_pool_enabled;

        if let Some(provider) = pool_config {
            match provider.parse_configuration().await {
                Ok(settings) => {
                    pool_capacity = settings.pool_capacity;
                    warm_pool_size = settings.warm_pool_size;
                    warm_pool_enabled = settings.warm_pool_enabled;
                    info!(
                        pool_capacity,
                        warm_pool_size, warm_pool_enabled, "using dynamic pool configuration"
                    );
                }
                Err(e) => {
                    warn!(
                        error = format!("{e:#}"),
                        "failed to read dynamic configuration, using static values"
                    );
                }
            }
        }

        Self {
            scale_set,
            gateway,
            telemetry,
            geo_name: config.geo_name.clone(),
            pool_capacity,
            warm_pool_size,
            warm_pool_enabled,
        }
    }

    async fn provision(&self, op: &mut VmOperation) -> Result<()> {
        // Snapshot before growing so new VMs can be told apart after.
        let old_set: HashSet<String> = self
            .scale_set
            .list_instances(ListFilter::default())
            .await
            .context("failed to list instances before scaling")?
            .into_iter()
            .map(|i| i.vm_id)
            .collect();

        if let Err(e) = self.scale_set.create_instances(self.pool_capacity).await {
            op.fail(format!("{e:#}"));
            return Err(e.context("failed to provision instances"));
        }

        let inventory = self
            .scale_set
            .list_instances(ListFilter::default())
            .await
            .context("failed to list instances after scaling")?;

        if let Err(e) = self.gateway.update_path_based_rules(&inventory).await {
            op.fail(format!("{e:#}"));
            return Err(e.context("failed to update path-based rules"));
        }

        let provisioned: Vec<String> = inventory
            .iter()
            .filter(|i| !old_set.contains(&i.vm_id))
            .map(|i| i.instance_id.clone())
            .collect();

        let current_warm = self
            .scale_set
            .list_instances(ListFilter::with_power_states(&[PowerState::Stopped]))
            .await
            .context("failed to list warm instances")?
            .len() as u64;

        let effective_warm = self.effective_warm_pool(current_warm);

        let mut warm_count: u64 = 0;
        for instance_id in &provisioned {
            if warm_count < effective_warm {
                // Left running; the VM's own provisioning script shuts it
                // into `stopped`.
                info!(instance_id, "instance added to warm pool");
                warm_count += 1;
            } else if let Err(e) = self.scale_set.stop_instance(instance_id).await {
                error!(instance_id, error = format!("{e:#}"), "failed to deallocate instance");
            } else {
                info!(instance_id, "instance deallocated into cold pool");
            }
        }

        if !provisioned.is_empty() {
            info!(
                provisioned = provisioned.len(),
                warm = warm_count,
                cold = provisioned.len() as u64 - warm_count,
                "provisioning pass complete"
            );
        }
        Ok(())
    }

    /// How many of this tick's new VMs go warm. Zero when the warm pool is
    /// disabled or its size is not within `1..=pool_capacity`.
    fn effective_warm_pool(&self, current_warm: u64) -> u64 {
        if self.warm_pool_enabled
            && self.warm_pool_size > 0
            && self.warm_pool_size <= self.pool_capacity
        {
            let effective = self.warm_pool_size.saturating_sub(current_warm);
            info!(effective, "effective warm pool size");
            effective
        } else {
            if self.warm_pool_enabled {
                warn!(
                    size = self.warm_pool_size,
                    capacity = self.pool_capacity,
                    "invalid warm pool configuration, disabling warm pool"
                );
            }
            0
        }
    }
}

#[async_trait]
impl Job for Provisioner {
    fn name(&self) -> &'static str {
        "provisioner"
    }

    async fn run_once(&mut self) -> Result<()> {
        let started = Instant::now();
        let mut op = VmOperation::new("provision", &self.geo_name);
        let result = self.provision(&mut op).await;
        op.duration = started.elapsed();
        self.telemetry.track_operation(op);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmpool_cloud::fake::{FakeGateway, FakePoolConfig, FakeScaleSet, RecordingTelemetry};
    use vmpool_cloud::PoolSettings;
    use vmpool_core::VmInstance;

    fn config(pool_capacity: u64, warm_size: u64, warm_enabled: bool) -> ScalerConfig {
        ScalerConfig {
            pool_capacity,
            job_interval: 60,
            job_timeout: 180,
            vm_runtime: 360,
            job_delay: 10,
            geo_name: "westeurope".to_string(),
            warm_pool_size: warm_size,
            warm_pool_enabled: warm_enabled,
        }
    }

    async fn provisioner(
        scale_set: &FakeScaleSet,
        gateway: &FakeGateway,
        telemetry: &RecordingTelemetry,
        cfg: &ScalerConfig,
    ) -> Provisioner {
        Provisioner::new(
            Arc::new(scale_set.clone()),
            Arc::new(gateway.clone()),
            Arc::new(telemetry.clone()),
            None,
            cfg,
        )
        .await
    }

    #[tokio::test]
    async fn grows_empty_pool_and_deallocates_cold_instances() {
        let scale_set = FakeScaleSet::new();
        let gateway = FakeGateway::new();
        let telemetry = RecordingTelemetry::new();
        let mut loop_ =
            provisioner(&scale_set, &gateway, &telemetry, &config(2, 0, false)).await;

        loop_.run_once().await.unwrap();

        let instances = scale_set.instances();
        assert_eq!(instances.len(), 2);
        // Warm pool disabled: both new instances are deallocated.
        assert!(instances
            .iter()
            .all(|i| i.power_state == PowerState::Deallocated));
        assert_eq!(scale_set.stopped().len(), 2);

        // No private IPs registered yet, so the gateway is untouched.
        assert_eq!(gateway.publish_count(), 0);

        let events = telemetry.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, "provision");
        assert!(events[0].success);
    }

    #[tokio::test]
    async fn gateway_routes_follow_the_inventory() {
        let scale_set = FakeScaleSet::new();
        let gateway = FakeGateway::new();
        let telemetry = RecordingTelemetry::new();
        let mut loop_ =
            provisioner(&scale_set, &gateway, &telemetry, &config(2, 0, false)).await;

        loop_.run_once().await.unwrap();
        assert_eq!(gateway.publish_count(), 0);

        // NICs register between ticks; the next tick publishes the routes.
        scale_set.assign_private_ips();
        loop_.run_once().await.unwrap();

        let vm_ids: Vec<String> = scale_set
            .instances()
            .iter()
            .map(|i| format!("/{}", i.vm_id))
            .collect();
        let paths = gateway.paths();
        assert_eq!(paths.len(), 2);
        for vm_id in vm_ids {
            assert!(paths.contains(&vm_id));
        }
        assert_eq!(gateway.publish_count(), 1);

        // A further tick with nothing new publishes nothing.
        loop_.run_once().await.unwrap();
        assert_eq!(gateway.publish_count(), 1);
    }

    #[tokio::test]
    async fn first_new_instances_stay_warm() {
        let scale_set = FakeScaleSet::new();
        let gateway = FakeGateway::new();
        let telemetry = RecordingTelemetry::new();
        let mut loop_ = provisioner(&scale_set, &gateway, &telemetry, &config(3, 2, true)).await;

        loop_.run_once().await.unwrap();

        // Two of three new instances are left to shut themselves down, one
        // is deallocated.
        assert_eq!(scale_set.stopped().len(), 1);
        let running = scale_set
            .instances()
            .iter()
            .filter(|i| i.power_state == PowerState::Running)
            .count();
        assert_eq!(running, 2);
    }

    #[tokio::test]
    async fn existing_warm_instances_reduce_the_warm_quota() {
        let scale_set = FakeScaleSet::with_instances(vec![VmInstance {
            vm_id: "vm-warm".to_string(),
            instance_id: "0".to_string(),
            private_ip: "10.0.0.4".to_string(),
            public_ip: "0.0.0.0".to_string(),
            power_state: PowerState::Stopped,
        }]);
        let gateway = FakeGateway::new();
        let telemetry = RecordingTelemetry::new();
        let mut loop_ = provisioner(&scale_set, &gateway, &telemetry, &config(3, 2, true)).await;

        loop_.run_once().await.unwrap();

        // One warm VM already exists, so only one of the two new instances
        // stays warm.
        assert_eq!(scale_set.stopped().len(), 1);
    }

    #[tokio::test]
    async fn invalid_warm_configuration_disables_the_warm_pool() {
        let scale_set = FakeScaleSet::new();
        let gateway = FakeGateway::new();
        let telemetry = RecordingTelemetry::new();
        // warm size above capacity is invalid
        let mut loop_ = provisioner(&scale_set, &gateway, &telemetry, &config(2, 5, true)).await;

        loop_.run_once().await.unwrap();

        assert_eq!(scale_set.stopped().len(), 2);
    }

    #[tokio::test]
    async fn dynamic_configuration_overrides_static_values() {
        let scale_set = FakeScaleSet::new();
        let gateway = FakeGateway::new();
        let telemetry = RecordingTelemetry::new();
        let dynamic = FakePoolConfig::with_settings(PoolSettings {
            pool_capacity: 4,
            warm_pool_size: 0,
            warm_pool_enabled: false,
        });

        let mut loop_ = Provisioner::new(
            Arc::new(scale_set.clone()),
            Arc::new(gateway.clone()),
            Arc::new(telemetry.clone()),
            Some(&dynamic),
            &config(2, 0, false),
        )
        .await;

        loop_.run_once().await.unwrap();
        assert_eq!(scale_set.instances().len(), 4);
    }

    #[tokio::test]
    async fn unavailable_dynamic_configuration_falls_back() {
        let scale_set = FakeScaleSet::new();
        let gateway = FakeGateway::new();
        let telemetry = RecordingTelemetry::new();
        let dynamic = FakePoolConfig::unavailable();

        let mut loop_ = Provisioner::new(
            Arc::new(scale_set.clone()),
            Arc::new(gateway.clone()),
            Arc::new(telemetry.clone()),
            Some(&dynamic),
            &config(2, 0, false),
        )
        .await;

        loop_.run_once().await.unwrap();
        assert_eq!(scale_set.instances().len(), 2);
    }

    #[tokio::test]
    async fn growth_failure_aborts_the_tick_and_marks_telemetry() {
        let scale_set = FakeScaleSet::new();
        scale_set.fail_next_create();
        let gateway = FakeGateway::new();
        let telemetry = RecordingTelemetry::new();
        let mut loop_ =
            provisioner(&scale_set, &gateway, &telemetry, &config(2, 0, false)).await;

        assert!(loop_.run_once().await.is_err());

        assert!(scale_set.instances().is_empty());
        assert_eq!(gateway.publish_count(), 0);

        let events = telemetry.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert!(events[0].error_message.is_some());
    }
}
