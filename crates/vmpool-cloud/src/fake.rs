//! In-memory provider fakes.
//!
//! Same observable behavior as the Azure providers, held in plain state so
//! the loop test suites can seed inventories and assert on the calls made.
//! All fakes are cheap clones over shared state: tests keep one handle and
//! hand the other to the loop under test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use vmpool_core::{ListFilter, PowerState, VmInstance, VmOperation};

use crate::provider::{
    GatewayProvider, PoolConfigProvider, PoolSettings, ScaleSetProvider, TelemetrySink,
};
use crate::routes::{diff_path_rules, GatewayTarget, PathRule};

// ── Scale set ──────────────────────────────────────────────────────

#[derive(Default)]
struct ScaleSetInner {
    instances: Vec<VmInstance>,
    capacity: u64,
    next_ordinal: u64,
    started: Vec<String>,
    stopped: Vec<String>,
    deleted: Vec<String>,
    fail_create: bool,
}

/// In-memory scale set. New instances come up `Running` without a private
/// IP (the NIC registers later); [`FakeScaleSet::assign_private_ips`] stands
/// in for that registration.
#[derive(Clone, Default)]
pub struct FakeScaleSet {
    inner: Arc<Mutex<ScaleSetInner>>,
}

impl FakeScaleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the set with an existing inventory; capacity matches its size.
    pub fn with_instances(instances: Vec<VmInstance>) -> Self {
        let next_ordinal = instances
            .iter()
            .filter_map(|i| i.instance_id.parse::<u64>().ok())
            .max()
            .map(|max| max + 1)
            .unwrap_or(instances.len() as u64);
        Self {
            inner: Arc::new(Mutex::new(ScaleSetInner {
                capacity: instances.len() as u64,
                next_ordinal,
                instances,
                ..Default::default()
            })),
        }
    }

    /// Make the next capacity change fail.
    pub fn fail_next_create(&self) {
        self.inner.lock().unwrap().fail_create = true;
    }

    /// Give every instance without a private IP one, as NIC registration
    /// eventually does.
    pub fn assign_private_ips(&self) {
        let mut inner = self.inner.lock().unwrap();
        for vm in &mut inner.instances {
            if vm.private_ip.is_empty() {
                let ordinal: u64 = vm.instance_id.parse().unwrap_or(0);
                vm.private_ip = format!("10.0.0.{}", 4 + ordinal);
            }
        }
    }

    pub fn instances(&self) -> Vec<VmInstance> {
        self.inner.lock().unwrap().instances.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.inner.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.inner.lock().unwrap().stopped.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl ScaleSetProvider for FakeScaleSet {
    async fn create_instances(&self, desired_count: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_create {
            inner.fail_create = false;
            bail!("simulated capacity update failure");
        }
        if inner.capacity >= desired_count {
            return Ok(());
        }
        while inner.capacity < desired_count {
            let ordinal = inner.next_ordinal;
            inner.next_ordinal += 1;
            inner.capacity += 1;
            inner.instances.push(VmInstance {
                vm_id: Uuid::new_v4().to_string(),
                instance_id: ordinal.to_string(),
                private_ip: String::new(),
                public_ip: "0.0.0.0".to_string(),
                power_state: PowerState::Running,
            });
        }
        Ok(())
    }

    async fn start_instance(&self, instance_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(vm) = inner
            .instances
            .iter_mut()
            .find(|i| i.instance_id == instance_id)
        else {
            bail!("no such instance {instance_id}");
        };
        vm.power_state = PowerState::Running;
        inner.started.push(instance_id.to_string());
        Ok(())
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(vm) = inner
            .instances
            .iter_mut()
            .find(|i| i.instance_id == instance_id)
        else {
            bail!("no such instance {instance_id}");
        };
        vm.power_state = PowerState::Deallocated;
        inner.stopped.push(instance_id.to_string());
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.instances.len();
        inner.instances.retain(|i| i.instance_id != instance_id);
        if inner.instances.len() == before {
            bail!("no such instance {instance_id}");
        }
        inner.capacity = inner.instances.len() as u64;
        inner.deleted.push(instance_id.to_string());
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<VmInstance> {
        let inner = self.inner.lock().unwrap();
        match inner.instances.iter().find(|i| i.instance_id == instance_id) {
            Some(vm) => Ok(vm.clone()),
            None => bail!("no such instance {instance_id}"),
        }
    }

    async fn list_instances(&self, filter: ListFilter) -> Result<Vec<VmInstance>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .instances
            .iter()
            .filter(|i| filter.matches(i.power_state))
            .cloned()
            .collect())
    }
}

// ── Gateway ────────────────────────────────────────────────────────

/// In-memory gateway: holds a path-rule table and counts publishes.
#[derive(Clone)]
pub struct FakeGateway {
    rules: Arc<Mutex<Vec<PathRule>>>,
    publishes: Arc<AtomicUsize>,
    target: GatewayTarget,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            rules: Arc::new(Mutex::new(Vec::new())),
            publishes: Arc::new(AtomicUsize::new(0)),
            target: GatewayTarget {
                subscription_id: "test-sub".to_string(),
                resource_group: "test-rg".to_string(),
                gateway_name: "test-gw".to_string(),
            },
        }
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<PathRule>) -> Self {
        let gateway = Self::default();
        *gateway.rules.lock().unwrap() = rules;
        gateway
    }

    pub fn rules(&self) -> Vec<PathRule> {
        self.rules.lock().unwrap().clone()
    }

    /// First path of every rule, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.properties.paths.first().cloned())
            .collect();
        paths.sort();
        paths
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayProvider for FakeGateway {
    async fn update_path_based_rules(&self, instances: &[VmInstance]) -> Result<()> {
        let mut rules = self.rules.lock().unwrap();
        let diff = diff_path_rules(instances, &rules, &self.target);
        if diff.changed() {
            *rules = diff.rules;
            self.publishes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ── Dynamic config ─────────────────────────────────────────────────

/// In-memory dynamic-configuration source.
#[derive(Clone, Default)]
pub struct FakePoolConfig {
    settings: Option<PoolSettings>,
}

impl FakePoolConfig {
    /// A source that serves the given settings.
    pub fn with_settings(settings: PoolSettings) -> Self {
        Self {
            settings: Some(settings),
        }
    }

    /// A source whose reads always fail.
    pub fn unavailable() -> Self {
        Self { settings: None }
    }
}

#[async_trait]
impl PoolConfigProvider for FakePoolConfig {
    async fn get_configuration(&self, key: &str) -> Result<String> {
        let Some(settings) = &self.settings else {
            bail!("configuration store unavailable");
        };
        match key {
            "SCALER_POOL_CAPACITY" => Ok(settings.pool_capacity.to_string()),
            "SCALER_WARMPOOL_SIZE" => Ok(settings.warm_pool_size.to_string()),
            "SCALER_WARMPOOL_ENABLED" => Ok(settings.warm_pool_enabled.to_string()),
            _ => bail!("configuration value not found for key {key}"),
        }
    }

    async fn parse_configuration(&self) -> Result<PoolSettings> {
        match self.settings {
            Some(settings) => Ok(settings),
            None => bail!("configuration store unavailable"),
        }
    }
}

// ── Telemetry ──────────────────────────────────────────────────────

/// Telemetry sink that records every event for assertions.
#[derive(Clone, Default)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<VmOperation>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<VmOperation> {
        self.events.lock().unwrap().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn track_operation(&self, operation: VmOperation) {
        self.events.lock().unwrap().push(operation);
    }
}
