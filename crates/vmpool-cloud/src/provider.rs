//! Provider traits consumed by the control loops.
//!
//! Every loop is written against these traits, never against a concrete
//! client. All cloud operations may take tens of seconds and must be issued
//! with the invocation's deadline in force; the loops retry only by running
//! again on the next tick, so implementations must tolerate re-issued
//! operations.

use anyhow::Result;
use async_trait::async_trait;

use vmpool_core::{ListFilter, VmInstance, VmOperation};

/// Operations on the VM scale set backing the pool.
#[async_trait]
pub trait ScaleSetProvider: Send + Sync {
    /// Grow capacity to exactly `desired_count`. No-op when the set already
    /// has that many instances or more; the pool never shrinks this way.
    async fn create_instances(&self, desired_count: u64) -> Result<()>;

    /// Boot a stopped or deallocated VM.
    async fn start_instance(&self, instance_id: &str) -> Result<()>;

    /// Deallocate a VM (release compute, keep the slot).
    async fn stop_instance(&self, instance_id: &str) -> Result<()>;

    /// Remove a VM from the scale set entirely.
    async fn delete_instance(&self, instance_id: &str) -> Result<()>;

    async fn get_instance(&self, instance_id: &str) -> Result<VmInstance>;

    async fn list_instances(&self, filter: ListFilter) -> Result<Vec<VmInstance>>;
}

/// Publishes per-VM path routes to the ingress gateway.
#[async_trait]
pub trait GatewayProvider: Send + Sync {
    /// Converge the gateway's path rules onto the given inventory: one rule
    /// per VM with a private IP, the `default` rule preserved, publish only
    /// when something changed.
    async fn update_path_based_rules(&self, instances: &[VmInstance]) -> Result<()>;
}

/// Pool sizing read from the dynamic-configuration store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub pool_capacity: u64,
    pub warm_pool_size: u64,
    pub warm_pool_enabled: bool,
}

/// Dynamic-configuration source for pool sizing.
///
/// Read once per process start by the provisioner; failures fall back to the
/// static environment configuration.
#[async_trait]
pub trait PoolConfigProvider: Send + Sync {
    async fn get_configuration(&self, key: &str) -> Result<String>;

    async fn parse_configuration(&self) -> Result<PoolSettings>;
}

/// Fire-and-forget telemetry sink for pool operations.
pub trait TelemetrySink: Send + Sync {
    fn track_operation(&self, operation: VmOperation);
}
