//! Azure VM scale set provider.
//!
//! All operations address the scale set named in [`ScaleSetConfig`].
//! Capacity growth is the only operation awaited to completion; start,
//! deallocate and delete are accepted-and-forgotten; later ticks observe
//! the result through the inventory.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use vmpool_core::{ListFilter, PowerState, ScaleSetConfig, VmInstance};

use crate::arm::{ArmClient, MANAGEMENT_BASE};
use crate::auth::TokenCredential;
use crate::provider::ScaleSetProvider;

const COMPUTE_API_VERSION: &str = "2024-07-01";
const NETWORK_API_VERSION: &str = "2023-09-01";

/// Placeholder used when the scale set does not assign public addresses.
const PUBLIC_IP_PLACEHOLDER: &str = "0.0.0.0";

/// Scale-set provider backed by the Azure management plane.
pub struct AzureScaleSet {
    arm: ArmClient,
    config: ScaleSetConfig,
}

impl AzureScaleSet {
    pub fn new(config: ScaleSetConfig, credential: Arc<TokenCredential>) -> Self {
        Self {
            arm: ArmClient::new(credential),
            config,
        }
    }

    fn scale_set_base(&self) -> String {
        format!(
            "{MANAGEMENT_BASE}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}",
            self.config.subscription_id, self.config.resource_group, self.config.scale_set_name,
        )
    }

    fn vm_url(&self, instance_id: &str, action: Option<&str>) -> String {
        let base = self.scale_set_base();
        match action {
            Some(action) => format!(
                "{base}/virtualMachines/{instance_id}/{action}?api-version={COMPUTE_API_VERSION}"
            ),
            None => {
                format!("{base}/virtualMachines/{instance_id}?api-version={COMPUTE_API_VERSION}")
            }
        }
    }

    /// Private IPs of every scale-set VM, keyed by instance ordinal, from a
    /// single NIC listing.
    async fn private_ips(&self) -> Result<HashMap<String, String>> {
        let mut url = format!(
            "{}/networkInterfaces?api-version={NETWORK_API_VERSION}",
            self.scale_set_base()
        );
        let mut ips = HashMap::new();

        loop {
            let page = self.arm.get(&url).await?;
            if let Some(nics) = page["value"].as_array() {
                for nic in nics {
                    if let Some((instance_id, ip)) = nic_private_ip(nic) {
                        ips.insert(instance_id, ip);
                    }
                }
            }
            match page["nextLink"].as_str() {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }
        Ok(ips)
    }
}

#[async_trait]
impl ScaleSetProvider for AzureScaleSet {
    async fn create_instances(&self, desired_count: u64) -> Result<()> {
        let url = format!(
            "{}?api-version={COMPUTE_API_VERSION}",
            self.scale_set_base()
        );
        let scale_set = self.arm.get(&url).await.context("failed to get scale set")?;

        let current = scale_set["sku"]["capacity"].as_u64().unwrap_or(0);
        if current >= desired_count {
            info!(current, desired = desired_count, "scale set already at capacity");
            return Ok(());
        }

        info!(
            new = desired_count - current,
            desired = desired_count,
            "provisioning new instance(s)"
        );
        let update = json!({
            "sku": {
                "name": scale_set["sku"]["name"],
                "tier": scale_set["sku"]["tier"],
                "capacity": desired_count,
            }
        });

        let response = self
            .arm
            .send(Method::PATCH, &url, Some(&update))
            .await
            .context("failed to update scale set capacity")?;
        self.arm
            .wait_for_operation(response)
            .await
            .context("scale set capacity update did not complete")
    }

    async fn start_instance(&self, instance_id: &str) -> Result<()> {
        self.arm
            .send(Method::POST, &self.vm_url(instance_id, Some("start")), None)
            .await
            .with_context(|| format!("failed to start instance {instance_id}"))?;
        info!(instance_id, scale_set = %self.config.scale_set_name, "instance start requested");
        Ok(())
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<()> {
        self.arm
            .send(
                Method::POST,
                &self.vm_url(instance_id, Some("deallocate")),
                None,
            )
            .await
            .with_context(|| format!("failed to deallocate instance {instance_id}"))?;
        info!(instance_id, scale_set = %self.config.scale_set_name, "instance deallocation requested");
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        self.arm
            .send(Method::DELETE, &self.vm_url(instance_id, None), None)
            .await
            .with_context(|| format!("failed to delete instance {instance_id}"))?;
        info!(instance_id, scale_set = %self.config.scale_set_name, "instance deletion requested");
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<VmInstance> {
        let url = format!(
            "{}/virtualMachines/{instance_id}?api-version={COMPUTE_API_VERSION}&$expand=instanceView",
            self.scale_set_base()
        );
        let vm = self.arm.get(&url).await?;
        match parse_vm(&vm, &HashMap::new()) {
            Some(instance) => Ok(instance),
            None => bail!("instance {instance_id} returned an unreadable payload"),
        }
    }

    async fn list_instances(&self, filter: ListFilter) -> Result<Vec<VmInstance>> {
        let ips = self.private_ips().await?;

        let mut url = format!(
            "{}/virtualMachines?api-version={COMPUTE_API_VERSION}&$expand=instanceView",
            self.scale_set_base()
        );
        let mut instances = Vec::new();

        loop {
            let page = self.arm.get(&url).await?;
            if let Some(vms) = page["value"].as_array() {
                for vm in vms {
                    let Some(instance) = parse_vm(vm, &ips) else {
                        warn!(
                            instance_id = vm["instanceId"].as_str().unwrap_or("?"),
                            "skipping instance without a readable power state"
                        );
                        continue;
                    };
                    if filter.matches(instance.power_state) {
                        instances.push(instance);
                    }
                }
            }
            match page["nextLink"].as_str() {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }

        debug!(
            count = instances.len(),
            scale_set = %self.config.scale_set_name,
            filter = ?filter.power_states,
            "listed scale set instances"
        );
        Ok(instances)
    }
}

/// Extract a [`VmInstance`] from a scale-set VM document with instance view.
fn parse_vm(vm: &Value, ips: &HashMap<String, String>) -> Option<VmInstance> {
    let instance_id = vm["instanceId"].as_str()?;
    let vm_id = vm["properties"]["vmId"].as_str()?;
    let power_state = vm["properties"]["instanceView"]["statuses"]
        .as_array()?
        .iter()
        .find_map(|status| {
            status["code"]
                .as_str()
                .and_then(PowerState::from_status_code)
        })?;

    Some(VmInstance {
        vm_id: vm_id.to_string(),
        instance_id: instance_id.to_string(),
        private_ip: ips.get(instance_id).cloned().unwrap_or_default(),
        public_ip: PUBLIC_IP_PLACEHOLDER.to_string(),
        power_state,
    })
}

/// Extract (instance ordinal, private IP) from a scale-set NIC document.
fn nic_private_ip(nic: &Value) -> Option<(String, String)> {
    let vm_resource_id = nic["properties"]["virtualMachine"]["id"].as_str()?;
    let instance_id = vm_resource_id.rsplit('/').next()?;
    let ip = nic["properties"]["ipConfigurations"]
        .as_array()?
        .iter()
        .find_map(|conf| conf["properties"]["privateIPAddress"].as_str())?;
    Some((instance_id.to_string(), ip.to_string()))
}
