//! Gateway path-rule model and the inventory diff.
//!
//! The gateway exposes one `/{vmId}` path rule per pool VM so a session can
//! be routed to its machine. [`diff_path_rules`] rebuilds the rule set from
//! the live inventory: rules for vanished VMs drop out, rules for new VMs
//! are synthesized, the `default` rule always survives. The diff keys off
//! rule paths; rule names are informational.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use vmpool_core::VmInstance;

/// A single URL path rule, as stored in the gateway's path map.
///
/// `extra` passes through every property this system does not own, so a
/// publish never strips gateway-managed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRule {
    pub name: String,
    pub properties: PathRuleProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PathRuleProperties {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_address_pool: Option<ResourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_http_settings: Option<ResourceRef>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Reference to another gateway sub-resource by fully qualified id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
}

/// The gateway the synthesized rules point into.
#[derive(Debug, Clone)]
pub struct GatewayTarget {
    pub subscription_id: String,
    pub resource_group: String,
    pub gateway_name: String,
}

impl GatewayTarget {
    fn resource_id(&self, collection: &str, name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/applicationGateways/{}/{collection}/{name}",
            self.subscription_id, self.resource_group, self.gateway_name,
        )
    }

    /// Backend pool id for a VM; pools are named after the private IP with
    /// dots replaced by dashes.
    pub fn backend_pool_id(&self, private_ip: &str) -> String {
        self.resource_id("backendAddressPools", &private_ip.replace('.', "-"))
    }

    /// The shared HTTPS backend settings, named `wss`.
    pub fn backend_settings_id(&self) -> String {
        self.resource_id("backendHttpSettingsCollection", "wss")
    }
}

/// Outcome of a diff: the rebuilt rule set and what changed.
#[derive(Debug, Clone)]
pub struct RouteDiff {
    pub rules: Vec<PathRule>,
    pub added: usize,
    pub removed: usize,
}

impl RouteDiff {
    /// Whether the rule set differs from the existing one and needs a
    /// publish.
    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

/// Rebuild the path rules for the given inventory.
///
/// Rules whose path names a VM absent from the inventory are dropped; VMs
/// without a rule get one. Rules with an empty path list are dropped from
/// the rebuilt set but do not by themselves count as a change.
pub fn diff_path_rules(
    instances: &[VmInstance],
    existing: &[PathRule],
    target: &GatewayTarget,
) -> RouteDiff {
    let mut active: HashMap<&str, &VmInstance> = instances
        .iter()
        .filter(|i| !i.private_ip.is_empty())
        .map(|i| (i.vm_id.as_str(), i))
        .collect();

    let mut rules = Vec::with_capacity(existing.len());
    let mut removed = 0;

    for rule in existing {
        let Some(first_path) = rule.properties.paths.first() else {
            continue;
        };
        let vm_id = first_path.trim_start_matches('/');

        if vm_id == "default" {
            rules.push(rule.clone());
            continue;
        }

        if active.remove(vm_id).is_some() {
            rules.push(rule.clone());
        } else {
            removed += 1;
        }
    }

    let added = active.len();
    for (vm_id, instance) in active {
        rules.push(PathRule {
            name: format!("instance{}", instance.instance_id),
            properties: PathRuleProperties {
                paths: vec![format!("/{vm_id}")],
                backend_address_pool: Some(ResourceRef {
                    id: target.backend_pool_id(&instance.private_ip),
                }),
                backend_http_settings: Some(ResourceRef {
                    id: target.backend_settings_id(),
                }),
                extra: serde_json::Map::new(),
            },
        });
    }

    RouteDiff {
        rules,
        added,
        removed,
    }
}
