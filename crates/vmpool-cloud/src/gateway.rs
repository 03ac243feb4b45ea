//! Azure Application Gateway provider.
//!
//! Fetches the gateway document, applies the pure route diff to the
//! configured URL path map, and PUTs the whole document back only when the
//! rule set changed. Everything outside the path rules passes through
//! untouched.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info};

use vmpool_core::{GatewayConfig, VmInstance};

use crate::arm::{ArmClient, MANAGEMENT_BASE};
use crate::auth::TokenCredential;
use crate::provider::GatewayProvider;
use crate::routes::{diff_path_rules, GatewayTarget, PathRule};

const NETWORK_API_VERSION: &str = "2023-09-01";

/// Gateway provider backed by the Azure management plane.
pub struct AzureApplicationGateway {
    arm: ArmClient,
    config: GatewayConfig,
    target: GatewayTarget,
}

impl AzureApplicationGateway {
    pub fn new(config: GatewayConfig, credential: Arc<TokenCredential>) -> Self {
        let target = GatewayTarget {
            subscription_id: config.subscription_id.clone(),
            resource_group: config.resource_group.clone(),
            gateway_name: config.gateway_name.clone(),
        };
        Self {
            arm: ArmClient::new(credential),
            config,
            target,
        }
    }

    fn gateway_url(&self) -> String {
        format!(
            "{MANAGEMENT_BASE}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/applicationGateways/{}?api-version={NETWORK_API_VERSION}",
            self.config.subscription_id, self.config.resource_group, self.config.gateway_name,
        )
    }
}

#[async_trait]
impl GatewayProvider for AzureApplicationGateway {
    async fn update_path_based_rules(&self, instances: &[VmInstance]) -> Result<()> {
        let url = self.gateway_url();
        let mut document = self
            .arm
            .get(&url)
            .await
            .context("failed to get application gateway")?;

        let existing = read_path_rules(&document, &self.config.path_map_name)?;
        let diff = diff_path_rules(instances, &existing, &self.target);

        if !diff.changed() {
            debug!(total = diff.rules.len(), "no changes needed for path rules");
            return Ok(());
        }

        let total = diff.rules.len();
        write_path_rules(&mut document, &self.config.path_map_name, &diff.rules)?;
        self.arm
            .send(Method::PUT, &url, Some(&document))
            .await
            .context("failed to update application gateway")?;

        info!(
            added = diff.added,
            removed = diff.removed,
            total,
            "started path rules update"
        );
        Ok(())
    }
}

fn path_map_mut<'a>(document: &'a mut Value, name: &str) -> Option<&'a mut Value> {
    document
        .get_mut("properties")?
        .get_mut("urlPathMaps")?
        .as_array_mut()?
        .iter_mut()
        .find(|map| map.get("name").and_then(Value::as_str) == Some(name))
}

/// Path rules of the named URL path map. Fails when the map is absent;
/// the gateway is expected to be provisioned with it.
fn read_path_rules(document: &Value, name: &str) -> Result<Vec<PathRule>> {
    let Some(map) = document["properties"]["urlPathMaps"]
        .as_array()
        .and_then(|maps| {
            maps.iter()
                .find(|map| map.get("name").and_then(Value::as_str) == Some(name))
        })
    else {
        bail!("URL path map {name} not found");
    };

    let rules = map["properties"]["pathRules"].clone();
    if rules.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(rules).context("failed to parse gateway path rules")
}

fn write_path_rules(document: &mut Value, name: &str, rules: &[PathRule]) -> Result<()> {
    let Some(map) = path_map_mut(document, name) else {
        bail!("URL path map {name} not found");
    };
    map["properties"]["pathRules"] = serde_json::to_value(rules)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway_doc() -> Value {
        json!({
            "name": "gw",
            "location": "westeurope",
            "properties": {
                "sku": {"name": "Standard_v2"},
                "urlPathMaps": [
                    {
                        "name": "sessions",
                        "properties": {
                            "pathRules": [
                                {"name": "instance0", "properties": {"paths": ["/vm-a"]}}
                            ]
                        }
                    },
                    {"name": "other", "properties": {}}
                ]
            }
        })
    }

    #[test]
    fn read_rules_from_named_map() {
        let rules = read_path_rules(&gateway_doc(), "sessions").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].properties.paths, vec!["/vm-a"]);
    }

    #[test]
    fn missing_map_is_an_error() {
        assert!(read_path_rules(&gateway_doc(), "absent").is_err());
    }

    #[test]
    fn map_without_rules_reads_empty() {
        let rules = read_path_rules(&gateway_doc(), "other").unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn write_replaces_only_the_named_map() {
        let mut doc = gateway_doc();
        let new_rules = vec![PathRule {
            name: "instance9".to_string(),
            properties: crate::routes::PathRuleProperties {
                paths: vec!["/vm-z".to_string()],
                ..Default::default()
            },
        }];
        write_path_rules(&mut doc, "sessions", &new_rules).unwrap();

        let rules = &doc["properties"]["urlPathMaps"][0]["properties"]["pathRules"];
        assert_eq!(rules[0]["properties"]["paths"][0], "/vm-z");
        // The rest of the document survives untouched.
        assert_eq!(doc["properties"]["sku"]["name"], "Standard_v2");
        assert_eq!(doc["properties"]["urlPathMaps"][1]["name"], "other");
    }
}
