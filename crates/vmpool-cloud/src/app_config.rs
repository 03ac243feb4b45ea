//! Azure App Configuration provider for dynamic pool sizing.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use vmpool_core::AppConfigSettings;

use crate::auth::TokenCredential;
use crate::provider::{PoolConfigProvider, PoolSettings};

const APP_CONFIG_SCOPE: &str = "https://azconfig.io/.default";

const POOL_CAPACITY_KEY: &str = "SCALER_POOL_CAPACITY";
const WARM_POOL_SIZE_KEY: &str = "SCALER_WARMPOOL_SIZE";
const WARM_POOL_ENABLED_KEY: &str = "SCALER_WARMPOOL_ENABLED";

/// Dynamic-configuration source backed by an App Configuration store.
pub struct AzureAppConfig {
    http: reqwest::Client,
    credential: Arc<TokenCredential>,
    endpoint: String,
}

impl AzureAppConfig {
    pub fn new(settings: &AppConfigSettings, credential: Arc<TokenCredential>) -> Self {
        Self {
            http: reqwest::Client::new(),
            credential,
            endpoint: format!("https://{}.azconfig.io", settings.store_name),
        }
    }
}

#[async_trait]
impl PoolConfigProvider for AzureAppConfig {
    async fn get_configuration(&self, key: &str) -> Result<String> {
        let token = self.credential.token(APP_CONFIG_SCOPE).await?;
        let url = format!("{}/kv/{key}?api-version=1.0", self.endpoint);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("failed to get configuration for key {key}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("configuration request for key {key} returned {status}");
        }

        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("configuration response for key {key} was not JSON"))?;
        match body["value"].as_str() {
            Some(value) => {
                debug!(key, value, "read dynamic configuration");
                Ok(value.to_string())
            }
            None => bail!("configuration value not found for key {key}"),
        }
    }

    async fn parse_configuration(&self) -> Result<PoolSettings> {
        let pool_capacity = self
            .get_configuration(POOL_CAPACITY_KEY)
            .await?
            .trim()
            .parse()
            .context("invalid pool capacity value")?;
        let warm_pool_size = self
            .get_configuration(WARM_POOL_SIZE_KEY)
            .await?
            .trim()
            .parse()
            .context("invalid warm pool size value")?;
        let warm_pool_enabled = self
            .get_configuration(WARM_POOL_ENABLED_KEY)
            .await?
            .trim()
            .parse()
            .context("invalid warm pool enabled value")?;

        Ok(PoolSettings {
            pool_capacity,
            warm_pool_size,
            warm_pool_enabled,
        })
    }
}
