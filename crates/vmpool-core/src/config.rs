//! Environment-driven configuration.
//!
//! Each process reads its whole configuration from environment variables at
//! startup. Loaders take no arguments; missing required values fail
//! construction (the binaries exit non-zero), malformed numeric values fall
//! back to their defaults.

use anyhow::{bail, Result};

/// Value source for config loaders. Production uses [`std::env::var`]; tests
/// inject maps.
type Source<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn get_u64(source: Source<'_>, key: &str, fallback: u64) -> u64 {
    source(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

fn get_bool(source: Source<'_>, key: &str) -> bool {
    source(key).as_deref() == Some("true")
}

fn require(source: Source<'_>, key: &str) -> Result<String> {
    match source(key) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => bail!("missing required environment variable {key}"),
    }
}

/// Connection settings for the shared state store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: String,
    pub ssl: bool,
}

impl RedisConfig {
    pub fn load() -> Result<Self> {
        Self::from_source(&env)
    }

    pub fn from_source(source: Source<'_>) -> Result<Self> {
        Ok(Self {
            host: require(source, "REDIS_HOST")?,
            port: require(source, "REDIS_PORT")?,
            ssl: get_bool(source, "REDIS_SSL"),
        })
    }

    /// Connection URL, `rediss://` when TLS is enabled.
    pub fn url(&self) -> String {
        let scheme = if self.ssl { "rediss" } else { "redis" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Identity of the scale set this pool manages.
#[derive(Debug, Clone)]
pub struct ScaleSetConfig {
    pub subscription_id: String,
    pub tenant_id: String,
    pub resource_group: String,
    pub scale_set_name: String,
    /// Application Insights key; empty disables telemetry.
    pub instrumentation_key: String,
}

impl ScaleSetConfig {
    pub fn load() -> Result<Self> {
        Self::from_source(&env)
    }

    pub fn from_source(source: Source<'_>) -> Result<Self> {
        Ok(Self {
            subscription_id: require(source, "AZURE_SUBSCRIPTION_ID")?,
            tenant_id: require(source, "AZURE_TENANT_ID")?,
            resource_group: require(source, "AZURE_RESOURCE_GROUP")?,
            scale_set_name: require(source, "AZURE_VMSS_NAME")?,
            instrumentation_key: source("AZURE_APPI_INSTRUMENTATION_KEY").unwrap_or_default(),
        })
    }
}

/// Identity of the ingress gateway whose path rules mirror the pool.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub subscription_id: String,
    pub resource_group: String,
    pub gateway_name: String,
    pub path_map_name: String,
}

impl GatewayConfig {
    pub fn load() -> Result<Self> {
        Self::from_source(&env)
    }

    pub fn from_source(source: Source<'_>) -> Result<Self> {
        Ok(Self {
            subscription_id: require(source, "AZURE_SUBSCRIPTION_ID")?,
            resource_group: require(source, "AZURE_RESOURCE_GROUP")?,
            gateway_name: require(source, "AZURE_APPGW_NAME")?,
            path_map_name: require(source, "AZURE_APPGW_PATH_MAP_NAME")?,
        })
    }
}

/// Location of the dynamic-configuration store.
#[derive(Debug, Clone)]
pub struct AppConfigSettings {
    pub store_name: String,
}

impl AppConfigSettings {
    pub fn load() -> Result<Self> {
        Self::from_source(&env)
    }

    pub fn from_source(source: Source<'_>) -> Result<Self> {
        Ok(Self {
            store_name: require(source, "AZURE_CONFIG_NAME")?,
        })
    }
}

/// Tuning knobs shared by all five loops. Durations are seconds.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    pub pool_capacity: u64,
    pub job_interval: u64,
    pub job_timeout: u64,
    pub vm_runtime: u64,
    pub job_delay: u64,
    pub geo_name: String,
    pub warm_pool_size: u64,
    pub warm_pool_enabled: bool,
}

impl ScalerConfig {
    pub fn load() -> Result<Self> {
        Self::from_source(&env)
    }

    pub fn from_source(source: Source<'_>) -> Result<Self> {
        Ok(Self {
            pool_capacity: get_u64(source, "SCALER_POOL_CAPACITY", 4),
            job_interval: get_u64(source, "SCALER_JOB_INTERVAL", 60),
            job_timeout: get_u64(source, "SCALER_JOB_TIMEOUT", 180),
            vm_runtime: get_u64(source, "SCALER_VM_RUNTIME", 360),
            job_delay: get_u64(source, "SCALER_JOB_DELAY", 10),
            geo_name: source("SCALER_GEO_NAME").unwrap_or_default(),
            warm_pool_size: get_u64(source, "SCALER_WARMPOOL_SIZE", 0),
            warm_pool_enabled: get_bool(source, "SCALER_WARMPOOL_ENABLED"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn lookup(map: &HashMap<String, String>) -> impl Fn(&str) -> Option<String> + '_ {
        |key| map.get(key).cloned()
    }

    #[test]
    fn scaler_config_defaults() {
        let map = source(&[]);
        let cfg = ScalerConfig::from_source(&lookup(&map)).unwrap();
        assert_eq!(cfg.pool_capacity, 4);
        assert_eq!(cfg.job_interval, 60);
        assert_eq!(cfg.job_timeout, 180);
        assert_eq!(cfg.vm_runtime, 360);
        assert_eq!(cfg.job_delay, 10);
        assert_eq!(cfg.warm_pool_size, 0);
        assert!(!cfg.warm_pool_enabled);
        assert!(cfg.geo_name.is_empty());
    }

    #[test]
    fn scaler_config_reads_overrides() {
        let map = source(&[
            ("SCALER_POOL_CAPACITY", "8"),
            ("SCALER_JOB_INTERVAL", "15"),
            ("SCALER_WARMPOOL_SIZE", "2"),
            ("SCALER_WARMPOOL_ENABLED", "true"),
            ("SCALER_GEO_NAME", "westeurope"),
        ]);
        let cfg = ScalerConfig::from_source(&lookup(&map)).unwrap();
        assert_eq!(cfg.pool_capacity, 8);
        assert_eq!(cfg.job_interval, 15);
        assert_eq!(cfg.warm_pool_size, 2);
        assert!(cfg.warm_pool_enabled);
        assert_eq!(cfg.geo_name, "westeurope");
    }

    #[test]
    fn malformed_numbers_fall_back() {
        let map = source(&[("SCALER_POOL_CAPACITY", "many")]);
        let cfg = ScalerConfig::from_source(&lookup(&map)).unwrap();
        assert_eq!(cfg.pool_capacity, 4);
    }

    #[test]
    fn warm_pool_enabled_is_strict_true() {
        let map = source(&[("SCALER_WARMPOOL_ENABLED", "1")]);
        let cfg = ScalerConfig::from_source(&lookup(&map)).unwrap();
        assert!(!cfg.warm_pool_enabled);
    }

    #[test]
    fn redis_config_requires_host_and_port() {
        let map = source(&[("REDIS_PORT", "6380")]);
        assert!(RedisConfig::from_source(&lookup(&map)).is_err());

        let map = source(&[("REDIS_HOST", "cache.example"), ("REDIS_PORT", "6380")]);
        let cfg = RedisConfig::from_source(&lookup(&map)).unwrap();
        assert!(!cfg.ssl);
        assert_eq!(cfg.url(), "redis://cache.example:6380");
    }

    #[test]
    fn redis_url_uses_tls_scheme() {
        let map = source(&[
            ("REDIS_HOST", "cache.example"),
            ("REDIS_PORT", "6380"),
            ("REDIS_SSL", "true"),
        ]);
        let cfg = RedisConfig::from_source(&lookup(&map)).unwrap();
        assert_eq!(cfg.url(), "rediss://cache.example:6380");
    }

    #[test]
    fn scale_set_config_requires_identity() {
        let map = source(&[
            ("AZURE_SUBSCRIPTION_ID", "sub"),
            ("AZURE_TENANT_ID", "tenant"),
            ("AZURE_RESOURCE_GROUP", "rg"),
        ]);
        assert!(ScaleSetConfig::from_source(&lookup(&map)).is_err());

        let map = source(&[
            ("AZURE_SUBSCRIPTION_ID", "sub"),
            ("AZURE_TENANT_ID", "tenant"),
            ("AZURE_RESOURCE_GROUP", "rg"),
            ("AZURE_VMSS_NAME", "pool"),
        ]);
        let cfg = ScaleSetConfig::from_source(&lookup(&map)).unwrap();
        assert!(cfg.instrumentation_key.is_empty());
    }

    #[test]
    fn gateway_config_loads() {
        let map = source(&[
            ("AZURE_SUBSCRIPTION_ID", "sub"),
            ("AZURE_RESOURCE_GROUP", "rg"),
            ("AZURE_APPGW_NAME", "gw"),
            ("AZURE_APPGW_PATH_MAP_NAME", "sessions"),
        ]);
        let cfg = GatewayConfig::from_source(&lookup(&map)).unwrap();
        assert_eq!(cfg.path_map_name, "sessions");
    }
}
