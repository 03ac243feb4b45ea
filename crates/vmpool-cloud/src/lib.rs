//! vmpool-cloud — cloud provider surfaces for the vmpool autoscaler.
//!
//! Defines the traits the control loops consume ([`ScaleSetProvider`],
//! [`GatewayProvider`], [`PoolConfigProvider`], [`TelemetrySink`]) and ships
//! two families of implementations:
//!
//! - Azure REST providers (scale set, application gateway, app configuration,
//!   application insights) authenticated through a shared [`TokenCredential`]
//!   chain (environment client secret, then IMDS managed identity);
//! - in-memory fakes with the same observable behavior, used by the loop
//!   test suites.
//!
//! The gateway route diff ([`routes`]) is a pure function shared by both
//! gateway implementations.

pub mod app_config;
mod arm;
pub mod auth;
pub mod fake;
pub mod gateway;
pub mod provider;
pub mod routes;
pub mod scale_set;
pub mod telemetry;

pub use app_config::AzureAppConfig;
pub use auth::TokenCredential;
pub use gateway::AzureApplicationGateway;
pub use provider::{
    GatewayProvider, PoolConfigProvider, PoolSettings, ScaleSetProvider, TelemetrySink,
};
pub use routes::{diff_path_rules, GatewayTarget, PathRule, RouteDiff};
pub use scale_set::AzureScaleSet;
pub use telemetry::{AppInsights, NoopTelemetry};
