//! vmpool-core — domain types and configuration for the vmpool autoscaler.
//!
//! The pool is a cloud VM scale set serving short-lived session workloads.
//! Five singleton control loops (provisioner, reconciler, simulator, starter,
//! cleaner) drive every VM through the lifecycle
//! `Available → Reserved → Unavailable → deleted`, coordinating only through
//! the scale set itself and a shared state store.
//!
//! This crate holds what every other crate agrees on: the cloud-side
//! [`VmInstance`] view, the store-side [`VmRecord`] and its serialized form,
//! and the environment-driven configuration structs.

pub mod config;
pub mod types;

pub use config::{
    AppConfigSettings, GatewayConfig, RedisConfig, ScaleSetConfig, ScalerConfig,
};
pub use types::{
    ListFilter, PowerState, VmInstance, VmOperation, VmRecord, VmStatus,
};
