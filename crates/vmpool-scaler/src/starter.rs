//! Starter loop — boots reserved VMs.
//!
//! Pops up to a batch of keys from the reserved set (SPOP removes them from
//! the set by itself), marks each record `Unavailable`, indexes it in the
//! unavailable set, then asks the cloud to start the VM. Per-key failures
//! are logged and the key is dropped; the reconciler eventually collects
//! what is left behind.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use vmpool_cloud::{ScaleSetProvider, TelemetrySink};
use vmpool_core::{ScalerConfig, VmOperation, VmRecord, VmStatus};
use vmpool_state::{Pipeline, StateStore, RESERVED_SET, UNAVAILABLE_SET};

use crate::schedule::Job;

/// Upper bound on reserved keys processed per tick.
const MAX_STARTS_PER_TICK: usize = 100;

pub struct Starter {
    store: Arc<dyn StateStore>,
    scale_set: Arc<dyn ScaleSetProvider>,
    telemetry: Arc<dyn TelemetrySink>,
    geo_name: String,
}

impl Starter {
    pub fn new(
        scale_set: Arc<dyn ScaleSetProvider>,
        store: Arc<dyn StateStore>,
        telemetry: Arc<dyn TelemetrySink>,
        config: &ScalerConfig,
    ) -> Self {
        Self {
            store,
            scale_set,
            telemetry,
            geo_name: config.geo_name.clone(),
        }
    }

    async fn start_reserved(&self) -> Result<()> {
        let popped = self
            .store
            .spop(RESERVED_SET, MAX_STARTS_PER_TICK)
            .await
            .context("failed to pop reserved instances")?;

        if popped.is_empty() {
            debug!("no reserved instances found to process");
            return Ok(());
        }
        info!(count = popped.len(), "processing reserved instances");

        for key in &popped {
            let started = Instant::now();

            let data = match self.store.get(key).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    warn!(key, "reserved key has no record, dropping");
                    continue;
                }
                Err(e) => {
                    error!(key, error = %e, "failed to load record");
                    continue;
                }
            };

            let mut record = match VmRecord::from_json(&data) {
                Ok(record) => record,
                Err(e) => {
                    error!(key, error = %e, "failed to parse record");
                    continue;
                }
            };

            record.transition(VmStatus::Unavailable);
            let json = match record.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!(key, error = %e, "failed to serialize record");
                    continue;
                }
            };

            let mut pipe = Pipeline::new();
            pipe.set(key, &json);
            pipe.sadd(UNAVAILABLE_SET, key);
            if let Err(e) = self.store.exec(pipe).await {
                error!(key, error = %e, "failed to execute record update batch");
                continue;
            }

            if let Err(e) = self.scale_set.start_instance(&record.instance_id).await {
                error!(
                    instance_id = %record.instance_id,
                    error = format!("{e:#}"),
                    "failed to start instance"
                );
                continue;
            }

            let mut op = VmOperation::new("start", &self.geo_name);
            op.resource_id = Some(record.instance_id.clone());
            op.duration = started.elapsed();
            self.telemetry.track_operation(op);

            info!(
                instance_id = %record.instance_id,
                "started instance, record now unavailable"
            );
        }

        Ok(())
    }
}

#[async_trait]
impl Job for Starter {
    fn name(&self) -> &'static str {
        "starter"
    }

    async fn run_once(&mut self) -> Result<()> {
        self.start_reserved().await
    }
}
