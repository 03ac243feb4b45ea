//! Reconciler loop — converges the state store onto the cloud inventory.
//!
//! Orphaned records (backing VM gone) are deleted in one batch, together
//! with their membership in every status set. Stopped or deallocated VMs
//! without a record get a fresh `Available` one, `warm` when the VM is
//! `stopped`. Running VMs never gain records here.
//!
//! A record whose `status` field disagrees with the set it lives in is left
//! alone; nothing in the system repairs that drift today.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use vmpool_cloud::ScaleSetProvider;
use vmpool_core::{ListFilter, PowerState, ScalerConfig, VmRecord};
use vmpool_state::{
    parse_vm_id, record_key, Pipeline, StateStore, AVAILABLE_SET, RECORD_KEY_PATTERN, STATUS_SETS,
};

use crate::schedule::Job;

pub struct Reconciler {
    scale_set: Arc<dyn ScaleSetProvider>,
    store: Arc<dyn StateStore>,
    geo_name: String,
}

impl Reconciler {
    pub fn new(
        scale_set: Arc<dyn ScaleSetProvider>,
        store: Arc<dyn StateStore>,
        config: &ScalerConfig,
    ) -> Self {
        Self {
            scale_set,
            store,
            geo_name: config.geo_name.clone(),
        }
    }

    async fn reconcile(&self) -> Result<()> {
        let all_vm_ids: HashSet<String> = self
            .scale_set
            .list_instances(ListFilter::default())
            .await
            .context("failed to list scale set instances")?
            .into_iter()
            .map(|i| i.vm_id)
            .collect();

        let mut record_keys = self
            .store
            .keys(RECORD_KEY_PATTERN)
            .await
            .context("failed to list state records")?;

        // Orphans: records whose backing VM no longer exists. Delete the
        // record and scrub the key from all three status sets in one batch.
        let mut pipe = Pipeline::new();
        let mut orphaned = Vec::new();
        for key in &record_keys {
            let Some(vm_id) = parse_vm_id(key) else {
                warn!(key, "skipping record key without a VM identity");
                continue;
            };
            if !all_vm_ids.contains(vm_id) {
                pipe.delete(key);
                for set in STATUS_SETS {
                    pipe.srem(set, key);
                }
                orphaned.push(key.clone());
            }
        }

        if !orphaned.is_empty() {
            self.store
                .exec(pipe)
                .await
                .context("failed to remove orphaned records")?;
            info!(count = orphaned.len(), keys = ?orphaned, "removed orphaned records");

            record_keys = self
                .store
                .keys(RECORD_KEY_PATTERN)
                .await
                .context("failed to refresh records after orphan removal")?;
        }

        // Records for inactive VMs the store does not know yet.
        let inactive = self
            .scale_set
            .list_instances(ListFilter::with_power_states(&[
                PowerState::Stopped,
                PowerState::Deallocated,
            ]))
            .await
            .context("failed to list inactive scale set instances")?;

        let known: HashSet<&str> = record_keys.iter().map(String::as_str).collect();
        let mut pipe = Pipeline::new();
        let mut created = Vec::new();

        for instance in &inactive {
            let key = record_key(&instance.vm_id);
            if known.contains(key.as_str()) {
                continue;
            }

            let record = VmRecord::available(instance, &self.geo_name);
            let json = match record.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!(vm_id = %instance.vm_id, error = %e, "failed to serialize record");
                    continue;
                }
            };

            pipe.set(&key, &json);
            pipe.sadd(AVAILABLE_SET, &key);
            debug!(
                instance_id = %instance.instance_id,
                warm = record.warm,
                "queued new instance record"
            );
            created.push(instance.vm_id.clone());
        }

        if !created.is_empty() {
            self.store
                .exec(pipe)
                .await
                .context("failed to create new records")?;
            info!(count = created.len(), vm_ids = ?created, "created state records");
        }

        Ok(())
    }
}

#[async_trait]
impl Job for Reconciler {
    fn name(&self) -> &'static str {
        "reconciler"
    }

    async fn run_once(&mut self) -> Result<()> {
        self.reconcile().await
    }
}
