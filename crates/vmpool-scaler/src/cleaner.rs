//! Cleaner loop — retires consumed or aged-out VMs.
//!
//! Walks the unavailable set; a record is eligible once `used` is true or
//! its `updated_at` is at least `vm_runtime` seconds old. Eligible records
//! are removed from the store first, then the VM is deleted from the scale
//! set: a crash between the two leaves a ghost VM that capacity
//! reconciliation re-absorbs, never an orphaned record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use vmpool_cloud::{ScaleSetProvider, TelemetrySink};
use vmpool_core::{ScalerConfig, VmOperation, VmRecord};
use vmpool_state::{Pipeline, StateStore, UNAVAILABLE_SET};

use crate::schedule::Job;

pub struct Cleaner {
    store: Arc<dyn StateStore>,
    scale_set: Arc<dyn ScaleSetProvider>,
    telemetry: Arc<dyn TelemetrySink>,
    geo_name: String,
    vm_runtime: Duration,
}

impl Cleaner {
    pub fn new(
        scale_set: Arc<dyn ScaleSetProvider>,
        store: Arc<dyn StateStore>,
        telemetry: Arc<dyn TelemetrySink>,
        config: &ScalerConfig,
    ) -> Result<Self> {
        if config.vm_runtime == 0 {
            bail!("invalid VM runtime: must be positive");
        }
        Ok(Self {
            store,
            scale_set,
            telemetry,
            geo_name: config.geo_name.clone(),
            vm_runtime: Duration::from_secs(config.vm_runtime),
        })
    }

    async fn clean(&self) -> Result<()> {
        let members = self
            .store
            .smembers(UNAVAILABLE_SET)
            .await
            .context("failed to get unavailable instances")?;

        if members.is_empty() {
            debug!("no unavailable instances found to clean");
            return Ok(());
        }
        info!(count = members.len(), "found unavailable instances to clean");

        for key in &members {
            let started = Instant::now();

            let data = match self.store.get(key).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    warn!(key, "unavailable key has no record, skipping");
                    continue;
                }
                Err(e) => {
                    error!(key, error = %e, "failed to load record");
                    continue;
                }
            };

            let record = match VmRecord::from_json(&data) {
                Ok(record) => record,
                Err(e) => {
                    error!(key, error = %e, "failed to parse record");
                    continue;
                }
            };

            let reason = if record.used {
                "marked as used"
            } else {
                match record.age(Utc::now()) {
                    Ok(age) if age >= self.vm_runtime => "runtime exceeded threshold",
                    Ok(age) => {
                        debug!(
                            key,
                            age_secs = age.as_secs(),
                            threshold_secs = self.vm_runtime.as_secs(),
                            "running time below threshold, skipping"
                        );
                        continue;
                    }
                    Err(e) => {
                        error!(key, error = %e, "failed to parse record update time");
                        continue;
                    }
                }
            };

            info!(key, reason, "cleaning up instance");

            // State store first, cloud second.
            let mut pipe = Pipeline::new();
            pipe.srem(UNAVAILABLE_SET, key);
            pipe.delete(key);
            if let Err(e) = self.store.exec(pipe).await {
                error!(key, error = %e, "failed to execute cleanup batch");
                continue;
            }

            if let Err(e) = self.scale_set.delete_instance(&record.instance_id).await {
                error!(
                    instance_id = %record.instance_id,
                    error = format!("{e:#}"),
                    "failed to delete instance"
                );
                continue;
            }

            let mut op = VmOperation::new("clean", &self.geo_name);
            op.resource_id = Some(record.instance_id.clone());
            op.duration = started.elapsed();
            self.telemetry.track_operation(op);

            info!(key, instance_id = %record.instance_id, "cleaned up instance");
        }

        Ok(())
    }
}

#[async_trait]
impl Job for Cleaner {
    fn name(&self) -> &'static str {
        "cleaner"
    }

    async fn run_once(&mut self) -> Result<()> {
        self.clean().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SecondsFormat;
    use vmpool_cloud::fake::{FakeScaleSet, RecordingTelemetry};
    use vmpool_core::{PowerState, VmInstance, VmStatus};
    use vmpool_state::{record_key, MemoryStore};

    fn config(vm_runtime: u64) -> ScalerConfig {
        ScalerConfig {
            pool_capacity: 4,
            job_interval: 60,
            job_timeout: 180,
            vm_runtime,
            job_delay: 10,
            geo_name: "westeurope".to_string(),
            warm_pool_size: 0,
            warm_pool_enabled: false,
        }
    }

    fn instance(vm_id: &str, ordinal: &str) -> VmInstance {
        VmInstance {
            vm_id: vm_id.to_string(),
            instance_id: ordinal.to_string(),
            private_ip: format!("10.0.0.{ordinal}"),
            public_ip: "0.0.0.0".to_string(),
            power_state: PowerState::Running,
        }
    }

    /// Seed an unavailable record whose `updated_at` lies `age_secs` in the
    /// past.
    async fn seed_unavailable(
        store: &MemoryStore,
        vm_id: &str,
        ordinal: &str,
        used: bool,
        age_secs: i64,
    ) -> String {
        let mut record = VmRecord::available(&instance(vm_id, ordinal), "westeurope");
        record.status = VmStatus::Unavailable;
        record.used = used;
        record.updated_at = (Utc::now() - chrono::Duration::seconds(age_secs))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let key = record_key(vm_id);
        store.set(&key, &record.to_json().unwrap()).await.unwrap();
        store.sadd(UNAVAILABLE_SET, &key).await.unwrap();
        key
    }

    fn cleaner(
        scale_set: &FakeScaleSet,
        store: &MemoryStore,
        telemetry: &RecordingTelemetry,
        vm_runtime: u64,
    ) -> Cleaner {
        Cleaner::new(
            Arc::new(scale_set.clone()),
            Arc::new(store.clone()),
            Arc::new(telemetry.clone()),
            &config(vm_runtime),
        )
        .unwrap()
    }

    #[test]
    fn zero_runtime_fails_construction() {
        let scale_set = FakeScaleSet::new();
        let store = MemoryStore::new();
        let telemetry = RecordingTelemetry::new();
        assert!(Cleaner::new(
            Arc::new(scale_set),
            Arc::new(store),
            Arc::new(telemetry),
            &config(0),
        )
        .is_err());
    }

    #[tokio::test]
    async fn aged_out_record_is_cleaned() {
        let scale_set = FakeScaleSet::with_instances(vec![instance("Y", "3")]);
        let store = MemoryStore::new();
        let telemetry = RecordingTelemetry::new();
        // 500s old with a 360s threshold.
        let key = seed_unavailable(&store, "Y", "3", false, 500).await;

        cleaner(&scale_set, &store, &telemetry, 360)
            .run_once()
            .await
            .unwrap();

        assert_eq!(store.get(&key).await.unwrap(), None);
        assert!(store.smembers(UNAVAILABLE_SET).await.unwrap().is_empty());
        assert_eq!(scale_set.deleted(), vec!["3"]);

        let events = telemetry.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, "clean");
        assert!(events[0].success);
        assert_eq!(events[0].resource_id.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn young_unused_record_is_left_alone() {
        let scale_set = FakeScaleSet::with_instances(vec![instance("Z", "4")]);
        let store = MemoryStore::new();
        let telemetry = RecordingTelemetry::new();
        // 10s old with a 360s threshold.
        let key = seed_unavailable(&store, "Z", "4", false, 10).await;

        cleaner(&scale_set, &store, &telemetry, 360)
            .run_once()
            .await
            .unwrap();

        assert!(store.get(&key).await.unwrap().is_some());
        assert_eq!(store.smembers(UNAVAILABLE_SET).await.unwrap(), vec![key]);
        assert!(scale_set.deleted().is_empty());
        assert!(telemetry.events().is_empty());
    }

    #[tokio::test]
    async fn used_record_is_cleaned_regardless_of_age() {
        let scale_set = FakeScaleSet::with_instances(vec![instance("U", "5")]);
        let store = MemoryStore::new();
        let telemetry = RecordingTelemetry::new();
        let key = seed_unavailable(&store, "U", "5", true, 1).await;

        cleaner(&scale_set, &store, &telemetry, 360)
            .run_once()
            .await
            .unwrap();

        assert_eq!(store.get(&key).await.unwrap(), None);
        assert_eq!(scale_set.deleted(), vec!["5"]);
    }

    #[tokio::test]
    async fn unparseable_timestamp_skips_the_record() {
        let scale_set = FakeScaleSet::with_instances(vec![instance("T", "6")]);
        let store = MemoryStore::new();
        let telemetry = RecordingTelemetry::new();

        let mut record = VmRecord::available(&instance("T", "6"), "westeurope");
        record.status = VmStatus::Unavailable;
        record.updated_at = "garbage".to_string();
        let key = record_key("T");
        store.set(&key, &record.to_json().unwrap()).await.unwrap();
        store.sadd(UNAVAILABLE_SET, &key).await.unwrap();

        cleaner(&scale_set, &store, &telemetry, 360)
            .run_once()
            .await
            .unwrap();

        assert!(store.get(&key).await.unwrap().is_some());
        assert!(scale_set.deleted().is_empty());
    }

    #[tokio::test]
    async fn cloud_delete_failure_still_forgets_the_record() {
        // State-store cleanup comes first; if the cloud delete then fails
        // the VM lingers as a ghost and the record is already gone.
        let scale_set = FakeScaleSet::new(); // knows no instances: delete fails
        let store = MemoryStore::new();
        let telemetry = RecordingTelemetry::new();
        let key = seed_unavailable(&store, "G", "7", true, 1).await;

        cleaner(&scale_set, &store, &telemetry, 360)
            .run_once()
            .await
            .unwrap();

        assert_eq!(store.get(&key).await.unwrap(), None);
        assert!(store.smembers(UNAVAILABLE_SET).await.unwrap().is_empty());
        assert!(telemetry.events().is_empty());
    }

    #[tokio::test]
    async fn mixed_set_cleans_only_eligible_records() {
        let scale_set =
            FakeScaleSet::with_instances(vec![instance("OLD", "1"), instance("NEW", "2")]);
        let store = MemoryStore::new();
        let telemetry = RecordingTelemetry::new();
        let old_key = seed_unavailable(&store, "OLD", "1", false, 1000).await;
        let new_key = seed_unavailable(&store, "NEW", "2", false, 5).await;

        cleaner(&scale_set, &store, &telemetry, 360)
            .run_once()
            .await
            .unwrap();

        assert_eq!(store.get(&old_key).await.unwrap(), None);
        assert!(store.get(&new_key).await.unwrap().is_some());
        assert_eq!(scale_set.deleted(), vec!["1"]);
    }
}
