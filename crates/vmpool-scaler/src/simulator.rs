//! Simulator loop — synthetic reservation traffic.
//!
//! Stands in for the real reservation source so the pipeline can be
//! exercised end to end. A fixed six-step round-robin schedule decides how
//! many records to move `Available → Reserved` per tick; the step index
//! advances on every completed tick, including ticks with nothing to do.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use vmpool_core::{VmRecord, VmStatus};
use vmpool_state::{Pipeline, StateStore, AVAILABLE_SET, RESERVED_SET};

use crate::schedule::Job;

/// Records to reserve per tick, round-robin.
const SCHEDULE: [usize; 6] = [1, 0, 2, 1, 0, 2];

pub struct Simulator {
    store: Arc<dyn StateStore>,
    current_step: usize,
}

impl Simulator {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            current_step: 0,
        }
    }

    async fn simulate(&mut self) -> Result<()> {
        let requested = SCHEDULE[self.current_step];
        info!(
            step = self.current_step + 1,
            requested, "executing simulation step"
        );

        let popped = self
            .store
            .spop(AVAILABLE_SET, requested)
            .await
            .context("failed to pop available instances")?;

        if popped.len() < requested {
            warn!(
                requested,
                got = popped.len(),
                "fewer available instances than requested"
            );
        }

        if popped.is_empty() {
            debug!("no available instances, skipping simulation step");
            self.current_step = (self.current_step + 1) % SCHEDULE.len();
            return Ok(());
        }

        for key in &popped {
            let data = match self.store.get(key).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    warn!(key, "available key has no record, dropping");
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

            record.transition(VmStatus::Reserved);
            let json = match record.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!(key, error = %e, "failed to serialize record");
                    continue;
                }
            };

            // SPOP already removed the key from available; only the record
            // write and the reserved-set add remain.
            let mut pipe = Pipeline::new();
            pipe.set(key, &json);
            pipe.sadd(RESERVED_SET, key);
            if let Err(e) = self.store.exec(pipe).await {
                error!(key, error = %e, "failed to execute reservation batch");
                continue;
            }

            info!(key, "instance moved to reserved");
        }

        self.current_step = (self.current_step + 1) % SCHEDULE.len();
        Ok(())
    }
}

#[async_trait]
impl Job for Simulator {
    fn name(&self) -> &'static str {
        "simulator"
    }

    async fn run_once(&mut self) -> Result<()> {
        self.simulate().await
    }
}
