//! The scheduling skeleton shared by all five loops.
//!
//! A [`JobRunner`] fires a tick every `interval`, starting `delay` after
//! [`JobRunner::start`]. At most one invocation of the job is in flight at
//! any time: the turnstile is a bounded channel of capacity one whose single
//! token is the job value itself. A tick that finds the slot empty is
//! dropped, never queued.
//!
//! Each invocation races the work against the per-invocation timeout and the
//! stop signal; losing the race drops the in-flight future, which aborts
//! every outstanding external call at its next suspension point. Invocation
//! failures of any kind are logged and swallowed; the loop keeps its period
//! and never exits on error.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vmpool_core::ScalerConfig;

/// The three durations parameterising a loop.
#[derive(Debug, Clone, Copy)]
pub struct JobTimings {
    /// Grace period before the first tick.
    pub delay: Duration,
    /// Tick period.
    pub interval: Duration,
    /// Upper bound on a single invocation.
    pub timeout: Duration,
}

impl JobTimings {
    /// Build from whole seconds, rejecting non-positive values.
    pub fn from_secs(delay: u64, interval: u64, timeout: u64) -> Result<Self> {
        if delay == 0 {
            bail!("invalid job delay: must be positive");
        }
        if interval == 0 {
            bail!("invalid job interval: must be positive");
        }
        if timeout == 0 {
            bail!("invalid job timeout: must be positive");
        }
        Ok(Self {
            delay: Duration::from_secs(delay),
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(timeout),
        })
    }

    pub fn from_config(config: &ScalerConfig) -> Result<Self> {
        Self::from_secs(config.job_delay, config.job_interval, config.job_timeout)
    }
}

/// A unit of periodic work driven by a [`JobRunner`].
#[async_trait]
pub trait Job: Send + 'static {
    fn name(&self) -> &'static str;

    /// One invocation. Errors are logged by the skeleton and do not affect
    /// scheduling.
    async fn run_once(&mut self) -> Result<()>;
}

/// Handle to a scheduled loop.
pub struct JobRunner {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl JobRunner {
    /// Arm the loop and return immediately. The first tick fires after
    /// `timings.delay`, subsequent ticks every `timings.interval`.
    pub fn start<J: Job>(job: J, timings: JobTimings) -> Self {
        let name = job.name();
        let (stop_tx, stop_rx) = watch::channel(false);
        info!(
            job = name,
            delay_secs = timings.delay.as_secs(),
            interval_secs = timings.interval.as_secs(),
            "job scheduled to start"
        );
        let handle = tokio::spawn(run_loop(job, timings, stop_rx));
        Self {
            name,
            stop_tx,
            handle,
        }
    }

    /// Signal cancellation of the in-flight invocation and stop ticking.
    /// Returns promptly; the current invocation is not awaited.
    pub fn stop(&self) {
        info!(job = self.name, "stopping job");
        let _ = self.stop_tx.send(true);
    }

    /// Wait for the tick loop to wind down (after [`JobRunner::stop`]).
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn run_loop<J: Job>(job: J, timings: JobTimings, mut stop_rx: watch::Receiver<bool>) {
    let name = job.name();

    // Turnstile: the job itself is the single token. It is taken out of the
    // slot to dispatch an invocation and put back when the invocation ends.
    let (slot_tx, mut slot_rx) = mpsc::channel::<J>(1);
    if slot_tx.try_send(job).is_err() {
        error!(job = name, "failed to arm job slot");
        return;
    }

    let start = tokio::time::Instant::now() + timings.delay;
    let mut ticker = tokio::time::interval_at(start, timings.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    info!(job = name, "job loop stopped");
                    return;
                }
            }
            _ = ticker.tick() => {
                let Ok(mut job) = slot_rx.try_recv() else {
                    warn!(job = name, "operation still running, dropping tick");
                    continue;
                };

                let slot = slot_tx.clone();
                let mut stop = stop_rx.clone();
                let timeout = timings.timeout;
                tokio::spawn(async move {
                    let outcome = tokio::select! {
                        result = job.run_once() => result,
                        _ = tokio::time::sleep(timeout) => {
                            Err(anyhow!("invocation exceeded {}s timeout", timeout.as_secs()))
                        }
                        _ = stop_requested(&mut stop) => {
                            Err(anyhow!("invocation cancelled by stop"))
                        }
                    };
                    if let Err(e) = outcome {
                        error!(job = name, error = format!("{e:#}"), "job invocation failed");
                    }
                    // Put the token back; the receiver being gone just means
                    // the loop already stopped.
                    let _ = slot.send(job).await;
                });
            }
        }
    }
}

/// Completes when stop is requested or the runner is gone.
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}
