//! Periodic background jobs.
//!
//! A [`JobRunner`] drives a [`PeriodicJob`] on a fixed interval:
//!
//! - the first tick waits a random startup jitter so several instances do not
//!   fire in lockstep
//! - each tick runs the job on its own task; a tick that arrives while the
//!   previous run is still in flight is skipped and logged, never queued
//! - a `watch` shutdown signal stops the loop; the loop owns the in-flight
//!   run and waits for it before returning
//!
//! # Example
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let handle = JobRunner::new(retry_job, Duration::from_secs(300))
//!     .with_startup_jitter(Duration::from_secs(10))
//!     .spawn(shutdown_rx);
//! // ...
//! let _ = shutdown_tx.send(true);
//! handle.await?;
//! ```

use async_trait::async_trait;
use rand::Rng;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, sleep};

/// One unit of periodic work.
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    /// Failure type of a run
    type Error: Display + Send;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Perform one pass.
    ///
    /// # Errors
    ///
    /// Any error is logged by the runner; the next tick runs regardless.
    async fn run(&self) -> Result<(), Self::Error>;
}

/// What happened when a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job ran to completion
    Completed,
    /// The job ran and returned an error
    Failed,
    /// A previous run was still in flight
    Skipped,
}

/// Resets the in-flight flag even if the job panics.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives a [`PeriodicJob`] on an interval with an overlap guard.
pub struct JobRunner<J> {
    job: Arc<J>,
    interval: Duration,
    startup_jitter: Duration,
    running: Arc<AtomicBool>,
}

impl<J> Clone for JobRunner<J> {
    fn clone(&self) -> Self {
        Self {
            job: Arc::clone(&self.job),
            interval: self.interval,
            startup_jitter: self.startup_jitter,
            running: Arc::clone(&self.running),
        }
    }
}

impl<J: PeriodicJob> JobRunner<J> {
    /// Create a runner for `job` ticking every `interval`.
    #[must_use]
    pub fn new(job: J, interval: Duration) -> Self {
        Self::from_arc(Arc::new(job), interval)
    }

    /// Create a runner for a shared job.
    #[must_use]
    pub fn from_arc(job: Arc<J>, interval: Duration) -> Self {
        Self {
            job,
            interval: interval.max(Duration::from_millis(1)),
            startup_jitter: Duration::ZERO,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wait a random delay in `[0, max]` before the first tick.
    #[must_use]
    pub const fn with_startup_jitter(mut self, max: Duration) -> Self {
        self.startup_jitter = max;
        self
    }

    /// The job being driven
    #[must_use]
    pub fn job(&self) -> &Arc<J> {
        &self.job
    }

    /// Whether a run is in flight
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the job once now, unless a run is already in flight.
    pub async fn run_once(&self) -> RunOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!(job = self.job.name(), "Previous run still in progress, skipping tick");
            return RunOutcome::Skipped;
        }
        let _guard = RunningGuard(Arc::clone(&self.running));

        let started = std::time::Instant::now();
        match self.job.run().await {
            Ok(()) => {
                tracing::debug!(
                    job = self.job.name(),
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Job run completed"
                );
                RunOutcome::Completed
            }
            Err(error) => {
                tracing::error!(job = self.job.name(), error = %error, "Job run failed");
                RunOutcome::Failed
            }
        }
    }

    fn initial_delay(&self) -> Duration {
        if self.startup_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.startup_jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Start the loop on a background task.
    ///
    /// The task exits when `shutdown` flips to `true` or its sender is dropped,
    /// after the in-flight run (if any) has finished.
    #[must_use]
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let name = self.job.name();
            let delay = self.initial_delay();
            tracing::info!(
                job = name,
                interval_secs = self.interval.as_secs(),
                startup_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Starting periodic job"
            );

            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => {
                    tracing::info!(job = name, "Periodic job stopped before first run");
                    return;
                }
            }

            let mut ticker = interval_at(tokio::time::Instant::now(), self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut in_flight: Option<JoinHandle<RunOutcome>> = None;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if in_flight.as_ref().is_some_and(|run| !run.is_finished()) {
                            tracing::info!(job = name, "Previous run still in progress, skipping tick");
                        } else {
                            let runner = self.clone();
                            in_flight = Some(tokio::spawn(async move { runner.run_once().await }));
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            if let Some(run) = in_flight.take() {
                                tracing::info!(job = name, "Waiting for the in-flight run");
                                if let Err(error) = run.await {
                                    tracing::error!(job = name, error = %error, "In-flight run panicked");
                                }
                            }
                            tracing::info!(job = name, "Periodic job stopped");
                            return;
                        }
                    }
                }
            }
        })
    }
}
