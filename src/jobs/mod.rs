//! Scheduled Jobs
//!
//! Runs the cancellation sweep on a fixed interval for the lifetime of the
//! process. Stopping the scheduler lets an in-flight sweep finish the current
//! candidate's unit before the task exits.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::store::Store;
use crate::sweeper::{CancellationSweeper, SweepReport};

// =========================================================================
// Sweep Scheduler
// =========================================================================

/// Sweep Scheduler - runs the cancellation sweeper periodically
pub struct SweepScheduler<S: Store> {
    sweeper: CancellationSweeper<S>,
}

impl<S: Store> SweepScheduler<S> {
    /// Create a new sweep scheduler
    pub fn new(sweeper: CancellationSweeper<S>) -> Self {
        Self { sweeper }
    }

    /// Start the scheduler in the background.
    /// The first sweep runs one interval after start.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Run the scheduler loop until shutdown is signalled
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let settings = *self.sweeper.settings();
        tracing::info!(
            interval_secs = settings.interval.as_secs(),
            batch_size = settings.batch_size,
            "Sweep scheduler started"
        );

        let mut ticker = interval_at(Instant::now() + settings.interval, settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // a dropped sender also means stop
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_sweep(&shutdown).await;
                }
            }
        }

        tracing::info!("Sweep scheduler stopped");
    }

    /// Run one sweep now (for manual trigger or testing)
    pub async fn run_sweep(&self, shutdown: &watch::Receiver<bool>) -> Option<SweepReport> {
        match self.sweeper.run_once(shutdown).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Sweep candidate selection failed");
                None
            }
        }
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop and wait up to `timeout` for it to finish.
    ///
    /// Past the deadline the task is aborted, dropping (and so rolling back)
    /// any unit it had open. Returns whether the scheduler stopped on its own.
    pub async fn shutdown_within(self, timeout: Duration) -> bool {
        // the receiver is gone only if the task already ended
        let _ = self.shutdown.send(true);

        let mut task = self.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Sweep scheduler task failed");
                true
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Sweep scheduler did not stop in time, aborting it"
                );
                task.abort();
                // resolves with a cancellation error once the task is dropped
                let _ = task.await;
                false
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
