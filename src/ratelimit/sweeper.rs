//! Background task that periodically sweeps idle request logs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::limiter::AdmissionController;

/// How often the sweep runs by default.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Spawns the sweep task.
pub struct Sweeper;

/// Owns a running sweep task. Dropping the handle aborts the task.
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Start sweeping `controller` every `interval`. The first sweep runs one
    /// interval after spawning.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(controller: Arc<AdmissionController>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(
            interval_secs = interval.as_secs(),
            retention_secs = controller.retention().as_secs(),
            "Starting request log sweeper"
        );

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = controller.sweep().await;
                        if report.removed_keys > 0 {
                            info!(
                                removed_keys = report.removed_keys,
                                remaining_keys = report.scanned_keys - report.removed_keys,
                                "Removed idle request logs"
                            );
                        }
                    }
                    _ = &mut shutdown_rx => {
                        debug!("Sweeper received shutdown signal");
                        break;
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

impl SweeperHandle {
    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Sweeper task ended abnormally");
            }
        }
        info!("Request log sweeper stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
