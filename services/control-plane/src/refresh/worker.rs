//! Refresh background worker.
//!
//! Sleeps until the next scheduled time, runs the refresh job, repeats.

use chrono::Local;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::job::RefreshJob;
use super::schedule::DailySchedule;

pub struct RefreshWorker {
    job: RefreshJob,
    schedule: DailySchedule,
}

impl RefreshWorker {
    pub fn new(job: RefreshJob, schedule: DailySchedule) -> Self {
        Self { job, schedule }
    }

    /// Run the refresh worker until shutdown is signaled. A failed run is
    /// logged and the next one is still scheduled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(at = %self.schedule.time(), "Starting refresh worker");

        loop {
            let now = Local::now();
            let next = self.schedule.next_run_after(&now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, "Next refresh scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    match self.job.run().await {
                        Ok(report) => info!(
                            deleted = report.deleted.len(),
                            pulled = report.pulled.len(),
                            "Refresh finished"
                        ),
                        Err(e) => error!(error = %e, "Refresh failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Refresh worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
