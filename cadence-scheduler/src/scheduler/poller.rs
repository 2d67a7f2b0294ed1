//! Due job poller
//!
//! Selects SCHEDULED jobs whose next run has arrived and dispatches them,
//! highest priority first. A failed query skips the tick; the next tick
//! picks the same jobs up again.

use cadence_core::domain::job::JobStatus;
use cadence_core::store::JobStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::dispatcher::{DispatchOutcome, Dispatcher};

/// How late a due job may be before it is reported
const LATE_THRESHOLD_SECS: i64 = 60;

/// Summary of a single tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub dispatched: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Poller {
    jobs: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
}

impl Poller {
    pub fn new(jobs: Arc<dyn JobStore>, dispatcher: Arc<Dispatcher>, interval: Duration) -> Self {
        Self {
            jobs,
            dispatcher,
            interval,
        }
    }

    /// Ids of jobs due at `now`, in dispatch order
    pub async fn poll_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let due = self.jobs.find_due(now, JobStatus::Scheduled).await?;
        Ok(due.into_iter().map(|job| job.id).collect())
    }

    /// Polls once and dispatches every due job
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let due = self.poll_due_jobs(now).await?;

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        if due.is_empty() {
            debug!("No due jobs");
            return Ok(report);
        }

        info!("Found {} due job(s)", due.len());

        for job_id in due {
            match self.dispatch_one(job_id, now).await {
                Ok(DispatchOutcome::Dispatched(_)) => report.dispatched += 1,
                Ok(DispatchOutcome::Skipped) => report.skipped += 1,
                Ok(DispatchOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    error!(job_id = %job_id, "Failed to dispatch job: {}", e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn dispatch_one(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        // Re-fetch: the job may have changed since the query
        let Some(job) = self.jobs.get(job_id).await? else {
            return Ok(DispatchOutcome::Skipped);
        };

        if !job.is_due(now) {
            debug!(job_id = %job_id, status = %job.status, "Job no longer due");
            return Ok(DispatchOutcome::Skipped);
        }

        if let Some(next_run_at) = job.next_run_at {
            let late = now - next_run_at;
            if late.num_seconds() > LATE_THRESHOLD_SECS {
                warn!(
                    job_id = %job_id,
                    "Job is running {}s behind schedule (due at {})",
                    late.num_seconds(),
                    next_run_at
                );
            }
        }

        self.dispatcher.dispatch(job, now).await
    }

    /// Ticks on a fixed interval until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting poller (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            match self.tick(Utc::now()).await {
                Ok(report) if report.due > 0 => {
                    info!(
                        dispatched = report.dispatched,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Tick complete"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Error during poll cycle, skipping tick: {}", e),
            }
        }

        info!("Poller stopped");
    }
}
