//! Dispatcher
//!
//! Claims a job for execution and hands it to the worker pool. The claim
//! (RUNNING plus a fresh dispatch id) is persisted before the message is
//! published, so a second tick never selects the same job twice.

use cadence_core::bus::{MessageBus, publish_message};
use cadence_core::domain::job::{Job, JobStatus};
use cadence_core::dto::message::{DispatchMessage, JOB_EXECUTION_TOPIC};
use cadence_core::store::JobStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::Result;
use crate::service::reconciler::Reconciler;

/// What happened to a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Published under this dispatch id
    Dispatched(Uuid),
    /// Already running, or claimed concurrently
    Skipped,
    /// Claimed but could not be published; the job was failed
    Failed,
}

pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    bus: Arc<dyn MessageBus>,
    reconciler: Arc<Reconciler>,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        bus: Arc<dyn MessageBus>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            jobs,
            bus,
            reconciler,
        }
    }

    /// Claims `job` and publishes its dispatch message
    ///
    /// `job` must be the caller's latest read; the claim is a conditional
    /// save against its version.
    pub async fn dispatch(&self, job: Job, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        if job.is_in_flight() {
            debug!(job_id = %job.id, "Job already in flight, not dispatching");
            return Ok(DispatchOutcome::Skipped);
        }

        let job_id = job.id;
        let dispatch_id = Uuid::new_v4();
        let claimed = Job {
            status: JobStatus::Running,
            previous_status: None,
            next_run_at: None,
            dispatch_id: Some(dispatch_id),
            updated_at: now,
            ..job
        };

        let claimed = match self.jobs.save(claimed).await {
            Ok(saved) => saved,
            Err(e) if e.is_conflict() => {
                debug!(job_id = %job_id, "Job claimed concurrently, skipping");
                return Ok(DispatchOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        let message = DispatchMessage::for_job(&claimed, dispatch_id);
        let key = claimed.id.to_string();

        match publish_message(self.bus.as_ref(), JOB_EXECUTION_TOPIC, &key, &message).await {
            Ok(()) => {
                info!(
                    job_id = %claimed.id,
                    dispatch_id = %dispatch_id,
                    artifact = %claimed.artifact,
                    "Job dispatched"
                );
                Ok(DispatchOutcome::Dispatched(dispatch_id))
            }
            Err(e) => {
                error!(job_id = %claimed.id, "Failed to publish dispatch: {}", e);
                self.reconciler
                    .dispatch_failed(claimed.id, dispatch_id, e.to_string(), now)
                    .await?;
                Ok(DispatchOutcome::Failed)
            }
        }
    }
}
