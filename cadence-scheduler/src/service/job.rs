//! Job Service
//!
//! Lifecycle operations on jobs. Every operation re-fetches the job, checks
//! the transition is allowed from its current status and saves it
//! conditionally, retrying a bounded number of times on conflict.

use cadence_core::artifact::{ArtifactError, ArtifactStore};
use cadence_core::domain::execution::ExecutionRecord;
use cadence_core::domain::job::{Job, JobStatus, JobType, Recurrence};
use cadence_core::dto::job::CreateJob;
use cadence_core::store::{ExecutionStore, JobStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::scheduler::dispatcher::{DispatchOutcome, Dispatcher};

const MAX_UPDATE_ATTEMPTS: u32 = 3;

pub struct JobService {
    jobs: Arc<dyn JobStore>,
    executions: Arc<dyn ExecutionStore>,
    artifacts: Arc<dyn ArtifactStore>,
    dispatcher: Arc<Dispatcher>,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        executions: Arc<dyn ExecutionStore>,
        artifacts: Arc<dyn ArtifactStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            jobs,
            executions,
            artifacts,
            dispatcher,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Validates and stores a new job
    ///
    /// IMMEDIATE jobs are dispatched before this returns.
    pub async fn create_job(&self, req: CreateJob, now: DateTime<Utc>) -> Result<Job> {
        if req.name.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest("job name is empty".into()));
        }
        if req.artifact.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest("artifact name is empty".into()));
        }
        let max_executions = u32::try_from(req.max_executions).map_err(|_| {
            SchedulerError::InvalidRequest(format!(
                "max executions must be between 0 and {}, got {}",
                u32::MAX,
                req.max_executions
            ))
        })?;

        // Verify artifact exists
        match self.artifacts.exists(&req.artifact).await {
            Ok(true) => {}
            Ok(false) | Err(ArtifactError::InvalidName(_)) => {
                return Err(SchedulerError::InvalidRequest(format!(
                    "artifact not found: {}",
                    req.artifact
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let (status, scheduled_at) = match req.job_type {
            JobType::Immediate => (JobStatus::Scheduled, Some(now)),
            JobType::Scheduled => match req.scheduled_at {
                Some(at) => (JobStatus::Scheduled, Some(at)),
                None => (JobStatus::Pending, None),
            },
            JobType::Recurring => {
                if req.recurrence == Recurrence::OneTime {
                    return Err(SchedulerError::InvalidRequest(
                        "recurring job needs a recurrence other than ONE_TIME".into(),
                    ));
                }
                (JobStatus::Scheduled, Some(req.scheduled_at.unwrap_or(now)))
            }
        };

        let job = Job {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            artifact: req.artifact,
            job_type: req.job_type,
            status,
            previous_status: None,
            recurrence: req.recurrence,
            scheduled_at,
            next_run_at: scheduled_at,
            last_run_at: None,
            created_at: now,
            updated_at: now,
            priority: req.priority,
            execution_count: 0,
            max_executions,
            arguments: req.arguments,
            output: None,
            error: None,
            notification_delivery_status: None,
            last_notification_at: None,
            dispatch_id: None,
            version: 0,
        };

        let job = self.jobs.insert(job).await?;

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            status = %job.status,
            "Job created: {}", job.name
        );

        if job.job_type == JobType::Immediate {
            self.dispatcher.dispatch(job.clone(), now).await?;
            return self.get_job(job.id).await;
        }

        Ok(job)
    }

    /// Schedules a job at `at`, or now
    pub async fn schedule_job(
        &self,
        id: Uuid,
        at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let at = at.unwrap_or(now);

        let job = self
            .update(id, "schedule", |mut job| {
                if job.is_in_flight() {
                    return Err(SchedulerError::invalid_transition(
                        job.id, job.status, "schedule",
                    ));
                }
                job.status = JobStatus::Scheduled;
                job.previous_status = None;
                job.scheduled_at = Some(at);
                job.next_run_at = Some(at);
                job.dispatch_id = None;
                job.updated_at = now;
                Ok(job)
            })
            .await?;

        info!(job_id = %id, "Job scheduled for {}", at);
        Ok(job)
    }

    /// Dispatches a job right away
    pub async fn execute_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job> {
        let job = self.get_job(id).await?;

        if matches!(
            job.status,
            JobStatus::Running | JobStatus::Paused | JobStatus::Cancelled
        ) {
            return Err(SchedulerError::invalid_transition(
                id, job.status, "execute",
            ));
        }

        match self.dispatcher.dispatch(job, now).await? {
            DispatchOutcome::Dispatched(dispatch_id) => {
                info!(job_id = %id, dispatch_id = %dispatch_id, "Job execution requested");
            }
            DispatchOutcome::Failed => {
                info!(job_id = %id, "Job execution requested but could not be dispatched");
            }
            DispatchOutcome::Skipped => return Err(SchedulerError::Conflict(id)),
        }

        self.get_job(id).await
    }

    pub async fn pause_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job> {
        let job = self
            .update(id, "pause", |mut job| {
                if !matches!(job.status, JobStatus::Running | JobStatus::Scheduled) {
                    return Err(SchedulerError::invalid_transition(
                        job.id, job.status, "pause",
                    ));
                }
                job.previous_status = Some(job.status);
                job.status = JobStatus::Paused;
                job.updated_at = now;
                Ok(job)
            })
            .await?;

        info!(job_id = %id, "Job paused");
        Ok(job)
    }

    /// Returns a paused job to the status it held before pausing
    pub async fn resume_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job> {
        let job = self
            .update(id, "resume", |mut job| {
                if job.status != JobStatus::Paused {
                    return Err(SchedulerError::invalid_transition(
                        job.id, job.status, "resume",
                    ));
                }
                job.status = job.previous_status.take().unwrap_or(JobStatus::Scheduled);
                if job.status == JobStatus::Scheduled && job.next_run_at.is_none() {
                    job.next_run_at = Some(now);
                }
                job.updated_at = now;
                Ok(job)
            })
            .await?;

        info!(job_id = %id, status = %job.status, "Job resumed");
        Ok(job)
    }

    /// Cancels a job; an in-flight execution runs to completion
    pub async fn cancel_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job> {
        let job = self
            .update(id, "cancel", |mut job| {
                if !matches!(
                    job.status,
                    JobStatus::Running | JobStatus::Scheduled | JobStatus::Paused
                ) {
                    return Err(SchedulerError::invalid_transition(
                        job.id, job.status, "cancel",
                    ));
                }
                job.status = JobStatus::Cancelled;
                job.previous_status = None;
                job.next_run_at = None;
                job.updated_at = now;
                Ok(job)
            })
            .await?;

        info!(job_id = %id, "Job cancelled");
        Ok(job)
    }

    /// Reschedules a finished job to run now
    pub async fn restart_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job> {
        let job = self
            .update(id, "restart", |mut job| {
                if !job.status.is_terminal() {
                    return Err(SchedulerError::invalid_transition(
                        job.id, job.status, "restart",
                    ));
                }
                job.status = JobStatus::Scheduled;
                job.previous_status = None;
                job.next_run_at = Some(now);
                job.output = None;
                job.error = None;
                job.dispatch_id = None;
                job.updated_at = now;
                Ok(job)
            })
            .await?;

        info!(job_id = %id, "Job restarted");
        Ok(job)
    }

    /// Re-fetch, apply, conditional save; retried on conflict
    async fn update<F>(&self, id: Uuid, operation: &'static str, mut apply: F) -> Result<Job>
    where
        F: FnMut(Job) -> Result<Job> + Send,
    {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let job = self.get_job(id).await?;
            let updated = apply(job)?;

            match self.jobs.save(updated).await {
                Ok(saved) => return Ok(saved),
                Err(e) if e.is_conflict() => {
                    debug!(job_id = %id, "Conflict on {}, retrying", operation);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SchedulerError::Conflict(id))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_job(&self, id: Uuid) -> Result<Job> {
        self.jobs
            .get(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))
    }

    /// All jobs, newest first
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.list().await?)
    }

    /// Deletes a job together with its execution history
    pub async fn delete_job(&self, id: Uuid) -> Result<()> {
        if !self.jobs.delete(id).await? {
            return Err(SchedulerError::NotFound(id));
        }
        let removed = self.executions.delete_for_job(id).await?;

        info!(job_id = %id, executions = removed, "Job deleted");
        Ok(())
    }

    /// Output of the job's last execution
    pub async fn job_output(&self, id: Uuid) -> Result<Option<String>> {
        Ok(self.get_job(id).await?.output)
    }

    /// Error of the job's last execution, if it failed
    pub async fn job_error(&self, id: Uuid) -> Result<Option<String>> {
        Ok(self.get_job(id).await?.error)
    }

    /// Execution history of a job, newest first
    pub async fn job_executions(&self, id: Uuid) -> Result<Vec<ExecutionRecord>> {
        self.get_job(id).await?;
        Ok(self.executions.list_for_job(id).await?)
    }

    pub async fn count_by_status(&self, status: JobStatus) -> Result<u64> {
        Ok(self.jobs.count_by_status(status).await?)
    }

    pub async fn list_artifacts(&self) -> Result<Vec<String>> {
        Ok(self.artifacts.list().await?)
    }
}
