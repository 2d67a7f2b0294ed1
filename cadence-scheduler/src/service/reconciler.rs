//! Result Reconciler
//!
//! Applies execution outcomes to jobs. This is the only place a dispatched
//! job leaves RUNNING:
//!
//! | Outcome | Recurring, under max executions | Otherwise |
//! |---|---|---|
//! | success | SCHEDULED at the next run | COMPLETED |
//! | failure | SCHEDULED at the next run (retry) | FAILED |
//!
//! A job paused while running takes the outcome into `previous_status`; a
//! job cancelled while running records the output but stays CANCELLED.
//! Results whose dispatch id no longer matches the job are ignored.
//!
//! Results normally arrive on the bus; workers that cannot publish hand them
//! over directly through [`ResultSink`].

use async_trait::async_trait;
use cadence_core::bus::Subscription;
use cadence_core::domain::execution::{ExecutionResult, FailureReason};
use cadence_core::domain::job::{Job, JobStatus, NotificationDeliveryStatus};
use cadence_core::domain::notification::{Notification, Severity};
use cadence_core::dto::message::ResultMessage;
use cadence_core::recurrence::RecurrenceCalculator;
use cadence_core::store::JobStore;
use cadence_worker::ResultSink;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::service::notification::Notifier;

/// Attempts at a conditional save before giving up
const MAX_SAVE_ATTEMPTS: u32 = 3;

/// What happened to a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The result was applied; carries the job's status afterwards
    Applied(JobStatus),
    /// Unknown job or stale dispatch; nothing changed
    Ignored,
}

pub struct Reconciler {
    jobs: Arc<dyn JobStore>,
    notifier: Arc<Notifier>,
    recurrence: RecurrenceCalculator,
}

impl Reconciler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        notifier: Arc<Notifier>,
        recurrence: RecurrenceCalculator,
    ) -> Self {
        Self {
            jobs,
            notifier,
            recurrence,
        }
    }

    /// Applies a result message received from the bus
    pub async fn apply_message(
        &self,
        message: &ResultMessage,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let result = message.to_execution_result();
        self.apply(message.job_id, message.dispatch_id, &result, now)
            .await
    }

    /// Records a dispatch that never reached a worker as a failed execution
    pub async fn dispatch_failed(
        &self,
        job_id: Uuid,
        dispatch_id: Uuid,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let result = ExecutionResult::failed(
            FailureReason::Dispatch {
                reason: reason.into(),
            },
            String::new(),
            0,
        );
        self.apply(job_id, dispatch_id, &result, now).await
    }

    /// Applies the outcome of dispatch `dispatch_id` to job `job_id`
    pub async fn apply(
        &self,
        job_id: Uuid,
        dispatch_id: Uuid,
        result: &ExecutionResult,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let Some(job) = self.jobs.get(job_id).await? else {
                warn!(job_id = %job_id, "Result for unknown job, ignoring");
                return Ok(ReconcileOutcome::Ignored);
            };

            if job.dispatch_id != Some(dispatch_id) {
                warn!(
                    job_id = %job_id,
                    status = %job.status,
                    "Stale result for dispatch {}, ignoring", dispatch_id
                );
                return Ok(ReconcileOutcome::Ignored);
            }

            let Some((updated, notification)) = self.transition(job, result, now) else {
                warn!(job_id = %job_id, "Result for job not in flight, ignoring");
                return Ok(ReconcileOutcome::Ignored);
            };

            match self.jobs.save(updated).await {
                Ok(saved) => {
                    info!(
                        job_id = %job_id,
                        status = %saved.status,
                        success = result.success,
                        "Execution outcome applied"
                    );
                    if let Some(notification) = notification {
                        self.deliver(&saved, notification, now).await;
                    }
                    return Ok(ReconcileOutcome::Applied(saved.status));
                }
                Err(e) if e.is_conflict() && attempt < MAX_SAVE_ATTEMPTS => {
                    debug!(job_id = %job_id, "Conflict applying result, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Computes the job after an outcome, with the notification it triggers
    fn transition(
        &self,
        mut job: Job,
        result: &ExecutionResult,
        now: DateTime<Utc>,
    ) -> Option<(Job, Option<Notification>)> {
        let paused_while_running =
            job.status == JobStatus::Paused && job.previous_status == Some(JobStatus::Running);
        let in_flight = job.status == JobStatus::Running
            || paused_while_running
            || job.status == JobStatus::Cancelled;
        if !in_flight {
            return None;
        }

        job.execution_count = job.execution_count.saturating_add(1);
        job.last_run_at = Some(now);
        job.updated_at = now;
        job.dispatch_id = None;
        job.output = Some(result.output.clone());
        job.error = (!result.success).then(|| result.message.clone());

        if job.status == JobStatus::Cancelled {
            job.next_run_at = None;
            return Some((job, None));
        }

        let next_run = if job.is_recurring() && !job.max_executions_reached() {
            let anchor = job.scheduled_at.unwrap_or(now);
            self.recurrence.next_run(anchor, &job.recurrence, now)
        } else {
            None
        };

        let (outcome, message, severity) = match (next_run, result.success) {
            (Some(next), true) => (
                JobStatus::Scheduled,
                format!("Job executed successfully and scheduled for next run at {next}"),
                Severity::Success,
            ),
            (Some(next), false) => (
                JobStatus::Scheduled,
                format!("Job execution failed but scheduled for retry at {next}"),
                Severity::Error,
            ),
            (None, true) => (
                JobStatus::Completed,
                format!("Job completed successfully: {}", result.output.trim_end()),
                Severity::Success,
            ),
            (None, false) => (
                JobStatus::Failed,
                format!("Job failed: {}", result.message),
                Severity::Error,
            ),
        };

        if next_run.is_some() {
            job.scheduled_at = next_run;
        }
        job.next_run_at = next_run;

        if paused_while_running {
            job.previous_status = Some(outcome);
        } else {
            job.status = outcome;
        }

        job.notification_delivery_status = Some(NotificationDeliveryStatus::Pending);

        let notification =
            Notification::new(job.id, job.name.clone(), message, severity, outcome, now);
        Some((job, Some(notification)))
    }

    /// Emits a notification and records its delivery status on the job
    ///
    /// The transition is already persisted; failures here are only logged.
    async fn deliver(&self, job: &Job, notification: Notification, now: DateTime<Utc>) {
        let status = self.notifier.notify(&notification).await;

        for _ in 0..MAX_SAVE_ATTEMPTS {
            let mut current = match self.jobs.get(job.id).await {
                Ok(Some(current)) => current,
                Ok(None) => return,
                Err(e) => {
                    warn!(job_id = %job.id, "Failed to record notification status: {}", e);
                    return;
                }
            };

            current.notification_delivery_status = Some(status);
            current.last_notification_at = Some(now);

            match self.jobs.save(current).await {
                Ok(_) => return,
                Err(e) if e.is_conflict() => continue,
                Err(e) => {
                    warn!(job_id = %job.id, "Failed to record notification status: {}", e);
                    return;
                }
            }
        }

        warn!(
            job_id = %job.id,
            "Gave up recording notification status after {} attempts", MAX_SAVE_ATTEMPTS
        );
    }

    /// Consumes result messages until shutdown
    pub async fn run(&self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        info!("Starting result consumer");

        loop {
            let envelope = tokio::select! {
                envelope = subscription.recv() => envelope,
                _ = shutdown.changed() => break,
            };

            let Some(envelope) = envelope else {
                info!("Result subscription closed");
                break;
            };

            let message = match envelope.decode::<ResultMessage>() {
                Ok(message) => message,
                Err(e) => {
                    warn!("Discarding malformed result message {}: {}", envelope.key, e);
                    continue;
                }
            };

            if let Err(e) = self.apply_message(&message, Utc::now()).await {
                error!(job_id = %message.job_id, "Failed to apply result: {}", e);
            }
        }

        info!("Result consumer stopped");
    }
}

#[async_trait]
impl ResultSink for Reconciler {
    async fn deliver(&self, message: &ResultMessage) -> anyhow::Result<()> {
        let outcome = self.apply_message(message, Utc::now()).await?;
        debug!(job_id = %message.job_id, "Directly delivered result: {:?}", outcome);
        Ok(())
    }
}
