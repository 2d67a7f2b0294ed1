//! Retention sweep
//!
//! Deletes COMPLETED, FAILED and CANCELLED jobs created before the retention
//! horizon, together with their execution history.

use cadence_core::domain::job::JobStatus;
use cadence_core::store::{ExecutionStore, JobStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info, warn};

use crate::error::Result;

pub struct RetentionSweep {
    jobs: Arc<dyn JobStore>,
    executions: Arc<dyn ExecutionStore>,
    horizon: Duration,
}

impl RetentionSweep {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        executions: Arc<dyn ExecutionStore>,
        horizon: Duration,
    ) -> Self {
        Self {
            jobs,
            executions,
            horizon,
        }
    }

    /// Deletes expired terminal jobs, returning how many were removed
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.horizon;
        let expired = self
            .jobs
            .find_by_created_before(cutoff, &JobStatus::TERMINAL)
            .await?;

        let mut deleted = 0;
        for job in expired {
            // a job restarted since the query is no longer terminal
            let current = match self.jobs.get(job.id).await? {
                Some(current) if current.status.is_terminal() => current,
                _ => continue,
            };

            if !self.jobs.delete_version(current.id, current.version).await? {
                info!(job_id = %current.id, "Job changed during retention sweep, keeping it");
                continue;
            }
            deleted += 1;

            if let Err(e) = self.executions.delete_for_job(current.id).await {
                warn!(job_id = %current.id, "Failed to delete execution history: {}", e);
            }
        }

        if deleted > 0 {
            info!("Retention sweep deleted {} job(s) created before {}", deleted, cutoff);
        }

        Ok(deleted)
    }

    /// Sweeps on a fixed interval until shutdown
    pub async fn run(&self, every: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting retention sweep (horizon: {} days, interval: {:?})",
            self.horizon.num_days(),
            every
        );

        let mut interval = time::interval(every);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.sweep(Utc::now()).await {
                error!("Retention sweep failed: {}", e);
            }
        }

        info!("Retention sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::domain::execution::ExecutionRecord;
    use cadence_core::domain::job::{Job, JobType, Recurrence};
    use async_trait::async_trait;
    use cadence_core::store::{InMemoryExecutionStore, InMemoryJobStore, StoreError};
    use uuid::Uuid;

    /// Restarts every job right after handing out a read of it
    struct RestartOnRead {
        inner: InMemoryJobStore,
    }

    #[async_trait]
    impl JobStore for RestartOnRead {
        async fn insert(&self, job: Job) -> std::result::Result<Job, StoreError> {
            self.inner.insert(job).await
        }

        async fn get(&self, id: Uuid) -> std::result::Result<Option<Job>, StoreError> {
            let read = self.inner.get(id).await?;
            if let Some(job) = &read {
                let mut restarted = job.clone();
                restarted.status = JobStatus::Scheduled;
                restarted.next_run_at = Some(Utc::now());
                self.inner.save(restarted).await?;
            }
            Ok(read)
        }

        async fn save(&self, job: Job) -> std::result::Result<Job, StoreError> {
            self.inner.save(job).await
        }

        async fn find_due(
            &self,
            now: DateTime<Utc>,
            status: JobStatus,
        ) -> std::result::Result<Vec<Job>, StoreError> {
            self.inner.find_due(now, status).await
        }

        async fn delete(&self, id: Uuid) -> std::result::Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn delete_version(
            &self,
            id: Uuid,
            version: i64,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.delete_version(id, version).await
        }

        async fn find_by_created_before(
            &self,
            cutoff: DateTime<Utc>,
            statuses: &[JobStatus],
        ) -> std::result::Result<Vec<Job>, StoreError> {
            self.inner.find_by_created_before(cutoff, statuses).await
        }

        async fn list(&self) -> std::result::Result<Vec<Job>, StoreError> {
            self.inner.list().await
        }

        async fn count_by_status(&self, status: JobStatus) -> std::result::Result<u64, StoreError> {
            self.inner.count_by_status(status).await
        }
    }

    fn job(status: JobStatus, created_at: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            name: format!("{status}"),
            description: None,
            artifact: "job.jar".to_string(),
            job_type: JobType::Scheduled,
            status,
            previous_status: None,
            recurrence: Recurrence::OneTime,
            scheduled_at: Some(created_at),
            next_run_at: None,
            last_run_at: None,
            created_at,
            updated_at: created_at,
            priority: 0,
            execution_count: 0,
            max_executions: 0,
            arguments: Vec::new(),
            output: None,
            error: None,
            notification_delivery_status: None,
            last_notification_at: None,
            dispatch_id: None,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_old_terminal_jobs() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let executions = Arc::new(InMemoryExecutionStore::new());
        let now = Utc::now();
        let old = now - Duration::days(31);
        let recent = now - Duration::days(29);

        let old_completed = jobs.insert(job(JobStatus::Completed, old)).await.unwrap();
        let old_failed = jobs.insert(job(JobStatus::Failed, old)).await.unwrap();
        let old_cancelled = jobs.insert(job(JobStatus::Cancelled, old)).await.unwrap();
        let old_scheduled = jobs.insert(job(JobStatus::Scheduled, old)).await.unwrap();
        let old_paused = jobs.insert(job(JobStatus::Paused, old)).await.unwrap();
        let recent_completed = jobs.insert(job(JobStatus::Completed, recent)).await.unwrap();

        executions
            .append(ExecutionRecord::started(old_completed.id, Uuid::new_v4(), old))
            .await
            .unwrap();

        let sweep = RetentionSweep::new(jobs.clone(), executions.clone(), Duration::days(30));
        assert_eq!(sweep.sweep(now).await.unwrap(), 3);

        for gone in [&old_completed, &old_failed, &old_cancelled] {
            assert!(jobs.get(gone.id).await.unwrap().is_none());
        }
        for kept in [&old_scheduled, &old_paused, &recent_completed] {
            assert!(jobs.get(kept.id).await.unwrap().is_some());
        }
        assert!(executions.list_for_job(old_completed.id).await.unwrap().is_empty());

        assert_eq!(sweep.sweep(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_job_restarted_after_its_read() {
        let jobs = Arc::new(RestartOnRead {
            inner: InMemoryJobStore::new(),
        });
        let executions = Arc::new(InMemoryExecutionStore::new());
        let now = Utc::now();
        let old = now - Duration::days(31);

        let completed = jobs.insert(job(JobStatus::Completed, old)).await.unwrap();
        executions
            .append(ExecutionRecord::started(completed.id, Uuid::new_v4(), old))
            .await
            .unwrap();

        let sweep = RetentionSweep::new(jobs.clone(), executions.clone(), Duration::days(30));
        assert_eq!(sweep.sweep(now).await.unwrap(), 0);

        let kept = jobs.inner.get(completed.id).await.unwrap().unwrap();
        assert_eq!(kept.status, JobStatus::Scheduled);
        assert_eq!(executions.list_for_job(completed.id).await.unwrap().len(), 1);
    }
}
