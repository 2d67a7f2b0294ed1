//! In-memory stores
//!
//! Used by tests and by the scheduler binary when no database is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ExecutionStore, JobStore, StoreError};
use crate::domain::execution::ExecutionRecord;
use crate::domain::job::{Job, JobStatus};

/// Job store backed by a map
///
/// Each job keeps the sequence number it was inserted with, which is the
/// creation order used to break priority ties.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: RwLock<JobTable>,
}

#[derive(Default)]
struct JobTable {
    next_seq: u64,
    jobs: HashMap<Uuid, (u64, Job)>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<Job, StoreError> {
        let mut table = self.inner.write().await;
        if table.jobs.contains_key(&job.id) {
            return Err(StoreError::Backend(format!("duplicate job id {}", job.id)));
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.jobs.insert(job.id, (seq, job.clone()));
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let table = self.inner.read().await;
        Ok(table.jobs.get(&id).map(|(_, job)| job.clone()))
    }

    async fn save(&self, mut job: Job) -> Result<Job, StoreError> {
        let mut table = self.inner.write().await;
        let (_, stored) = table
            .jobs
            .get_mut(&job.id)
            .ok_or(StoreError::NotFound(job.id))?;

        if stored.version != job.version {
            return Err(StoreError::VersionConflict {
                job_id: job.id,
                expected: job.version,
            });
        }

        job.version += 1;
        *stored = job.clone();
        Ok(job)
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        status: JobStatus,
    ) -> Result<Vec<Job>, StoreError> {
        let table = self.inner.read().await;
        let mut due: Vec<&(u64, Job)> = table
            .jobs
            .values()
            .filter(|(_, job)| job.status == status && job.next_run_at.is_some_and(|at| at <= now))
            .collect();

        due.sort_by(|(seq_a, a), (seq_b, b)| b.priority.cmp(&a.priority).then(seq_a.cmp(seq_b)));

        Ok(due.into_iter().map(|(_, job)| job.clone()).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut table = self.inner.write().await;
        Ok(table.jobs.remove(&id).is_some())
    }

    async fn delete_version(&self, id: Uuid, version: i64) -> Result<bool, StoreError> {
        let mut table = self.inner.write().await;
        let current = table
            .jobs
            .get(&id)
            .is_some_and(|(_, stored)| stored.version == version);
        if current {
            table.jobs.remove(&id);
        }
        Ok(current)
    }

    async fn find_by_created_before(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>, StoreError> {
        let table = self.inner.read().await;
        Ok(table
            .jobs
            .values()
            .filter(|(_, job)| job.created_at < cutoff && statuses.contains(&job.status))
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        let table = self.inner.read().await;
        let mut jobs: Vec<&(u64, Job)> = table.jobs.values().collect();
        jobs.sort_by(|(a, _), (b, _)| b.cmp(a));
        Ok(jobs.into_iter().map(|(_, job)| job.clone()).collect())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        let table = self.inner.read().await;
        Ok(table
            .jobs
            .values()
            .filter(|(_, job)| job.status == status)
            .count() as u64)
    }
}

/// Execution store backed by a vector in append order
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<Vec<ExecutionRecord>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn append(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.dispatch_id == record.dispatch_id) {
            return Err(StoreError::DuplicateExecution {
                dispatch_id: record.dispatch_id,
            });
        }
        records.push(record);
        Ok(())
    }

    async fn finish(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let slot = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or(StoreError::NotFound(record.id))?;
        *slot = record;
        Ok(())
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ExecutionRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn latest_for_job(&self, job_id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().rev().find(|r| r.job_id == job_id).cloned())
    }

    async fn delete_for_job(&self, job_id: Uuid) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.job_id != job_id);
        Ok((before - records.len()) as u64)
    }
}
