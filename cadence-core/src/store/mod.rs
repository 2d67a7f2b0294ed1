//! Store layer
//!
//! The job store is the single source of truth for job state. Every
//! component re-fetches a job before transitioning it, and every save is a
//! conditional write against the version it read.
//!
//! Execution history lives in a separate, append-only execution store.
//!
//! Both stores are trait-based; in-memory implementations live in
//! [`memory`], the Postgres ones in the scheduler crate.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::execution::ExecutionRecord;
use crate::domain::job::{Job, JobStatus};

pub use memory::{InMemoryExecutionStore, InMemoryJobStore};

/// Errors raised by store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(Uuid),

    /// The stored version no longer matches the version the caller read
    #[error("version conflict on job {job_id} (expected version {expected})")]
    VersionConflict { job_id: Uuid, expected: i64 },

    /// An execution record already exists for this dispatch
    #[error("dispatch {dispatch_id} already has an execution record")]
    DuplicateExecution { dispatch_id: Uuid },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateExecution { .. })
    }
}

/// Durable record of jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Stores a new job
    async fn insert(&self, job: Job) -> Result<Job, StoreError>;

    /// Fetches a job by id
    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Conditionally replaces a job
    ///
    /// Succeeds only when the stored version equals `job.version`. Returns
    /// the job as stored, with its version incremented.
    async fn save(&self, job: Job) -> Result<Job, StoreError>;

    /// Jobs in `status` whose next run is at or before `now`, ordered by
    /// priority descending then creation order
    async fn find_due(&self, now: DateTime<Utc>, status: JobStatus)
    -> Result<Vec<Job>, StoreError>;

    /// Deletes a job, returning whether it existed
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Deletes a job only while its stored version is still `version`
    ///
    /// Returns `false` when the job is gone or has been saved since.
    async fn delete_version(&self, id: Uuid, version: i64) -> Result<bool, StoreError>;

    /// Jobs created before `cutoff` whose status is one of `statuses`
    async fn find_by_created_before(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>, StoreError>;

    /// All jobs, newest first
    async fn list(&self) -> Result<Vec<Job>, StoreError>;

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError>;
}

/// Append-only execution history
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Adds a new record
    ///
    /// At most one record exists per dispatch; a second append for the same
    /// `dispatch_id` fails with [`StoreError::DuplicateExecution`].
    async fn append(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    /// Replaces a record with its finished form
    async fn finish(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    /// Records of a job, newest first
    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ExecutionRecord>, StoreError>;

    async fn latest_for_job(&self, job_id: Uuid) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Drops the history of a deleted job, returning the number of records removed
    async fn delete_for_job(&self, job_id: Uuid) -> Result<u64, StoreError>;
}
