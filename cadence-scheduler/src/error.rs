//! Scheduler error types

use cadence_core::artifact::ArtifactError;
use cadence_core::bus::BusError;
use cadence_core::domain::job::JobStatus;
use cadence_core::store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors surfaced by scheduler operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No job with this id
    #[error("job not found: {0}")]
    NotFound(Uuid),

    /// The operation is not allowed from the job's current status
    #[error("cannot {operation} job {job_id} in status {status}")]
    InvalidTransition {
        job_id: Uuid,
        status: JobStatus,
        operation: &'static str,
    },

    /// The request itself is malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The job kept changing underneath the operation
    #[error("concurrent modification of job {0}")]
    Conflict(Uuid),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl SchedulerError {
    pub fn invalid_transition(job_id: Uuid, status: JobStatus, operation: &'static str) -> Self {
        Self::InvalidTransition {
            job_id,
            status,
            operation,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => SchedulerError::NotFound(id),
            StoreError::VersionConflict { job_id, .. } => SchedulerError::Conflict(job_id),
            other => SchedulerError::Store(other),
        }
    }
}
