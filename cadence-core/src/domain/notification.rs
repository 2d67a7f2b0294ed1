//! Notification domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobStatus;

/// A job status event for observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub job_id: Uuid,
    pub job_name: String,
    pub message: String,
    pub severity: Severity,
    /// Job status at the time of the event
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        job_id: Uuid,
        job_name: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        status: JobStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            job_name: job_name.into(),
            message: message.into(),
            severity,
            status,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}
