//! Execution domain types
//!
//! - [`ExecutionRecord`]: append-only history entry, one per dispatch attempt
//! - [`ExecutionResult`]: outcome of running an artifact once
//! - [`FailureReason`]: classification of a failed outcome

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Log line written when an execution record is opened
pub const EXECUTION_STARTED_LOG: &str = "Starting job execution...";

/// One execution attempt of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub dispatch_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub logs: String,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
}

impl ExecutionRecord {
    /// Opens a record in STARTED state
    pub fn started(job_id: Uuid, dispatch_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            dispatch_id,
            start_time: now,
            end_time: None,
            status: ExecutionStatus::Started,
            logs: EXECUTION_STARTED_LOG.to_string(),
            error_message: None,
            duration_ms: None,
        }
    }

    /// Closes the record with the outcome of the run
    pub fn finish(&mut self, result: &ExecutionResult, now: DateTime<Utc>) {
        self.end_time = Some(now);
        self.duration_ms = Some(result.duration_ms);
        self.logs = result.output.clone();
        if result.success {
            self.status = ExecutionStatus::Completed;
            self.error_message = None;
        } else {
            self.status = ExecutionStatus::Failed;
            self.error_message = Some(result.message.clone());
        }
    }
}

/// Status of an execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Started => "STARTED",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(ExecutionStatus::Started),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Outcome of running an artifact once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Human readable summary
    pub message: String,
    /// Combined stdout and stderr
    pub output: String,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureReason>,
}

impl ExecutionResult {
    /// Result of a process that exited with code 0
    pub fn completed(output: String, duration_ms: u64) -> Self {
        Self {
            success: true,
            message: "Process completed successfully".to_string(),
            output,
            duration_ms,
            exit_code: Some(0),
            failure: None,
        }
    }

    /// Result of a failed run
    pub fn failed(reason: FailureReason, output: String, duration_ms: u64) -> Self {
        let exit_code = match reason {
            FailureReason::NonZeroExit { code } => Some(code),
            _ => None,
        };
        Self {
            success: false,
            message: reason.to_string(),
            output,
            duration_ms,
            exit_code,
            failure: Some(reason),
        }
    }
}

/// Why an execution did not succeed
///
/// The display form is the message recorded on the job and the execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    #[error("Process failed with exit code {code}")]
    NonZeroExit { code: i32 },

    #[error("Process timed out after {after_secs} seconds")]
    Timeout { after_secs: u64 },

    #[error("Error: {reason}")]
    ArtifactFetch { reason: String },

    #[error("Error: {reason}")]
    ProcessStart { reason: String },

    /// The dispatch message never reached a worker
    #[error("Error: {reason}")]
    Dispatch { reason: String },
}
