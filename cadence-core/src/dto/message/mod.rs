//! Bus message DTOs
//!
//! Payloads published on the message bus. Field names are camelCase on the
//! wire; the message key is always the job id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::execution::{ExecutionResult, FailureReason};
use crate::domain::job::{Job, JobType, Recurrence};

/// Topic carrying dispatch messages to the worker pool
pub const JOB_EXECUTION_TOPIC: &str = "job-execution";

/// Topic carrying execution results back to the scheduler
pub const JOB_RESULT_TOPIC: &str = "job-result";

/// Topic carrying notifications to observers
pub const JOB_NOTIFICATIONS_TOPIC: &str = "job-notifications";

/// Metadata key holding the artifact name
pub const ARTIFACT_METADATA_KEY: &str = "jarName";

/// Work item handed to the worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub job_id: Uuid,
    pub dispatch_id: Uuid,
    pub artifact_name: String,
    pub execution_type: JobType,
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(rename = "recurrenceType")]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DispatchMessage {
    /// Builds the dispatch message for a job claimed under `dispatch_id`
    pub fn for_job(job: &Job, dispatch_id: Uuid) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(ARTIFACT_METADATA_KEY.to_string(), job.artifact.clone());

        Self {
            job_id: job.id,
            dispatch_id,
            artifact_name: job.artifact.clone(),
            execution_type: job.job_type,
            scheduled_time: job.scheduled_at,
            recurrence: job.recurrence.clone(),
            arguments: job.arguments.clone(),
            metadata,
        }
    }
}

/// Outcome flag of a result message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failure,
}

/// Execution outcome reported by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub job_id: Uuid,
    pub dispatch_id: Uuid,
    /// Execution record the worker wrote, absent when none was opened
    pub execution_id: Option<Uuid>,
    pub status: ResultStatus,
    pub timestamp: DateTime<Utc>,
    /// Failure summary
    pub error: Option<String>,
    /// Combined process output
    pub logs: String,
    /// Duration in milliseconds
    pub execution_time: u64,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureReason>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ResultMessage {
    pub fn from_result(
        dispatch: &DispatchMessage,
        execution_id: Option<Uuid>,
        result: &ExecutionResult,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let status = if result.success {
            ResultStatus::Success
        } else {
            ResultStatus::Failure
        };
        let error = (!result.success).then(|| result.message.clone());

        Self {
            job_id: dispatch.job_id,
            dispatch_id: dispatch.dispatch_id,
            execution_id,
            status,
            timestamp,
            error,
            logs: result.output.clone(),
            execution_time: result.duration_ms,
            exit_code: result.exit_code,
            failure: result.failure.clone(),
            metadata: dispatch.metadata.clone(),
        }
    }

    /// Rebuilds the execution result carried by this message
    pub fn to_execution_result(&self) -> ExecutionResult {
        match self.status {
            ResultStatus::Success => ExecutionResult::completed(self.logs.clone(), self.execution_time),
            ResultStatus::Failure => {
                let mut result = match &self.failure {
                    Some(reason) => {
                        ExecutionResult::failed(reason.clone(), self.logs.clone(), self.execution_time)
                    }
                    None => ExecutionResult {
                        success: false,
                        message: String::new(),
                        output: self.logs.clone(),
                        duration_ms: self.execution_time,
                        exit_code: None,
                        failure: None,
                    },
                };
                if let Some(error) = &self.error {
                    result.message = error.clone();
                }
                result.exit_code = self.exit_code.or(result.exit_code);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch() -> DispatchMessage {
        DispatchMessage {
            job_id: Uuid::new_v4(),
            dispatch_id: Uuid::new_v4(),
            artifact_name: "report.jar".to_string(),
            execution_type: JobType::Scheduled,
            scheduled_time: None,
            recurrence: Recurrence::Hourly,
            arguments: vec!["--fast".to_string()],
            metadata: HashMap::from([(ARTIFACT_METADATA_KEY.to_string(), "report.jar".to_string())]),
        }
    }

    #[test]
    fn test_dispatch_wire_names() {
        let value = serde_json::to_value(dispatch()).unwrap();
        assert!(value.get("jobId").is_some());
        assert!(value.get("artifactName").is_some());
        assert!(value.get("executionType").is_some());
        assert_eq!(value["recurrenceType"], "HOURLY");
        assert_eq!(value["metadata"]["jarName"], "report.jar");
    }

    #[test]
    fn test_result_message_from_failure() {
        let dispatch = dispatch();
        let result = ExecutionResult::failed(
            FailureReason::NonZeroExit { code: 4 },
            "out\n".to_string(),
            250,
        );
        let msg = ResultMessage::from_result(&dispatch, None, &result, Utc::now());

        assert_eq!(msg.status, ResultStatus::Failure);
        assert_eq!(msg.error.as_deref(), Some("Process failed with exit code 4"));
        assert_eq!(msg.execution_time, 250);
        assert_eq!(msg.to_execution_result(), result);
    }

    #[test]
    fn test_result_message_from_success() {
        let dispatch = dispatch();
        let result = ExecutionResult::completed("done\n".to_string(), 10);
        let msg = ResultMessage::from_result(&dispatch, Some(Uuid::new_v4()), &result, Utc::now());

        assert_eq!(msg.status, ResultStatus::Success);
        assert!(msg.error.is_none());
        assert_eq!(msg.to_execution_result(), result);

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["status"], "success");
    }
}
