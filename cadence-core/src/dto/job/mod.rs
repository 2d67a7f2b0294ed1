//! Job request DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::{JobType, Recurrence};

/// Request to create a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub artifact: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default = "default_recurrence")]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: i32,
    /// 0 means unbounded; negative values are rejected
    #[serde(default)]
    pub max_executions: i64,
    #[serde(default)]
    pub arguments: Vec<String>,
}

fn default_recurrence() -> Recurrence {
    Recurrence::OneTime
}

impl CreateJob {
    pub fn new(name: impl Into<String>, artifact: impl Into<String>, job_type: JobType) -> Self {
        Self {
            name: name.into(),
            description: None,
            artifact: artifact.into(),
            job_type,
            recurrence: Recurrence::OneTime,
            scheduled_at: None,
            priority: 0,
            max_executions: 0,
            arguments: Vec::new(),
        }
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_executions(mut self, max: i64) -> Self {
        self.max_executions = max;
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_request_defaults() {
        let req: CreateJob = serde_json::from_str(
            r#"{"name": "nightly", "artifact": "report.jar", "type": "SCHEDULED"}"#,
        )
        .unwrap();

        assert_eq!(req.job_type, JobType::Scheduled);
        assert_eq!(req.recurrence, Recurrence::OneTime);
        assert_eq!(req.max_executions, 0);
        assert!(req.scheduled_at.is_none());
        assert!(req.arguments.is_empty());
    }
}
