//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A schedulable job
///
/// Structure shared between scheduler (persists, reconciles) and worker (executes).
/// The job store is the only source of truth for this record; every component
/// re-fetches it before acting on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Name of the artifact in the artifact store
    pub artifact: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    /// Status held before the job was paused; only set while PAUSED
    pub previous_status: Option<JobStatus>,
    pub recurrence: Recurrence,
    /// Phase anchor of the schedule; advanced to each new slot on reschedule
    pub scheduled_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub priority: i32,
    pub execution_count: u32,
    /// Maximum number of executions, 0 means unbounded
    pub max_executions: u32,
    pub arguments: Vec<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub notification_delivery_status: Option<NotificationDeliveryStatus>,
    pub last_notification_at: Option<DateTime<Utc>>,
    /// Claim token of the dispatch currently in flight
    pub dispatch_id: Option<Uuid>,
    /// Write version used for conditional saves
    pub version: i64,
}

impl Job {
    /// Whether the job reschedules itself after each execution
    pub fn is_recurring(&self) -> bool {
        match self.job_type {
            JobType::Recurring => true,
            JobType::Scheduled => self.recurrence != Recurrence::OneTime,
            JobType::Immediate => false,
        }
    }

    /// Whether the execution budget is used up
    pub fn max_executions_reached(&self) -> bool {
        self.max_executions > 0 && self.execution_count >= self.max_executions
    }

    /// Whether the poller should pick this job up at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Scheduled && self.next_run_at.is_some_and(|at| at <= now)
    }

    /// Whether a worker may be executing the job right now
    ///
    /// A job paused while running is still in flight.
    pub fn is_in_flight(&self) -> bool {
        self.status == JobStatus::Running
            || (self.status == JobStatus::Paused
                && self.previous_status == Some(JobStatus::Running))
    }

    /// Whether the job is currently handed to a worker under `dispatch_id`
    pub fn is_dispatched_as(&self, dispatch_id: Uuid) -> bool {
        self.is_in_flight() && self.dispatch_id == Some(dispatch_id)
    }
}

/// How a job was requested to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Immediate,
    Scheduled,
    Recurring,
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl JobStatus {
    /// Statuses a retention sweep may delete
    pub const TERMINAL: [JobStatus; 3] =
        [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "SCHEDULED" => Ok(JobStatus::Scheduled),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            "PAUSED" => Ok(JobStatus::Paused),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobType::Immediate => "IMMEDIATE",
            JobType::Scheduled => "SCHEDULED",
            JobType::Recurring => "RECURRING",
        };
        f.write_str(s)
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMMEDIATE" => Ok(JobType::Immediate),
            "SCHEDULED" => Ok(JobType::Scheduled),
            "RECURRING" => Ok(JobType::Recurring),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// Recurrence cadence of a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recurrence {
    OneTime,
    Hourly,
    Daily,
    Weekly,
    /// Cron expression, evaluated by a pluggable [`crate::recurrence::CronSchedule`]
    Cron(String),
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::OneTime => f.write_str("ONE_TIME"),
            Recurrence::Hourly => f.write_str("HOURLY"),
            Recurrence::Daily => f.write_str("DAILY"),
            Recurrence::Weekly => f.write_str("WEEKLY"),
            Recurrence::Cron(expr) => write!(f, "CRON:{expr}"),
        }
    }
}

impl FromStr for Recurrence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(expr) = s.strip_prefix("CRON:") {
            return Ok(Recurrence::Cron(expr.to_string()));
        }
        match s {
            "ONE_TIME" => Ok(Recurrence::OneTime),
            "HOURLY" => Ok(Recurrence::Hourly),
            "DAILY" => Ok(Recurrence::Daily),
            "WEEKLY" => Ok(Recurrence::Weekly),
            other => Err(format!("unknown recurrence: {other}")),
        }
    }
}

/// Outcome of the last notification attempt for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationDeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl NotificationDeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationDeliveryStatus::Pending => "PENDING",
            NotificationDeliveryStatus::Success => "SUCCESS",
            NotificationDeliveryStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for NotificationDeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(NotificationDeliveryStatus::Pending),
            "SUCCESS" => Ok(NotificationDeliveryStatus::Success),
            "FAILED" => Ok(NotificationDeliveryStatus::Failed),
            other => Err(format!("unknown notification delivery status: {other}")),
        }
    }
}
