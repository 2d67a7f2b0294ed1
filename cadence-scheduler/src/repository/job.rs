//! Job Repository
//!
//! Handles all database operations related to jobs. Saves are conditional
//! on the `version` column.

use async_trait::async_trait;
use cadence_core::domain::job::{Job, JobStatus, NotificationDeliveryStatus};
use cadence_core::store::{JobStore, StoreError};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const JOB_COLUMNS: &str = r#"
    id, name, description, artifact, job_type, status, previous_status,
    recurrence, scheduled_at, next_run_at, last_run_at, created_at, updated_at,
    priority, execution_count, max_executions, arguments, output, error,
    notification_delivery_status, last_notification_at, dispatch_id, version
"#;

/// Postgres backed job store
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: Job) -> Result<Job, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, name, description, artifact, job_type, status, previous_status,
                recurrence, scheduled_at, next_run_at, last_run_at, created_at, updated_at,
                priority, execution_count, max_executions, arguments, output, error,
                notification_delivery_status, last_notification_at, dispatch_id, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(&job.artifact)
        .bind(job.job_type.to_string())
        .bind(job.status.as_str())
        .bind(job.previous_status.map(JobStatus::as_str))
        .bind(job.recurrence.to_string())
        .bind(job.scheduled_at)
        .bind(job.next_run_at)
        .bind(job.last_run_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.priority)
        .bind(i64::from(job.execution_count))
        .bind(i64::from(job.max_executions))
        .bind(arguments_to_json(&job.arguments))
        .bind(&job.output)
        .bind(&job.error)
        .bind(job.notification_delivery_status.map(NotificationDeliveryStatus::as_str))
        .bind(job.last_notification_at)
        .bind(job.dispatch_id)
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        row.map(Job::try_from).transpose()
    }

    async fn save(&self, job: Job) -> Result<Job, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET name = $2, description = $3, artifact = $4, job_type = $5, status = $6,
                previous_status = $7, recurrence = $8, scheduled_at = $9, next_run_at = $10,
                last_run_at = $11, updated_at = $12, priority = $13, execution_count = $14,
                max_executions = $15, arguments = $16, output = $17, error = $18,
                notification_delivery_status = $19, last_notification_at = $20,
                dispatch_id = $21, version = version + 1
            WHERE id = $1 AND version = $22
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(&job.artifact)
        .bind(job.job_type.to_string())
        .bind(job.status.as_str())
        .bind(job.previous_status.map(JobStatus::as_str))
        .bind(job.recurrence.to_string())
        .bind(job.scheduled_at)
        .bind(job.next_run_at)
        .bind(job.last_run_at)
        .bind(job.updated_at)
        .bind(job.priority)
        .bind(i64::from(job.execution_count))
        .bind(i64::from(job.max_executions))
        .bind(arguments_to_json(&job.arguments))
        .bind(&job.output)
        .bind(&job.error)
        .bind(job.notification_delivery_status.map(NotificationDeliveryStatus::as_str))
        .bind(job.last_notification_at)
        .bind(job.dispatch_id)
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM jobs WHERE id = $1")
                .bind(job.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::backend)?;

            return Err(match exists {
                Some(_) => StoreError::VersionConflict {
                    job_id: job.id,
                    expected: job.version,
                },
                None => StoreError::NotFound(job.id),
            });
        }

        Ok(Job {
            version: job.version + 1,
            ..job
        })
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        status: JobStatus,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = $1 AND next_run_at <= $2
            ORDER BY priority DESC, seq ASC
            "#
        ))
        .bind(status.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_version(&self, id: Uuid, version: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1 AND version = $2")
            .bind(id)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_created_before(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>, StoreError> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE created_at < $1 AND status = ANY($2)
            ORDER BY created_at ASC
            "#
        ))
        .bind(cutoff)
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY seq DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(count.max(0) as u64)
    }
}

fn arguments_to_json(arguments: &[String]) -> serde_json::Value {
    serde_json::Value::from(arguments.to_vec())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    artifact: String,
    job_type: String,
    status: String,
    previous_status: Option<String>,
    recurrence: String,
    scheduled_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    priority: i32,
    execution_count: i64,
    max_executions: i64,
    arguments: serde_json::Value,
    output: Option<String>,
    error: Option<String>,
    notification_delivery_status: Option<String>,
    last_notification_at: Option<DateTime<Utc>>,
    dispatch_id: Option<Uuid>,
    version: i64,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let previous_status = row
            .previous_status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()
            .map_err(StoreError::Backend)?;

        let notification_delivery_status = row
            .notification_delivery_status
            .as_deref()
            .map(str::parse::<NotificationDeliveryStatus>)
            .transpose()
            .map_err(StoreError::Backend)?;

        let arguments = serde_json::from_value(row.arguments).map_err(StoreError::backend)?;

        Ok(Job {
            id: row.id,
            name: row.name,
            description: row.description,
            artifact: row.artifact,
            job_type: row.job_type.parse().map_err(StoreError::Backend)?,
            status: row.status.parse().map_err(StoreError::Backend)?,
            previous_status,
            recurrence: row.recurrence.parse().map_err(StoreError::Backend)?,
            scheduled_at: row.scheduled_at,
            next_run_at: row.next_run_at,
            last_run_at: row.last_run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            priority: row.priority,
            execution_count: u32::try_from(row.execution_count).map_err(StoreError::backend)?,
            max_executions: u32::try_from(row.max_executions).map_err(StoreError::backend)?,
            arguments,
            output: row.output,
            error: row.error,
            notification_delivery_status,
            last_notification_at: row.last_notification_at,
            dispatch_id: row.dispatch_id,
            version: row.version,
        })
    }
}
