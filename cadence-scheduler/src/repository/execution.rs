//! Execution Repository
//!
//! Append-only history of execution attempts.

use async_trait::async_trait;
use cadence_core::domain::execution::ExecutionRecord;
use cadence_core::store::{ExecutionStore, StoreError};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Postgres backed execution store
#[derive(Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn append(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_executions (
                id, job_id, dispatch_id, start_time, end_time, status, logs,
                error_message, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (dispatch_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.job_id)
        .bind(record.dispatch_id)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.status.as_str())
        .bind(&record.logs)
        .bind(&record.error_message)
        .bind(record.duration_ms.map(duration_to_db))
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateExecution {
                dispatch_id: record.dispatch_id,
            });
        }

        Ok(())
    }

    async fn finish(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET end_time = $2, status = $3, logs = $4, error_message = $5, duration_ms = $6
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.end_time)
        .bind(record.status.as_str())
        .bind(&record.logs)
        .bind(&record.error_message)
        .bind(record.duration_ms.map(duration_to_db))
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id));
        }

        Ok(())
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, job_id, dispatch_id, start_time, end_time, status, logs,
                   error_message, duration_ms
            FROM job_executions
            WHERE job_id = $1
            ORDER BY seq DESC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.into_iter().map(ExecutionRecord::try_from).collect()
    }

    async fn latest_for_job(&self, job_id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, job_id, dispatch_id, start_time, end_time, status, logs,
                   error_message, duration_ms
            FROM job_executions
            WHERE job_id = $1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        row.map(ExecutionRecord::try_from).transpose()
    }

    async fn delete_for_job(&self, job_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM job_executions WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(result.rows_affected())
    }
}

fn duration_to_db(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    job_id: Uuid,
    dispatch_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: String,
    logs: String,
    error_message: Option<String>,
    duration_ms: Option<i64>,
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(ExecutionRecord {
            id: row.id,
            job_id: row.job_id,
            dispatch_id: row.dispatch_id,
            start_time: row.start_time,
            end_time: row.end_time,
            status: row.status.parse().map_err(StoreError::Backend)?,
            logs: row.logs,
            error_message: row.error_message,
            duration_ms: row.duration_ms.map(|ms| ms.max(0) as u64),
        })
    }
}
