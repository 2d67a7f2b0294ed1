use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            seq BIGSERIAL,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            artifact VARCHAR(255) NOT NULL,
            job_type VARCHAR(20) NOT NULL,
            status VARCHAR(20) NOT NULL,
            previous_status VARCHAR(20),
            recurrence TEXT NOT NULL,
            scheduled_at TIMESTAMPTZ,
            next_run_at TIMESTAMPTZ,
            last_run_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            execution_count BIGINT NOT NULL DEFAULT 0,
            max_executions BIGINT NOT NULL DEFAULT 0,
            arguments JSONB NOT NULL DEFAULT '[]',
            output TEXT,
            error TEXT,
            notification_delivery_status VARCHAR(20),
            last_notification_at TIMESTAMPTZ,
            dispatch_id UUID,
            version BIGINT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create execution history table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_executions (
            id UUID PRIMARY KEY,
            seq BIGSERIAL,
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            dispatch_id UUID NOT NULL,
            start_time TIMESTAMPTZ NOT NULL,
            end_time TIMESTAMPTZ,
            status VARCHAR(20) NOT NULL,
            logs TEXT NOT NULL DEFAULT '',
            error_message TEXT,
            duration_ms BIGINT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Due-job polling and retention lookups
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status_next_run ON jobs(status, next_run_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)")
        .execute(pool)
        .await?;

    // One execution record per dispatch
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_job_executions_dispatch_id ON job_executions(dispatch_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_executions_job_id ON job_executions(job_id, seq DESC)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
