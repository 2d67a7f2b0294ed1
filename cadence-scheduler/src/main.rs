//! Cadence Scheduler
//!
//! Runs the scheduler and a local worker pool in one process.
//!
//! Architecture:
//! - Configuration: scheduler and worker settings from the environment
//! - Stores: Postgres when DATABASE_URL is set, in-memory otherwise
//! - Bus: in-process topics connecting scheduler and worker pool
//! - Loops: poller, result consumer, retention sweep, worker pool and
//!   notification forwarder, all stopped by Ctrl-C
//! - Shutdown: dispatching stops first, then the worker pool drains, then
//!   the result consumer stops, so in-flight results still land

use anyhow::{Context, Result};
use cadence_core::artifact::{ArtifactStore, LocalArtifactStore};
use cadence_core::bus::{InProcessBus, MessageBus};
use cadence_core::dto::message::JOB_NOTIFICATIONS_TOPIC;
use cadence_core::recurrence::RecurrenceCalculator;
use cadence_core::store::{ExecutionStore, InMemoryExecutionStore, InMemoryJobStore, JobStore};
use cadence_scheduler::repository::{PgExecutionStore, PgJobStore};
use cadence_scheduler::service::{LogNotificationSink, forward_notifications};
use cadence_scheduler::{Collaborators, Config, Scheduler, db};
use cadence_worker::{ExecutionService, ProcessExecutionService, WorkerConfig, WorkerPool};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_scheduler=info,cadence_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cadence Scheduler");

    // Load configuration
    let config = Config::from_env();
    config.validate()?;
    let worker_config = WorkerConfig::from_env();
    worker_config.validate()?;
    info!(
        "Loaded configuration: poll_interval={:?}, artifact_dir={}, workers={}",
        config.poll_interval,
        config.artifact_dir.display(),
        worker_config.pool_size
    );

    // Stores
    let (jobs, executions): (Arc<dyn JobStore>, Arc<dyn ExecutionStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = connect_with_retry(url, config.database_max_connections).await?;
                db::run_migrations(&pool)
                    .await
                    .context("Failed to run database migrations")?;
                info!("Using Postgres job store");
                (
                    Arc::new(PgJobStore::new(pool.clone())),
                    Arc::new(PgExecutionStore::new(pool)),
                )
            }
            None => {
                warn!("DATABASE_URL not set, jobs are kept in memory only");
                (
                    Arc::new(InMemoryJobStore::new()),
                    Arc::new(InMemoryExecutionStore::new()),
                )
            }
        };

    let artifacts: Arc<dyn ArtifactStore> = Arc::new(
        LocalArtifactStore::new(&config.artifact_dir)
            .with_extension(config.artifact_extension.clone()),
    );
    let bus = Arc::new(InProcessBus::new());

    // Scheduler loops, worker pool and result consumer stop in that order
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (workers_tx, workers_rx) = watch::channel(false);
    let (results_tx, results_rx) = watch::channel(false);

    let executor: Arc<dyn ExecutionService> = Arc::new(ProcessExecutionService::new(
        artifacts.clone(),
        worker_config.clone(),
    ));

    let scheduler = Scheduler::new(
        Collaborators {
            jobs: jobs.clone(),
            executions: executions.clone(),
            artifacts,
            bus: bus.clone(),
            fallback_sink: Arc::new(LogNotificationSink),
            recurrence: RecurrenceCalculator::new(),
        },
        &config,
    );

    // Worker pool subscribes before the scheduler can dispatch
    let pool = WorkerPool::with_result_fallback(
        worker_config,
        jobs,
        executions,
        bus.clone(),
        executor,
        scheduler.reconciler().clone(),
    );
    let dispatches = pool.subscribe().await?;
    let workers = tokio::spawn(async move {
        if let Err(e) = pool.run(dispatches, workers_rx).await {
            error!("Worker pool error: {:#}", e);
        }
    });

    let notifications = bus
        .subscribe(JOB_NOTIFICATIONS_TOPIC)
        .await
        .context("Failed to subscribe to notifications")?;
    let forwarder = tokio::spawn(forward_notifications(
        notifications,
        Arc::new(LogNotificationSink),
        results_rx.clone(),
    ));

    let tasks = scheduler
        .start(shutdown_rx, results_rx)
        .await
        .context("Failed to start scheduler")?;

    info!("Scheduler initialized successfully");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    shutdown_tx.send(true).ok();
    await_all(tasks.loops).await;

    workers_tx.send(true).ok();
    await_all(vec![workers]).await;

    results_tx.send(true).ok();
    await_all(vec![tasks.consumer, forwarder]).await;
    bus.close().await;

    info!("Scheduler stopped");
    Ok(())
}

/// Connects to Postgres with exponential backoff
///
/// The database may still be starting when the scheduler comes up.
async fn connect_with_retry(url: &str, max_connections: u32) -> Result<PgPool> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match db::create_pool(url, max_connections).await {
            Ok(pool) => {
                if attempt > 1 {
                    info!("Connected to database after {} attempt(s)", attempt);
                }
                return Ok(pool);
            }
            Err(e) if attempt >= MAX_RETRIES => {
                return Err(e).context(format!(
                    "Failed to connect to database after {} attempts",
                    MAX_RETRIES
                ));
            }
            Err(e) => {
                warn!(
                    "Failed to connect to database (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

async fn await_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Task failed during shutdown: {}", e);
        }
    }
}
