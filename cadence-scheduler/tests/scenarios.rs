//! End-to-end scheduling scenarios
//!
//! Drives the scheduler and the real worker pool over the in-memory stores
//! and in-process bus. Artifacts are shell scripts run with `sh`.

#![cfg(unix)]

use cadence_core::artifact::LocalArtifactStore;
use cadence_core::bus::{InProcessBus, MessageBus, Subscription};
use cadence_core::domain::execution::ExecutionStatus;
use cadence_core::domain::job::{Job, JobStatus, JobType, NotificationDeliveryStatus, Recurrence};
use cadence_core::dto::job::CreateJob;
use cadence_core::dto::message::{
    DispatchMessage, JOB_EXECUTION_TOPIC, JOB_NOTIFICATIONS_TOPIC, JOB_RESULT_TOPIC,
    ResultMessage,
};
use cadence_core::recurrence::RecurrenceCalculator;
use cadence_core::store::{ExecutionStore, InMemoryExecutionStore, InMemoryJobStore, JobStore};
use cadence_scheduler::service::{BufferedNotificationSink, ReconcileOutcome};
use cadence_scheduler::{Collaborators, Config, Scheduler, SchedulerError};
use cadence_worker::{ProcessExecutionService, WorkerConfig, WorkerPool};
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;
use uuid::Uuid;

const RECV_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

struct Harness {
    artifacts: TempDir,
    staging: TempDir,
    jobs: Arc<InMemoryJobStore>,
    executions: Arc<InMemoryExecutionStore>,
    bus: Arc<InProcessBus>,
    fallback: Arc<BufferedNotificationSink>,
    dispatches: Subscription,
    results: Subscription,
    pool: WorkerPool,
    scheduler: Scheduler,
}

impl Harness {
    async fn new() -> Self {
        Self::with_timeout(std::time::Duration::from_secs(10)).await
    }

    async fn with_timeout(timeout: std::time::Duration) -> Self {
        Self::build(timeout, Config::default()).await
    }

    async fn build(timeout: std::time::Duration, config: Config) -> Self {
        let artifacts = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();

        let jobs = Arc::new(InMemoryJobStore::new());
        let executions = Arc::new(InMemoryExecutionStore::new());
        let bus = Arc::new(InProcessBus::new());
        let fallback = Arc::new(BufferedNotificationSink::default());
        let store = Arc::new(
            LocalArtifactStore::new(artifacts.path()).with_extension(Some("sh".to_string())),
        );

        let worker_config = WorkerConfig {
            pool_size: 2,
            execution_timeout: timeout,
            runtime_program: "sh".to_string(),
            runtime_args: Vec::new(),
            staging_dir: staging.path().to_path_buf(),
            result_publish_retries: 1,
        };
        let executor = Arc::new(ProcessExecutionService::new(
            store.clone(),
            worker_config.clone(),
        ));

        let dispatches = bus.subscribe(JOB_EXECUTION_TOPIC).await.unwrap();
        let results = bus.subscribe(JOB_RESULT_TOPIC).await.unwrap();

        let scheduler = Scheduler::new(
            Collaborators {
                jobs: jobs.clone(),
                executions: executions.clone(),
                artifacts: store,
                bus: bus.clone(),
                fallback_sink: fallback.clone(),
                recurrence: RecurrenceCalculator::new(),
            },
            &config,
        );
        let pool = WorkerPool::with_result_fallback(
            worker_config,
            jobs.clone(),
            executions.clone(),
            bus.clone(),
            executor,
            scheduler.reconciler().clone(),
        );

        Self {
            artifacts,
            staging,
            jobs,
            executions,
            bus,
            fallback,
            dispatches,
            results,
            pool,
            scheduler,
        }
    }

    fn script(&self, name: &str, body: &str) {
        std::fs::write(self.artifacts.path().join(name), body).unwrap();
    }

    async fn job(&self, id: Uuid) -> Job {
        self.jobs.get(id).await.unwrap().unwrap()
    }

    async fn next_dispatch(&mut self) -> DispatchMessage {
        let envelope = tokio::time::timeout(RECV_TIMEOUT, self.dispatches.recv())
            .await
            .expect("no dispatch message")
            .unwrap();
        envelope.decode().unwrap()
    }

    async fn next_result(&mut self) -> ResultMessage {
        let envelope = tokio::time::timeout(RECV_TIMEOUT, self.results.recv())
            .await
            .expect("no result message")
            .unwrap();
        envelope.decode().unwrap()
    }

    /// Runs the next dispatched job on the worker pool and reconciles its
    /// result at `now`
    async fn run_next(&mut self, now: DateTime<Utc>) -> ReconcileOutcome {
        let dispatch = self.next_dispatch().await;
        self.pool.handle(dispatch).await.unwrap();
        let result = self.next_result().await;
        self.scheduler
            .reconciler()
            .apply_message(&result, now)
            .await
            .unwrap()
    }
}

fn staging_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

fn t() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 20, 0).unwrap()
}

fn hourly(at: DateTime<Utc>) -> CreateJob {
    CreateJob::new("hourly", "hello.sh", JobType::Scheduled)
        .with_recurrence(Recurrence::Hourly)
        .with_scheduled_at(at)
}

#[tokio::test]
async fn test_hourly_job_reschedules_after_success() {
    let mut h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    let job = h
        .scheduler
        .create_job(hourly(t()), t() - Duration::minutes(1))
        .await
        .unwrap();

    let report = h.scheduler.tick(t()).await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(h.job(job.id).await.status, JobStatus::Running);

    let outcome = h.run_next(t() + Duration::seconds(2)).await;
    assert_eq!(outcome, ReconcileOutcome::Applied(JobStatus::Scheduled));

    let job = h.job(job.id).await;
    assert_eq!(job.next_run_at, Some(t() + Duration::hours(1)));
    assert_eq!(job.execution_count, 1);
    assert_eq!(job.output.as_deref(), Some("hello\n"));
    assert!(job.error.is_none());
    assert!(job.dispatch_id.is_none());

    let history = h.scheduler.service().job_executions(job.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Completed);
    assert_eq!(history[0].logs, "hello\n");
    assert!(staging_is_empty(h.staging.path()));

    // nothing subscribed to notifications: fallback took it
    assert_eq!(
        job.notification_delivery_status,
        Some(NotificationDeliveryStatus::Failed)
    );
    assert_eq!(h.fallback.len(), 1);

    // not due again before the next hour
    assert_eq!(h.scheduler.tick(t() + Duration::minutes(30)).await.unwrap().due, 0);
}

#[tokio::test]
async fn test_late_tick_preserves_minute_offset() {
    let mut h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    let job = h.scheduler.create_job(hourly(t()), t()).await.unwrap();

    h.scheduler.tick(t()).await.unwrap();
    h.run_next(t()).await;

    let late = t() + Duration::hours(1) + Duration::minutes(5);
    assert_eq!(h.scheduler.tick(late).await.unwrap().dispatched, 1);
    h.run_next(late + Duration::seconds(1)).await;

    let next = h.job(job.id).await.next_run_at.unwrap();
    assert!(next > late);
    assert_eq!(next, t() + Duration::hours(2));

    // several missed hours
    let very_late = t() + Duration::hours(4) + Duration::minutes(45);
    h.scheduler.tick(very_late).await.unwrap();
    h.run_next(very_late).await;

    let next = h.job(job.id).await.next_run_at.unwrap();
    assert!(next > very_late);
    assert_eq!((next.minute(), next.second()), (20, 0));
    assert_eq!(next, t() + Duration::hours(5));
}

#[tokio::test]
async fn test_artifact_fetch_failure_fails_job_and_polling_continues() {
    let mut h = Harness::new().await;
    h.script("gone.sh", "echo never\n");
    h.script("hello.sh", "echo hello\n");
    let broken = h
        .scheduler
        .create_job(
            CreateJob::new("broken", "gone.sh", JobType::Scheduled).with_scheduled_at(t()),
            t(),
        )
        .await
        .unwrap();
    std::fs::remove_file(h.artifacts.path().join("gone.sh")).unwrap();

    h.scheduler.tick(t()).await.unwrap();
    let outcome = h.run_next(t()).await;
    assert_eq!(outcome, ReconcileOutcome::Applied(JobStatus::Failed));

    let broken = h.job(broken.id).await;
    assert!(broken.error.as_deref().unwrap().starts_with("Error: "));
    assert!(staging_is_empty(h.staging.path()));

    let healthy = h
        .scheduler
        .create_job(
            CreateJob::new("healthy", "hello.sh", JobType::Scheduled)
                .with_scheduled_at(t() + Duration::minutes(1)),
            t(),
        )
        .await
        .unwrap();
    let report = h.scheduler.tick(t() + Duration::minutes(1)).await.unwrap();
    assert_eq!(report.dispatched, 1);
    h.run_next(t() + Duration::minutes(1)).await;
    assert_eq!(h.job(healthy.id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_max_executions_stops_rescheduling() {
    let mut h = Harness::new().await;
    h.script("flaky.sh", "echo boom\nexit 2\n");
    let job = h
        .scheduler
        .create_job(
            CreateJob::new("flaky", "flaky.sh", JobType::Recurring)
                .with_recurrence(Recurrence::Hourly)
                .with_scheduled_at(t())
                .with_max_executions(2),
            t(),
        )
        .await
        .unwrap();

    h.scheduler.tick(t()).await.unwrap();
    let first = h.run_next(t()).await;
    assert_eq!(first, ReconcileOutcome::Applied(JobStatus::Scheduled));
    assert_eq!(
        h.job(job.id).await.error.as_deref(),
        Some("Process failed with exit code 2")
    );

    let second_run = t() + Duration::hours(1);
    h.scheduler.tick(second_run).await.unwrap();
    let second = h.run_next(second_run).await;
    assert_eq!(second, ReconcileOutcome::Applied(JobStatus::Failed));

    let job = h.job(job.id).await;
    assert_eq!(job.execution_count, 2);
    assert!(job.next_run_at.is_none());
    assert_eq!(h.scheduler.tick(t() + Duration::days(1)).await.unwrap().due, 0);
}

#[tokio::test]
async fn test_execute_running_job_is_rejected() {
    let mut h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    let job = h
        .scheduler
        .create_job(CreateJob::new("now", "hello.sh", JobType::Immediate), t())
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Running);

    let err = h.scheduler.execute_job(job.id, t()).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidTransition {
            status: JobStatus::Running,
            ..
        }
    ));
    assert_eq!(h.job(job.id).await, job);

    h.run_next(t()).await;
    assert_eq!(h.job(job.id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_pause_while_running_resumes_into_outcome() {
    let mut h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    let job = h
        .scheduler
        .create_job(CreateJob::new("now", "hello.sh", JobType::Immediate), t())
        .await
        .unwrap();

    let paused = h.scheduler.pause_job(job.id, t()).await.unwrap();
    assert_eq!(paused.previous_status, Some(JobStatus::Running));

    // the execution still runs; its outcome lands in previous_status
    let outcome = h.run_next(t()).await;
    assert_eq!(outcome, ReconcileOutcome::Applied(JobStatus::Paused));
    let paused = h.job(job.id).await;
    assert_eq!(paused.previous_status, Some(JobStatus::Completed));
    assert_eq!(paused.execution_count, 1);

    let resumed = h.scheduler.resume_job(job.id, t()).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);
    assert!(resumed.previous_status.is_none());
}

#[tokio::test]
async fn test_schedule_while_paused_mid_run_keeps_single_dispatch() {
    let mut h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    let job = h
        .scheduler
        .create_job(CreateJob::new("now", "hello.sh", JobType::Immediate), t())
        .await
        .unwrap();
    h.scheduler.pause_job(job.id, t()).await.unwrap();

    let err = h.scheduler.schedule_job(job.id, None, t()).await.unwrap_err();
    assert!(err.is_invalid_transition());
    let err = h.scheduler.execute_job(job.id, t()).await.unwrap_err();
    assert!(err.is_invalid_transition());
    assert_eq!(h.job(job.id).await.dispatch_id, job.dispatch_id);

    let outcome = h.run_next(t()).await;
    assert_eq!(outcome, ReconcileOutcome::Applied(JobStatus::Paused));
    assert!(h.dispatches.try_recv().is_none());
    assert_eq!(h.executions.list_for_job(job.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pause_resume_scheduled_job() {
    let h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    let job = h.scheduler.create_job(hourly(t()), t()).await.unwrap();

    h.scheduler.pause_job(job.id, t()).await.unwrap();
    assert_eq!(h.scheduler.tick(t()).await.unwrap().due, 0);

    let resumed = h.scheduler.resume_job(job.id, t()).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Scheduled);
    assert_eq!(resumed.next_run_at, Some(t()));
    assert_eq!(h.scheduler.tick(t()).await.unwrap().dispatched, 1);
}

#[tokio::test]
async fn test_timeout_kills_process_and_fails_job() {
    let mut h = Harness::with_timeout(std::time::Duration::from_secs(1)).await;
    h.script("slow.sh", "echo starting\nexec sleep 30\n");
    let job = h
        .scheduler
        .create_job(CreateJob::new("slow", "slow.sh", JobType::Immediate), t())
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let outcome = h.run_next(t()).await;
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(outcome, ReconcileOutcome::Applied(JobStatus::Failed));

    let job = h.job(job.id).await;
    assert_eq!(job.error.as_deref(), Some("Process timed out after 1 seconds"));
    assert!(staging_is_empty(h.staging.path()));
}

#[tokio::test]
async fn test_cancel_before_pickup_skips_execution() {
    let mut h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    let job = h.scheduler.create_job(hourly(t()), t()).await.unwrap();
    h.scheduler.tick(t()).await.unwrap();

    let cancelled = h.scheduler.cancel_job(job.id, t()).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let dispatch = h.next_dispatch().await;
    assert!(h.pool.handle(dispatch).await.unwrap().is_none());
    assert!(h.executions.list_for_job(job.id).await.unwrap().is_empty());

    let restarted = h.scheduler.restart_job(job.id, t()).await.unwrap();
    assert_eq!(restarted.status, JobStatus::Scheduled);
    assert_eq!(restarted.next_run_at, Some(t()));
    assert!(restarted.dispatch_id.is_none());

    assert_eq!(h.scheduler.tick(t()).await.unwrap().dispatched, 1);
    h.run_next(t()).await;
    assert_eq!(h.job(job.id).await.execution_count, 1);
}

#[tokio::test]
async fn test_duplicate_dispatch_and_stale_result_are_ignored() {
    let mut h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    let job = h
        .scheduler
        .create_job(CreateJob::new("now", "hello.sh", JobType::Immediate), t())
        .await
        .unwrap();

    let dispatch = h.next_dispatch().await;
    assert!(h.pool.handle(dispatch.clone()).await.unwrap().is_some());
    assert!(h.pool.handle(dispatch).await.unwrap().is_none());
    assert_eq!(h.executions.list_for_job(job.id).await.unwrap().len(), 1);

    let result = h.next_result().await;
    let reconciler = h.scheduler.reconciler();
    assert_eq!(
        reconciler.apply_message(&result, t()).await.unwrap(),
        ReconcileOutcome::Applied(JobStatus::Completed)
    );
    assert_eq!(
        reconciler.apply_message(&result, t()).await.unwrap(),
        ReconcileOutcome::Ignored
    );
    assert_eq!(h.job(job.id).await.execution_count, 1);
}

#[tokio::test]
async fn test_result_without_consumer_still_reaches_job() {
    let mut h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    h.script("broken.sh", "exit 4\n");
    let done = h
        .scheduler
        .create_job(CreateJob::new("done", "hello.sh", JobType::Immediate), t())
        .await
        .unwrap();
    let broken = h
        .scheduler
        .create_job(CreateJob::new("broken", "broken.sh", JobType::Immediate), t())
        .await
        .unwrap();

    // nobody listens on the result topic any more
    h.results.close();
    assert_eq!(h.bus.subscriber_count(JOB_RESULT_TOPIC).await, 0);

    for _ in 0..2 {
        let dispatch = h.next_dispatch().await;
        assert!(h.pool.handle(dispatch).await.unwrap().is_some());
    }

    let done = h.job(done.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.output.as_deref(), Some("hello\n"));
    assert!(done.dispatch_id.is_none());

    let broken = h.job(broken.id).await;
    assert_eq!(broken.status, JobStatus::Failed);
    assert!(broken.error.is_some());
    assert!(broken.dispatch_id.is_none());
}

#[tokio::test]
async fn test_dispatch_publish_failure_fails_job() {
    let h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    let job = h.scheduler.create_job(hourly(t()), t()).await.unwrap();

    h.bus.close().await;
    let report = h.scheduler.tick(t()).await.unwrap();
    assert_eq!(report.failed, 1);

    let job = h.job(job.id).await;
    // recurring: the failed attempt is rescheduled rather than left running
    assert_eq!(job.status, JobStatus::Scheduled);
    assert_eq!(job.next_run_at, Some(t() + Duration::hours(1)));
    assert_eq!(job.error.as_deref(), Some("Error: message bus is closed"));
    assert_eq!(h.fallback.len(), 1);
}

#[tokio::test]
async fn test_notifications_published_when_channel_available() {
    let mut h = Harness::new().await;
    let mut notifications = h.bus.subscribe(JOB_NOTIFICATIONS_TOPIC).await.unwrap();
    h.script("hello.sh", "echo hello\n");
    let job = h
        .scheduler
        .create_job(CreateJob::new("now", "hello.sh", JobType::Immediate), t())
        .await
        .unwrap();

    h.run_next(t()).await;

    let job = h.job(job.id).await;
    assert_eq!(
        job.notification_delivery_status,
        Some(NotificationDeliveryStatus::Success)
    );
    assert!(h.fallback.is_empty());
    let envelope = notifications.recv().await.unwrap();
    assert_eq!(envelope.key, job.id.to_string());
}

#[tokio::test]
async fn test_retention_deletes_old_terminal_jobs() {
    let mut h = Harness::new().await;
    h.script("hello.sh", "echo hello\n");
    let done = h
        .scheduler
        .create_job(CreateJob::new("done", "hello.sh", JobType::Immediate), t())
        .await
        .unwrap();
    h.run_next(t()).await;
    let waiting = h.scheduler.create_job(hourly(t() + Duration::days(60)), t()).await.unwrap();

    let swept = h
        .scheduler
        .retention()
        .sweep(t() + Duration::days(31))
        .await
        .unwrap();

    assert_eq!(swept, 1);
    assert!(h.jobs.get(done.id).await.unwrap().is_none());
    assert!(h.executions.list_for_job(done.id).await.unwrap().is_empty());
    assert!(h.jobs.get(waiting.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_background_loops_complete_immediate_job() {
    let config = Config {
        poll_interval: std::time::Duration::from_millis(50),
        ..Config::default()
    };
    let h = Harness::build(std::time::Duration::from_secs(10), config).await;
    h.script("hello.sh", "echo hello\n");

    let Harness {
        jobs,
        dispatches,
        results,
        pool,
        scheduler,
        artifacts: _artifacts,
        staging: _staging,
        ..
    } = h;
    // the scheduler opens its own result subscription
    drop(results);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (workers_tx, workers_rx) = watch::channel(false);
    let (results_tx, results_rx) = watch::channel(false);
    let workers = tokio::spawn(async move { pool.run(dispatches, workers_rx).await });
    let tasks = scheduler.start(shutdown_rx, results_rx).await.unwrap();

    let job = scheduler
        .create_job(
            CreateJob::new("background", "hello.sh", JobType::Scheduled)
                .with_scheduled_at(Utc::now()),
            Utc::now(),
        )
        .await
        .unwrap();

    let mut status = JobStatus::Scheduled;
    for _ in 0..200 {
        status = jobs.get(job.id).await.unwrap().unwrap().status;
        if status == JobStatus::Completed {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    assert_eq!(status, JobStatus::Completed);

    shutdown_tx.send(true).unwrap();
    for handle in tasks.loops {
        handle.await.unwrap();
    }
    workers_tx.send(true).unwrap();
    workers.await.unwrap().unwrap();
    results_tx.send(true).unwrap();
    tasks.consumer.await.unwrap();
}
