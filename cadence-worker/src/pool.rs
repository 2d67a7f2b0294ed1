//! Worker pool
//!
//! Consumes dispatch messages and executes them with bounded concurrency.
//! A permit is acquired before the next message is taken off the
//! subscription, so a saturated pool leaves pending work queued on the bus.
//!
//! Each dispatch runs in its own task:
//! - re-fetches the job and drops stale deliveries
//! - claims the dispatch by opening its execution record, which fails for a
//!   duplicate delivery
//! - executes and closes the record
//! - publishes the result message with retry, then falls back to the
//!   configured [`ResultSink`]
//!
//! On shutdown the subscription is closed and dispatches still queued on it
//! are reported as failed, so no job is left waiting on a result.

use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use cadence_core::bus::{MessageBus, Subscription, publish_message};
use cadence_core::domain::execution::{ExecutionRecord, ExecutionResult, FailureReason};
use cadence_core::dto::message::{
    DispatchMessage, JOB_EXECUTION_TOPIC, JOB_RESULT_TOPIC, ResultMessage,
};
use cadence_core::store::{ExecutionStore, JobStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::execution::ExecutionService;

/// How long shutdown waits for in-flight executions
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Direct delivery path for results the bus would not take
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn deliver(&self, message: &ResultMessage) -> Result<()>;
}

/// Bounded pool executing dispatched jobs
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    semaphore: Arc<Semaphore>,
}

struct PoolInner {
    config: WorkerConfig,
    jobs: Arc<dyn JobStore>,
    executions: Arc<dyn ExecutionStore>,
    bus: Arc<dyn MessageBus>,
    executor: Arc<dyn ExecutionService>,
    fallback: Option<Arc<dyn ResultSink>>,
}

impl WorkerPool {
    /// Creates a new worker pool
    pub fn new(
        config: WorkerConfig,
        jobs: Arc<dyn JobStore>,
        executions: Arc<dyn ExecutionStore>,
        bus: Arc<dyn MessageBus>,
        executor: Arc<dyn ExecutionService>,
    ) -> Self {
        Self::build(config, jobs, executions, bus, executor, None)
    }

    /// Creates a pool that hands results to `fallback` when publishing fails
    pub fn with_result_fallback(
        config: WorkerConfig,
        jobs: Arc<dyn JobStore>,
        executions: Arc<dyn ExecutionStore>,
        bus: Arc<dyn MessageBus>,
        executor: Arc<dyn ExecutionService>,
        fallback: Arc<dyn ResultSink>,
    ) -> Self {
        Self::build(config, jobs, executions, bus, executor, Some(fallback))
    }

    fn build(
        config: WorkerConfig,
        jobs: Arc<dyn JobStore>,
        executions: Arc<dyn ExecutionStore>,
        bus: Arc<dyn MessageBus>,
        executor: Arc<dyn ExecutionService>,
        fallback: Option<Arc<dyn ResultSink>>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.pool_size));
        Self {
            inner: Arc::new(PoolInner {
                config,
                jobs,
                executions,
                bus,
                executor,
                fallback,
            }),
            semaphore,
        }
    }

    /// Subscribes to the dispatch topic
    ///
    /// Kept separate from [`WorkerPool::run`] so the subscription exists
    /// before the scheduler starts publishing.
    pub async fn subscribe(&self) -> Result<Subscription> {
        self.inner
            .bus
            .subscribe(JOB_EXECUTION_TOPIC)
            .await
            .context("Failed to subscribe to dispatch topic")
    }

    /// Runs the consume loop until shutdown is signalled or the bus closes
    pub async fn run(
        &self,
        mut subscription: Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(
            "Starting worker pool ({} slot(s), timeout {:?})",
            self.inner.config.pool_size, self.inner.config.execution_timeout
        );

        loop {
            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => {
                    permit.context("Worker pool semaphore closed")?
                }
                _ = shutdown.changed() => break,
            };

            let envelope = tokio::select! {
                envelope = subscription.recv() => envelope,
                _ = shutdown.changed() => break,
            };

            let Some(envelope) = envelope else {
                info!("Dispatch subscription closed");
                break;
            };

            let dispatch = match envelope.decode::<DispatchMessage>() {
                Ok(dispatch) => dispatch,
                Err(e) => {
                    warn!("Discarding malformed dispatch message {}: {}", envelope.key, e);
                    continue;
                }
            };

            self.spawn_dispatch(dispatch, permit);
        }

        subscription.close();
        self.abandon_queued(&mut subscription).await;
        self.drain().await;
        Ok(())
    }

    /// Handles one dispatch message to completion
    ///
    /// Returns the id of the execution record written, or `None` when the
    /// dispatch was stale or a duplicate.
    pub async fn handle(&self, dispatch: DispatchMessage) -> Result<Option<Uuid>> {
        Self::process(&self.inner, dispatch).await
    }

    /// Spawns a task for one dispatch, holding `permit` until it finishes
    fn spawn_dispatch(&self, dispatch: DispatchMessage, permit: OwnedSemaphorePermit) {
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let job_id = dispatch.job_id;
            if let Err(e) = Self::process(&inner, dispatch).await {
                error!(job_id = %job_id, "Failed to process dispatch: {:#}", e);
            }
            drop(permit);
        });
    }

    async fn process(inner: &PoolInner, dispatch: DispatchMessage) -> Result<Option<Uuid>> {
        let job_id = dispatch.job_id;

        let job = inner
            .jobs
            .get(job_id)
            .await
            .context("Failed to fetch job")?;

        let Some(job) = job else {
            warn!(job_id = %job_id, "Dispatch for unknown job, skipping");
            return Ok(None);
        };

        if !job.is_dispatched_as(dispatch.dispatch_id) {
            info!(
                job_id = %job_id,
                status = %job.status,
                "Dispatch {} is no longer current, skipping", dispatch.dispatch_id
            );
            return Ok(None);
        }

        let mut record = ExecutionRecord::started(job_id, dispatch.dispatch_id, Utc::now());
        let execution_id = match inner.executions.append(record.clone()).await {
            Ok(()) => Some(record.id),
            Err(e) if e.is_duplicate() => {
                debug!(job_id = %job_id, "Duplicate dispatch {}, skipping", dispatch.dispatch_id);
                return Ok(None);
            }
            Err(e) => {
                warn!(job_id = %job_id, "Failed to open execution record: {}", e);
                None
            }
        };

        let result = inner.executor.execute(&dispatch).await;

        if execution_id.is_some() {
            record.finish(&result, Utc::now());
            if let Err(e) = inner.executions.finish(record).await {
                warn!(job_id = %job_id, "Failed to close execution record: {}", e);
            }
        }

        let message = ResultMessage::from_result(&dispatch, execution_id, &result, Utc::now());
        Self::report(inner, &message).await?;

        Ok(execution_id)
    }

    /// Publishes a result, handing it to the fallback sink if the bus refuses it
    async fn report(inner: &PoolInner, message: &ResultMessage) -> Result<()> {
        let Err(e) = Self::publish_with_retry(inner, message).await else {
            return Ok(());
        };

        let Some(fallback) = &inner.fallback else {
            return Err(e);
        };

        warn!(
            job_id = %message.job_id,
            "Delivering result directly after publish failure: {:#}", e
        );
        fallback
            .deliver(message)
            .await
            .context("Failed to deliver result through fallback")
    }

    /// Reports dispatches left on a closed subscription as failed
    async fn abandon_queued(&self, subscription: &mut Subscription) {
        while let Some(envelope) = subscription.try_recv() {
            let Ok(dispatch) = envelope.decode::<DispatchMessage>() else {
                continue;
            };

            warn!(
                job_id = %dispatch.job_id,
                "Worker pool stopping, dispatch {} was not executed", dispatch.dispatch_id
            );
            let result = ExecutionResult::failed(
                FailureReason::Dispatch {
                    reason: "worker pool shut down before execution".to_string(),
                },
                String::new(),
                0,
            );
            let message = ResultMessage::from_result(&dispatch, None, &result, Utc::now());
            if let Err(e) = Self::report(&self.inner, &message).await {
                error!(job_id = %dispatch.job_id, "Failed to report abandoned dispatch: {:#}", e);
            }
        }
    }

    /// Publishes a result with exponential backoff
    async fn publish_with_retry(inner: &PoolInner, message: &ResultMessage) -> Result<()> {
        const INITIAL_DELAY_MS: u64 = 100;
        const MAX_DELAY_MS: u64 = 5_000;

        let max_attempts = inner.config.result_publish_retries.max(1);
        let key = message.job_id.to_string();
        let mut attempt = 0;
        let mut delay_ms = INITIAL_DELAY_MS;

        loop {
            attempt += 1;

            match publish_message(inner.bus.as_ref(), JOB_RESULT_TOPIC, &key, message).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(
                            job_id = %message.job_id,
                            "Published result after {} attempt(s)", attempt
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        error!(
                            job_id = %message.job_id,
                            "Failed to publish result after {} attempts", max_attempts
                        );
                        return Err(anyhow::anyhow!("Failed to publish result: {}", e));
                    }

                    warn!(
                        job_id = %message.job_id,
                        "Failed to publish result (attempt {}/{}): {}", attempt, max_attempts, e
                    );

                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                    // Exponential backoff with cap
                    delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
                }
            }
        }
    }

    /// Waits for in-flight executions by taking every permit
    async fn drain(&self) {
        let slots = self.inner.config.pool_size as u32;
        info!("Worker pool stopping, waiting for in-flight executions");

        match tokio::time::timeout(DRAIN_TIMEOUT, self.semaphore.acquire_many(slots)).await {
            Ok(Ok(_all)) => info!("Worker pool stopped"),
            Ok(Err(e)) => warn!("Worker pool semaphore closed while draining: {}", e),
            Err(_) => warn!(
                "Worker pool stopped with executions still running after {:?}",
                DRAIN_TIMEOUT
            ),
        }
    }
}
