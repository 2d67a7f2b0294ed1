//! Scheduler assembly
//!
//! [`Scheduler`] wires the collaborators into the job service, dispatcher,
//! poller, reconciler and retention sweep, and exposes the core operations.
//! It is driven either by [`Scheduler::start`] or by calling
//! [`Scheduler::tick`] directly.

use cadence_core::artifact::ArtifactStore;
use cadence_core::bus::MessageBus;
use cadence_core::domain::job::Job;
use cadence_core::dto::job::CreateJob;
use cadence_core::dto::message::JOB_RESULT_TOPIC;
use cadence_core::recurrence::RecurrenceCalculator;
use cadence_core::store::{ExecutionStore, JobStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::scheduler::{Dispatcher, Poller, TickReport};
use crate::service::{JobService, NotificationSink, Notifier, Reconciler, RetentionSweep};

/// External collaborators of the scheduler
pub struct Collaborators {
    pub jobs: Arc<dyn JobStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub bus: Arc<dyn MessageBus>,
    /// Receives notifications when the bus topic is unavailable
    pub fallback_sink: Arc<dyn NotificationSink>,
    pub recurrence: RecurrenceCalculator,
}

/// Background tasks spawned by [`Scheduler::start`]
pub struct SchedulerTasks {
    /// Result consumer, stopped by its own signal
    pub consumer: JoinHandle<()>,
    /// Poller and retention sweep
    pub loops: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    bus: Arc<dyn MessageBus>,
    service: JobService,
    reconciler: Arc<Reconciler>,
    poller: Arc<Poller>,
    retention: Arc<RetentionSweep>,
    retention_interval: Duration,
}

impl Scheduler {
    pub fn new(collaborators: Collaborators, config: &Config) -> Self {
        let Collaborators {
            jobs,
            executions,
            artifacts,
            bus,
            fallback_sink,
            recurrence,
        } = collaborators;

        let notifier = Arc::new(Notifier::new(bus.clone(), fallback_sink));
        let reconciler = Arc::new(Reconciler::new(jobs.clone(), notifier, recurrence));
        let dispatcher = Arc::new(Dispatcher::new(
            jobs.clone(),
            bus.clone(),
            reconciler.clone(),
        ));
        let poller = Arc::new(Poller::new(
            jobs.clone(),
            dispatcher.clone(),
            config.poll_interval,
        ));
        let retention = Arc::new(RetentionSweep::new(
            jobs.clone(),
            executions.clone(),
            config.retention(),
        ));
        let service = JobService::new(jobs, executions, artifacts, dispatcher);

        Self {
            bus,
            service,
            reconciler,
            poller,
            retention,
            retention_interval: config.retention_interval,
        }
    }

    /// Spawns the poller, result consumer and retention loops
    ///
    /// The result subscription is opened before anything is dispatched.
    /// The consumer stops on `results_shutdown` so it can keep taking results
    /// while workers drain after `shutdown`.
    pub async fn start(
        &self,
        shutdown: watch::Receiver<bool>,
        results_shutdown: watch::Receiver<bool>,
    ) -> Result<SchedulerTasks> {
        let results = self.bus.subscribe(JOB_RESULT_TOPIC).await?;

        let reconciler = self.reconciler.clone();
        let consumer =
            tokio::spawn(async move { reconciler.run(results, results_shutdown).await });

        let poller = self.poller.clone();
        let polling = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { poller.run(shutdown).await }
        });

        let retention = self.retention.clone();
        let every = self.retention_interval;
        let sweeping = tokio::spawn(async move { retention.run(every, shutdown).await });

        info!("Scheduler started");
        Ok(SchedulerTasks {
            consumer,
            loops: vec![polling, sweeping],
        })
    }

    pub async fn create_job(&self, req: CreateJob, now: DateTime<Utc>) -> Result<Job> {
        self.service.create_job(req, now).await
    }

    pub async fn schedule_job(
        &self,
        id: Uuid,
        at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        self.service.schedule_job(id, at, now).await
    }

    pub async fn execute_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job> {
        self.service.execute_job(id, now).await
    }

    pub async fn pause_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job> {
        self.service.pause_job(id, now).await
    }

    pub async fn resume_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job> {
        self.service.resume_job(id, now).await
    }

    pub async fn cancel_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job> {
        self.service.cancel_job(id, now).await
    }

    pub async fn restart_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job> {
        self.service.restart_job(id, now).await
    }

    /// Polls and dispatches once
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.poller.tick(now).await
    }

    /// Read and delete operations
    pub fn service(&self) -> &JobService {
        &self.service
    }

    /// Also the direct result path for workers
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn retention(&self) -> &RetentionSweep {
        &self.retention
    }
}
