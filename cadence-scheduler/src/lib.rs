//! Cadence Scheduler
//!
//! Polls due jobs, dispatches them to the worker pool, reconciles execution
//! results into the job lifecycle and emits notifications.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod repository;
pub mod scheduler;
pub mod service;

pub use app::{Collaborators, Scheduler, SchedulerTasks};
pub use config::Config;
pub use error::{Result, SchedulerError};
