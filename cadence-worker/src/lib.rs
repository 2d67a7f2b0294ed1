//! Cadence Worker
//!
//! Executes dispatched jobs as isolated subprocesses.
//!
//! Architecture:
//! - Configuration: pool size, timeout and runtime command from the environment
//! - Staging: scoped local copies of artifacts, removed on every exit path
//! - Execution: runs `<runtime> <artifact> [arguments...]` with a hard timeout
//! - Pool: bounded consumer of dispatch messages that reports results on the bus,
//!   or through a direct fallback when the bus refuses them

pub mod config;
pub mod execution;
pub mod pool;
pub mod staging;

pub use config::WorkerConfig;
pub use execution::{ExecutionService, ProcessExecutionService};
pub use pool::{ResultSink, WorkerPool};
pub use staging::StagedArtifact;
