//! Repository layer
//!
//! Postgres implementations of the job and execution stores.

mod execution;
mod job;

pub use execution::PgExecutionStore;
pub use job::PgJobStore;
