//! Cadence Core
//!
//! Core types and collaborator abstractions for the Cadence job scheduler.
//!
//! This crate contains:
//! - Domain types: Job, execution records and execution results
//! - DTOs: Messages exchanged between the scheduler and the worker pool
//! - Recurrence: next-run calculation for recurring jobs
//! - Collaborators: job/execution stores, message bus and artifact store
//!   traits, with in-process implementations

pub mod artifact;
pub mod bus;
pub mod domain;
pub mod dto;
pub mod recurrence;
pub mod store;

pub use artifact::{ArtifactError, ArtifactStore, LocalArtifactStore};
pub use bus::{BusError, InProcessBus, MessageBus, Subscription};
pub use store::{ExecutionStore, JobStore, StoreError};
