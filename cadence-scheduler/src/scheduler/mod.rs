//! Scheduling loop
//!
//! The poller selects due jobs on a fixed interval and the dispatcher hands
//! them to the worker pool.

pub mod dispatcher;
pub mod poller;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use poller::{Poller, TickReport};
