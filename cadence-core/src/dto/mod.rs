//! Data Transfer Objects
//!
//! This module contains the requests accepted by the scheduler and the
//! messages exchanged between the scheduler and the worker pool over the
//! message bus.

pub mod job;
pub mod message;
