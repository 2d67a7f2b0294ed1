//! Core domain types
//!
//! This module contains the core domain structures used across Cadence crates.
//! These types are shared between the scheduler (persists and reconciles) and
//! the worker (executes).

pub mod execution;
pub mod job;
pub mod notification;
