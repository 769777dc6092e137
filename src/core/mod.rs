//! Core sync engine module
//!
//! Provides the run orchestration, the bounded worker pool it schedules
//! work on, and cooperative cancellation.

mod engine;
mod scheduler;

pub use engine::*;
pub use scheduler::*;
