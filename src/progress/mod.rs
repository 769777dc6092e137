//! Progress reporting module
//!
//! Listener interfaces the engine reports through, text formatting for
//! sizes and durations, and a terminal renderer built on indicatif.

pub mod format;
mod listener;
mod reporter;

pub use format::{bytes_to_human_readable, millis_to_human_readable};
pub use listener::*;
pub use reporter::*;
