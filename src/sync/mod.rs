//! Change detection module
//!
//! Provides the comparison strategies that decide whether a destination
//! file is stale, and the filter that applies them across a scanned tree.

mod filter;
mod strategy;

pub use filter::*;
pub use strategy::*;
