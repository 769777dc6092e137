//! Configuration module for treesync
//!
//! Provides the run configuration, CLI arguments, and JSON profiles.

mod settings;

pub use settings::*;
