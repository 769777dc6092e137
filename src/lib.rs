//! # treesync - Concurrent Directory-Tree Synchronization
//!
//! treesync mirrors a source directory tree into a destination, copying
//! only the files that a pluggable change detection strategy considers
//! stale. Work runs on a bounded worker pool while per-file and overall
//! progress is reported through listener callbacks, and a run can be
//! interrupted at any chunk boundary.
//!
//! ## Features
//!
//! - **Pluggable change detection**: modification time, size, head/tail
//!   sampling, SHA-256 or BLAKE3 digests, full content comparison
//! - **Bounded parallelism**: a fixed worker count limits both the pool and
//!   the number of files handled at once
//! - **Zero-copy transfer**: `copy_file_range` on Linux, in 16 MiB chunks
//! - **Live progress**: overall, auxiliary and per-worker listeners
//! - **Cooperative cancellation**: interrupt from any thread
//!
//! ## Quick Start
//!
//! ```no_run
//! use treesync::config::{StrategyKind, SyncConfig};
//! use treesync::core::SyncEngine;
//! use treesync::progress::Listeners;
//! use std::path::PathBuf;
//!
//! let config = SyncConfig {
//!     source: PathBuf::from("/data"),
//!     destination: PathBuf::from("/backup"),
//!     strategies: vec![StrategyKind::Size, StrategyKind::ModTime],
//!     workers: 2,
//!     ..Default::default()
//! };
//!
//! let handle = SyncEngine::start(config, Listeners::silent(2)).unwrap();
//! let outcome = handle.join();
//! println!("{:?}", outcome);
//! ```
//!
//! ## Custom Listeners
//!
//! ```no_run
//! use treesync::config::SyncConfig;
//! use treesync::core::SyncEngine;
//! use treesync::progress::Listeners;
//! use std::sync::Arc;
//!
//! let config = SyncConfig {
//!     source: "/data".into(),
//!     destination: "/backup".into(),
//!     workers: 1,
//!     ..Default::default()
//! };
//!
//! let mut listeners = Listeners::silent(1).on_completion(|| println!("finished"));
//! listeners.aux_status = Arc::new(|msg: &str| println!("{}", msg));
//! listeners.total_progress = Arc::new(|pct: u8| println!("{}%", pct));
//!
//! let handle = SyncEngine::start(config, listeners).unwrap();
//! handle.interrupt();
//! handle.join();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod hash;
pub mod progress;
pub mod sync;

// Re-export commonly used types
pub use config::{HashAlgorithm, StrategyKind, SyncConfig};
pub use core::{Interrupter, RunOutcome, RunSummary, SyncEngine, SyncHandle};
pub use error::{Result, SyncError};
pub use progress::Listeners;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use treesync::prelude::*;
    //! ```

    pub use crate::config::{HashAlgorithm, StrategyKind, SyncConfig};
    pub use crate::core::{CancelToken, Interrupter, RunOutcome, RunState, RunSummary, SyncEngine, SyncHandle, WorkerPool};
    pub use crate::error::{Result, SyncError};
    pub use crate::fs::{CopyCandidate, Scanner};
    pub use crate::hash::{compare_files, hash_file, HashResult};
    pub use crate::progress::{Listeners, ProgressListener, StatusListener, TerminalReporter};
    pub use crate::sync::{Strategy, StrategyFilter};
}
