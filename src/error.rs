//! Error types for treesync
//!
//! Every failure the engine can hit is expressed here. Most of them are
//! recovered locally (logged and skipped); only the destination preparation
//! variants are fatal and turn a run into an abort.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for treesync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File or directory not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Hash algorithm not usable where it was requested
    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),

    /// The worker pool no longer accepts work
    #[error("Worker pool is shut down")]
    PoolShutdown,

    /// An existing destination file could not be removed
    #[error("Can't remove {}: {source}", .path.display())]
    StaleDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A destination parent directory could not be created
    #[error("Can't create {} directory: {source}", .path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A destination parent exists but is not a directory
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

impl SyncError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Whether this error must abort the whole run instead of a single file
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StaleDestination { .. } | Self::CreateDirectory { .. } | Self::NotADirectory(_)
        )
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. }
            | Self::NotFound(path)
            | Self::StaleDestination { path, .. }
            | Self::CreateDirectory { path, .. }
            | Self::NotADirectory(path) => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for treesync operations
pub type Result<T> = std::result::Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::ConfigError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| SyncError::io(path, e))
    }
}
