//! Source tree enumeration
//!
//! Walks the source root depth-first in file-name order and pairs every
//! regular file with the path it mirrors to under the destination root.

use crate::core::CancelToken;
use crate::error::{Result, SyncError};
use crate::progress::StatusListener;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// A source file paired with the destination path it mirrors to
///
/// Identity is the `(source, destination)` pair. The size is a snapshot
/// taken at scan time and does not take part in equality.
#[derive(Debug, Clone)]
pub struct CopyCandidate {
    source: PathBuf,
    destination: PathBuf,
    size_bytes: u64,
}

impl CopyCandidate {
    /// Create a candidate
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            size_bytes,
        }
    }

    /// Path of the source file
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Path the source is copied to
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Source size in bytes when the tree was scanned
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl PartialEq for CopyCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.destination == other.destination
    }
}

impl Eq for CopyCandidate {}

impl Hash for CopyCandidate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.destination.hash(state);
    }
}

/// Result of a tree scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Candidates in visit order
    pub candidates: Vec<CopyCandidate>,
    /// Sum of candidate sizes
    pub total_bytes: u64,
    /// False when the scan was cut short by cancellation
    pub complete: bool,
}

/// Tree scanner reporting each directory it enters
pub struct Scanner {
    token: CancelToken,
    status: Option<Arc<dyn StatusListener>>,
}

impl Scanner {
    /// Create a scanner observing the given cancellation token
    pub fn new(token: CancelToken) -> Self {
        Self { token, status: None }
    }

    /// Report `Scanning <dir>` to this listener before entering a directory
    pub fn with_status(mut self, status: Arc<dyn StatusListener>) -> Self {
        self.status = Some(status);
        self
    }

    fn announce(&self, dir: &Path) {
        if let Some(status) = &self.status {
            status.on_status(&format!("Scanning {}", dir.display()));
        }
    }

    /// Enumerate `source_root` into candidates mirrored under `destination_root`
    ///
    /// With `include_root` the source directory itself is mirrored, so
    /// `src/a.txt` lands at `dst/src/a.txt`. Without it, each child of the
    /// source is mirrored directly, so `src/a.txt` lands at `dst/a.txt`.
    ///
    /// Entries that cannot be read are logged and skipped. When the token is
    /// cancelled the walk stops and the partial result is returned with
    /// `complete` unset.
    pub fn scan(&self, source_root: &Path, destination_root: &Path, include_root: bool) -> Result<ScanResult> {
        let root_meta = std::fs::metadata(source_root)
            .map_err(|_| SyncError::NotFound(source_root.to_path_buf()))?;

        let mirror_root = match (include_root || !root_meta.is_dir(), source_root.file_name()) {
            (true, Some(name)) => destination_root.join(name),
            _ => destination_root.to_path_buf(),
        };

        let mut result = ScanResult {
            complete: true,
            ..Default::default()
        };

        if !root_meta.is_dir() {
            result.total_bytes = root_meta.len();
            result.candidates.push(CopyCandidate::new(source_root, mirror_root, root_meta.len()));
            return Ok(result);
        }

        if !include_root {
            self.announce(source_root);
        }

        let walker = WalkDir::new(source_root)
            .follow_links(true)
            .sort_by_file_name()
            .min_depth(if include_root { 0 } else { 1 });

        for entry in walker {
            if self.token.is_cancelled() {
                tracing::debug!("Scan of {} cancelled", source_root.display());
                result.complete = false;
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                self.announce(entry.path());
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    tracing::warn!("Skipping {}: {}", entry.path().display(), err);
                    continue;
                }
            };

            let relative = entry.path().strip_prefix(source_root).unwrap_or(entry.path());
            result.total_bytes += size;
            result.candidates.push(CopyCandidate::new(entry.path(), mirror_root.join(relative), size));
        }

        tracing::debug!(
            "Scanned {}: {} files, {} bytes",
            source_root.display(),
            result.candidates.len(),
            result.total_bytes
        );

        Ok(result)
    }
}
