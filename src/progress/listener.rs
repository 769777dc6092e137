//! Listener interfaces between the engine and its host
//!
//! The engine never renders anything itself. It reports overall progress,
//! an overall status line, an auxiliary narrative line and one
//! status/progress pair per worker slot through the traits below.

use crate::error::{Result, SyncError};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::ops::Deref;
use std::sync::Arc;

/// Receives a completion percentage in `0..=100`
pub trait ProgressListener: Send + Sync {
    /// Called with the new percentage
    fn on_progress(&self, percent: u8);
}

/// Receives a human-readable status line
pub trait StatusListener: Send + Sync {
    /// Called with the new status text
    fn on_status(&self, message: &str);
}

impl<F> ProgressListener for F
where
    F: Fn(u8) + Send + Sync,
{
    fn on_progress(&self, percent: u8) {
        self(percent)
    }
}

impl<F> StatusListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_status(&self, message: &str) {
        self(message)
    }
}

/// Listener that drops everything it receives
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl ProgressListener for Silent {
    fn on_progress(&self, _percent: u8) {}
}

impl StatusListener for Silent {
    fn on_status(&self, _message: &str) {}
}

/// Status and progress listeners for one worker slot
pub type SlotListeners = (Arc<dyn StatusListener>, Arc<dyn ProgressListener>);

/// Everything the engine reports to during one run
pub struct Listeners {
    /// Overall progress
    pub total_progress: Arc<dyn ProgressListener>,
    /// Overall status line
    pub total_status: Arc<dyn StatusListener>,
    /// Auxiliary narrative line (phase changes, throughput, results)
    pub aux_status: Arc<dyn StatusListener>,
    /// One pair per worker; the count must equal the configured workers
    pub file_slots: Vec<SlotListeners>,
    /// Invoked exactly once when the run ends, however it ends
    pub on_completion: Box<dyn FnOnce() + Send>,
}

impl Listeners {
    /// Listeners that report nothing, with `workers` slots
    pub fn silent(workers: usize) -> Self {
        let silent = Arc::new(Silent);
        Self {
            total_progress: silent.clone(),
            total_status: silent.clone(),
            aux_status: silent.clone(),
            file_slots: (0..workers)
                .map(|_| (silent.clone() as Arc<dyn StatusListener>, silent.clone() as Arc<dyn ProgressListener>))
                .collect(),
            on_completion: Box::new(|| {}),
        }
    }

    /// Replace the completion callback
    pub fn on_completion(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_completion = Box::new(callback);
        self
    }
}

/// A reusable per-worker reporting handle
#[derive(Clone)]
pub struct FileSlot {
    index: usize,
    status: Arc<dyn StatusListener>,
    progress: Arc<dyn ProgressListener>,
}

impl FileSlot {
    /// Position of this slot in the host's slot list
    pub fn index(&self) -> usize {
        self.index
    }

    /// Report the file this slot is working on
    pub fn set_status(&self, message: &str) {
        self.status.on_status(message);
    }

    /// Report progress on the current file
    pub fn set_progress(&self, percent: u8) {
        self.progress.on_progress(percent);
    }
}

/// Fixed pool of file slots, acquired and released across threads
///
/// Acquiring blocks until a slot is free, which bounds the number of files
/// being checked or copied at once. Releasing never blocks: the channel
/// holds exactly as many slots as exist.
pub struct SlotPool {
    free_tx: Sender<FileSlot>,
    free_rx: Receiver<FileSlot>,
    size: usize,
}

impl SlotPool {
    /// Build a pool from the host's slot listeners
    pub fn new(slots: Vec<SlotListeners>) -> Self {
        let size = slots.len();
        let (free_tx, free_rx) = bounded(size.max(1));
        for (index, (status, progress)) in slots.into_iter().enumerate() {
            // Capacity equals the slot count
            let _ = free_tx.send(FileSlot { index, status, progress });
        }
        Self { free_tx, free_rx, size }
    }

    /// Number of slots in the pool
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of slots not currently held
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    /// Take a slot, waiting until one is free
    pub fn acquire(&self) -> Result<SlotGuard> {
        let slot = self.free_rx.recv().map_err(|_| SyncError::PoolShutdown)?;
        Ok(SlotGuard {
            slot,
            release: self.free_tx.clone(),
        })
    }
}

/// A held slot, returned to its pool on drop
pub struct SlotGuard {
    slot: FileSlot,
    release: Sender<FileSlot>,
}

impl Deref for SlotGuard {
    type Target = FileSlot;

    fn deref(&self) -> &FileSlot {
        &self.slot
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.release.send(self.slot.clone());
    }
}
