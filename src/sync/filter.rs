//! Parallel strategy filter
//!
//! Evaluates the combined strategy for every candidate on the worker pool
//! and keeps the ones that need copying, in scan order.

use crate::core::{wait_for_result, CancelToken, WorkerPool};
use crate::fs::CopyCandidate;
use crate::progress::{bytes_to_human_readable, ProgressListener, SlotPool, StatusListener};
use crate::sync::Strategy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running totals maintained while candidates are evaluated
#[derive(Debug, Default)]
pub struct FilterTotals {
    /// Candidates evaluated so far
    pub evaluated: AtomicU64,
    /// Starts at the candidate count, decremented for every skipped file
    pub files_to_copy: AtomicU64,
    /// Sum of the sizes of the selected files
    pub bytes_to_copy: AtomicU64,
}

/// Result of a filter pass
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Candidates that need copying, in submission order
    pub selected: Vec<CopyCandidate>,
    /// Total size of the selected candidates
    pub bytes_to_copy: u64,
    /// Whether the pass was cut short; `selected` is then empty
    pub cancelled: bool,
}

/// Applies a strategy to candidates in parallel
pub struct StrategyFilter {
    strategy: Arc<Strategy>,
    pool: Arc<WorkerPool>,
    slots: Arc<SlotPool>,
    token: CancelToken,
    total_progress: Arc<dyn ProgressListener>,
    total_status: Arc<dyn StatusListener>,
}

impl StrategyFilter {
    /// Create a filter reporting through the given overall listeners
    pub fn new(
        strategy: Arc<Strategy>,
        pool: Arc<WorkerPool>,
        slots: Arc<SlotPool>,
        token: CancelToken,
        total_progress: Arc<dyn ProgressListener>,
        total_status: Arc<dyn StatusListener>,
    ) -> Self {
        Self {
            strategy,
            pool,
            slots,
            token,
            total_progress,
            total_status,
        }
    }

    /// Keep the candidates whose destination needs rewriting
    ///
    /// One task is submitted per candidate. Each task holds a file slot
    /// while it evaluates, so no more files are checked at once than there
    /// are slots. Cancellation observed while submitting or collecting
    /// yields an empty, cancelled outcome.
    pub fn filter(&self, candidates: Vec<CopyCandidate>) -> FilterOutcome {
        let total = candidates.len() as u64;
        let totals = Arc::new(FilterTotals {
            files_to_copy: AtomicU64::new(total),
            ..Default::default()
        });

        let mut handles = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self.token.is_cancelled() {
                return Self::cancelled();
            }

            let task = self.evaluation_task(candidate, total, Arc::clone(&totals));
            match self.pool.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::debug!("Filter stopped submitting: {}", e);
                    return Self::cancelled();
                }
            }
        }

        let mut selected = Vec::new();
        for handle in handles {
            if let Some(Some(candidate)) = wait_for_result(handle, &self.token) {
                selected.push(candidate);
            }
            if self.token.is_cancelled() {
                return Self::cancelled();
            }
        }

        let bytes_to_copy = totals.bytes_to_copy.load(Ordering::SeqCst);
        tracing::debug!(
            "{} of {} files selected by {} ({} bytes)",
            selected.len(),
            total,
            self.strategy,
            bytes_to_copy
        );

        FilterOutcome {
            selected,
            bytes_to_copy,
            cancelled: false,
        }
    }

    fn cancelled() -> FilterOutcome {
        FilterOutcome {
            cancelled: true,
            ..Default::default()
        }
    }

    fn evaluation_task(
        &self,
        candidate: CopyCandidate,
        total: u64,
        totals: Arc<FilterTotals>,
    ) -> impl FnOnce() -> Option<CopyCandidate> + Send + 'static {
        let strategy = Arc::clone(&self.strategy);
        let pool = Arc::clone(&self.pool);
        let slots = Arc::clone(&self.slots);
        let token = self.token.clone();
        let total_progress = Arc::clone(&self.total_progress);
        let total_status = Arc::clone(&self.total_status);

        move || {
            if token.is_cancelled() {
                return None;
            }
            let slot = slots.acquire().ok()?;
            slot.set_progress(0);
            slot.set_status(&format!("Checking {}", candidate.source().display()));

            let needs_copy = strategy.should_copy(candidate.source(), candidate.destination(), &pool);
            if needs_copy {
                totals.bytes_to_copy.fetch_add(candidate.size_bytes(), Ordering::SeqCst);
            } else {
                totals.files_to_copy.fetch_sub(1, Ordering::SeqCst);
            }

            let evaluated = totals.evaluated.fetch_add(1, Ordering::SeqCst) + 1;
            if total > 0 {
                total_progress.on_progress((evaluated * 100 / total) as u8);
            }
            total_status.on_status(&format!(
                "0 of {} ({} files left)",
                bytes_to_human_readable(totals.bytes_to_copy.load(Ordering::SeqCst)),
                totals.files_to_copy.load(Ordering::SeqCst)
            ));

            needs_copy.then_some(candidate)
        }
    }
}
