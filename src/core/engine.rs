//! Sync engine
//!
//! Drives one run on a dedicated thread: scan the source tree, filter it
//! through the configured strategies, then copy what is left on the
//! worker pool. The host gets a [`SyncHandle`] to interrupt or join the
//! run; everything else it learns through its listeners.

use crate::config::SyncConfig;
use crate::core::{wait_for_result, CancelToken, WorkerPool};
use crate::error::{Result, SyncError};
use crate::fs::{prepare_destination, transfer_range, CopyCandidate, Scanner};
use crate::progress::{
    bytes_to_human_readable, millis_to_human_readable, Listeners, ProgressListener, SlotPool, StatusListener,
};
use crate::sync::{Strategy, StrategyFilter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// Not started
    Idle = 0,
    /// Enumerating the source tree
    Scanning = 1,
    /// Deciding which files need copying
    Filtering = 2,
    /// Copying selected files
    Copying = 3,
    /// Finished normally, possibly with per-file failures
    Completed = 4,
    /// Stopped by a fatal destination error
    Aborted = 5,
    /// Stopped on request
    Interrupted = 6,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Scanning,
            2 => Self::Filtering,
            3 => Self::Copying,
            4 => Self::Completed,
            5 => Self::Aborted,
            6 => Self::Interrupted,
            _ => Self::Idle,
        }
    }
}

/// Counters of a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Files the strategies selected for copying
    pub files_selected: u64,
    /// Total size of the selected files
    pub bytes_selected: u64,
    /// Files whose copy task ran to the end, successfully or not
    pub files_completed: u64,
    /// Bytes written across all files
    pub bytes_copied: u64,
    /// Time since the run started
    pub elapsed: Duration,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// All selected files were attempted
    Completed(RunSummary),
    /// A destination could not be prepared
    Aborted {
        /// Reason reported on the auxiliary status line
        message: String,
    },
    /// The host interrupted the run
    Interrupted,
}

impl RunOutcome {
    /// The summary of a completed run
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            _ => None,
        }
    }

    /// Terminal state matching this outcome
    pub fn state(&self) -> RunState {
        match self {
            Self::Completed(_) => RunState::Completed,
            Self::Aborted { .. } => RunState::Aborted,
            Self::Interrupted => RunState::Interrupted,
        }
    }
}

/// State visible to both the run thread and the host's handle
struct Shared {
    state: AtomicU8,
    running: AtomicBool,
    /// Claimed once, by the first interrupt or by the run settling its outcome
    closed: AtomicBool,
    token: CancelToken,
    pool: Arc<WorkerPool>,
    aux_status: Arc<dyn StatusListener>,
}

impl Shared {
    fn set_state(&self, state: RunState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Claim the right to decide how the run ends; only the first caller gets it
    fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

/// Cloneable trigger for [`SyncHandle::interrupt`]
///
/// Lets a signal handler or another thread stop the run while the handle
/// itself is consumed by [`SyncHandle::join`].
#[derive(Clone)]
pub struct Interrupter {
    shared: Arc<Shared>,
}

impl Interrupter {
    /// See [`SyncHandle::interrupt`]
    pub fn interrupt(&self) {
        if !self.shared.running.load(Ordering::SeqCst) || !self.shared.close() {
            return;
        }
        tracing::info!("Interrupt requested");
        self.shared.pool.shutdown();
        self.shared.token.cancel();
        self.shared.aux_status.on_status("Interrupted");
    }
}

/// Handle to a running sync
pub struct SyncHandle {
    shared: Arc<Shared>,
    thread: JoinHandle<RunOutcome>,
}

impl SyncHandle {
    /// Request the run to stop
    ///
    /// Stops new work from being submitted and signals in-flight copies to
    /// stop at their next chunk. Safe from any thread, idempotent, and a
    /// no-op once the run has ended.
    pub fn interrupt(&self) {
        self.interrupter().interrupt();
    }

    /// A trigger that outlives this handle
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether the run has not reached a terminal state yet
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Current phase
    pub fn state(&self) -> RunState {
        RunState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Wait for the run to end
    pub fn join(self) -> RunOutcome {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(_) => RunOutcome::Aborted {
                message: "engine thread panicked".to_string(),
            },
        }
    }
}

/// Entry point for sync runs
pub struct SyncEngine;

impl SyncEngine {
    /// Validate the configuration and start a run on its own thread
    ///
    /// Errors are returned only for problems detected before the run
    /// starts. Once running, every failure is reported through the
    /// listeners and the final [`RunOutcome`].
    pub fn start(config: SyncConfig, listeners: Listeners) -> Result<SyncHandle> {
        config.validate()?;
        if listeners.file_slots.len() != config.workers {
            return Err(SyncError::config(format!(
                "{} file slots supplied for {} workers",
                listeners.file_slots.len(),
                config.workers
            )));
        }

        let Listeners {
            total_progress,
            total_status,
            aux_status,
            file_slots,
            on_completion,
        } = listeners;

        let pool = Arc::new(WorkerPool::new(config.workers, config.queue_capacity)?);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(RunState::Idle as u8),
            running: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            token: CancelToken::new(),
            pool: Arc::clone(&pool),
            aux_status: Arc::clone(&aux_status),
        });

        let context = RunContext {
            strategy: Arc::new(Strategy::from_kinds(&config.strategies, config.hash_algorithm)),
            config,
            slots: Arc::new(SlotPool::new(file_slots)),
            pool,
            token: shared.token.clone(),
            total_progress,
            total_status,
            aux_status,
            fatal: Arc::new(OnceLock::new()),
            shared: Arc::clone(&shared),
        };

        let run_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("treesync-engine".to_string())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| context.run())).unwrap_or_else(|_| {
                    tracing::error!("Sync run panicked");
                    RunOutcome::Aborted {
                        message: "internal error".to_string(),
                    }
                });
                run_shared.close();
                run_shared.set_state(outcome.state());
                run_shared.running.store(false, Ordering::SeqCst);
                on_completion();
                outcome
            })?;

        Ok(SyncHandle { shared, thread })
    }
}

/// Everything one run owns; dropped when the run ends
struct RunContext {
    config: SyncConfig,
    strategy: Arc<Strategy>,
    slots: Arc<SlotPool>,
    pool: Arc<WorkerPool>,
    token: CancelToken,
    total_progress: Arc<dyn ProgressListener>,
    total_status: Arc<dyn StatusListener>,
    aux_status: Arc<dyn StatusListener>,
    /// First fatal error raised by a copy task
    fatal: Arc<OnceLock<String>>,
    shared: Arc<Shared>,
}

/// Counters shared by the copy tasks of one run
struct CopyProgress {
    files_to_copy: u64,
    bytes_to_copy: u64,
    bytes_copied: AtomicU64,
    files_completed: AtomicU64,
    started: Instant,
}

impl RunContext {
    fn run(&self) -> RunOutcome {
        let started = Instant::now();
        tracing::info!(
            "Sync {} -> {} ({} workers, strategy: {})",
            self.config.source.display(),
            self.config.destination.display(),
            self.config.workers,
            self.strategy
        );

        let outcome = self.execute(started);
        self.pool.shutdown();

        match &outcome {
            RunOutcome::Completed(summary) => tracing::info!(
                "Sync finished: {} of {} files, {} bytes in {:?}",
                summary.files_completed,
                summary.files_selected,
                summary.bytes_copied,
                summary.elapsed
            ),
            RunOutcome::Aborted { message } => tracing::error!("Sync aborted: {}", message),
            RunOutcome::Interrupted => tracing::info!("Sync interrupted"),
        }
        outcome
    }

    fn execute(&self, started: Instant) -> RunOutcome {
        self.shared.set_state(RunState::Scanning);
        self.aux_status.on_status("Scanning source files");

        let scan = match Scanner::new(self.token.clone())
            .with_status(Arc::clone(&self.total_status))
            .scan(&self.config.source, &self.config.destination, self.config.include_root)
        {
            Ok(scan) => scan,
            Err(e) => return self.abort(e.to_string()),
        };

        // An incomplete scan still goes through the filter, which sees the
        // cancellation and comes back empty
        self.shared.set_state(RunState::Filtering);
        self.aux_status.on_status("Checking which files should be copied");

        let filter = StrategyFilter::new(
            Arc::clone(&self.strategy),
            Arc::clone(&self.pool),
            Arc::clone(&self.slots),
            self.token.clone(),
            Arc::clone(&self.total_progress),
            Arc::clone(&self.total_status),
        );
        let filtered = filter.filter(scan.candidates);
        if filtered.cancelled || self.token.is_cancelled() {
            return self.stopped();
        }

        if filtered.selected.is_empty() {
            if !self.shared.close() {
                return self.stopped();
            }
            self.aux_status.on_status("Nothing to copy!");
            return RunOutcome::Completed(RunSummary {
                elapsed: started.elapsed(),
                ..Default::default()
            });
        }

        self.shared.set_state(RunState::Copying);
        let progress = Arc::new(CopyProgress {
            files_to_copy: filtered.selected.len() as u64,
            bytes_to_copy: filtered.bytes_to_copy,
            bytes_copied: AtomicU64::new(0),
            files_completed: AtomicU64::new(0),
            started: Instant::now(),
        });
        self.aux_status.on_status(&format!(
            "{} to copy ({} files)",
            bytes_to_human_readable(progress.bytes_to_copy),
            progress.files_to_copy
        ));

        let mut handles = Vec::with_capacity(filtered.selected.len());
        for candidate in filtered.selected {
            if self.token.is_cancelled() {
                break;
            }
            match self.pool.submit(self.copy_task(candidate, Arc::clone(&progress))) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::debug!("Stopped submitting copies: {}", e);
                    break;
                }
            }
        }

        for handle in handles {
            if self.token.is_cancelled() {
                break;
            }
            wait_for_result(handle, &self.token);
        }

        // Settle the outcome against a racing interrupt
        if self.token.is_cancelled() || !self.shared.close() {
            return self.stopped();
        }

        self.aux_status.on_status(&format!(
            "Done! {}",
            millis_to_human_readable(progress.started.elapsed().as_millis() as u64)
        ));

        RunOutcome::Completed(RunSummary {
            files_selected: progress.files_to_copy,
            bytes_selected: progress.bytes_to_copy,
            files_completed: progress.files_completed.load(Ordering::SeqCst),
            bytes_copied: progress.bytes_copied.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        })
    }

    /// Outcome after cancellation: a recorded fatal error wins over an interrupt
    fn stopped(&self) -> RunOutcome {
        match self.fatal.get() {
            Some(message) => self.abort(message.clone()),
            None => {
                // Let in-flight copies reach their next chunk boundary
                self.pool.shutdown();
                if !self.pool.await_termination(self.config.abort_grace()) {
                    tracing::warn!("Workers still busy after interrupt");
                }
                RunOutcome::Interrupted
            }
        }
    }

    /// Drain the pool and report a fatal error
    fn abort(&self, message: String) -> RunOutcome {
        self.shared.close();
        self.token.cancel();
        self.pool.shutdown();
        if !self.pool.await_termination(self.config.abort_grace()) {
            tracing::warn!("Grace period expired, discarding outstanding work");
        }
        self.pool.shutdown_now();
        self.aux_status.on_status(&message);
        RunOutcome::Aborted { message }
    }

    fn copy_task(&self, candidate: CopyCandidate, progress: Arc<CopyProgress>) -> impl FnOnce() + Send + 'static {
        let slots = Arc::clone(&self.slots);
        let token = self.token.clone();
        let fatal = Arc::clone(&self.fatal);
        let total_progress = Arc::clone(&self.total_progress);
        let total_status = Arc::clone(&self.total_status);
        let aux_status = Arc::clone(&self.aux_status);
        let chunk_size = self.config.chunk_size;

        move || {
            if token.is_cancelled() {
                return;
            }
            let Ok(slot) = slots.acquire() else {
                return;
            };

            let source = candidate.source();
            let destination = candidate.destination();

            if let Err(e) = prepare_destination(destination) {
                tracing::error!("{}", e);
                let _ = fatal.set(e.to_string());
                token.cancel();
                return;
            }

            slot.set_progress(0);
            slot.set_status(&source.display().to_string());

            let size = candidate.size_bytes();
            let mut reported: u64 = 0;
            let mut last_rate: Option<u64> = None;

            let result = transfer_range(source, destination, size, chunk_size, &token, |transferred| {
                let delta = transferred - reported;
                reported = transferred;
                let copied = progress.bytes_copied.fetch_add(delta, Ordering::SeqCst) + delta;

                slot.set_progress(percent(transferred, size));
                total_progress.on_progress(percent(copied, progress.bytes_to_copy));
                total_status.on_status(&format!(
                    "{} of {} ({} files left)",
                    bytes_to_human_readable(copied),
                    bytes_to_human_readable(progress.bytes_to_copy),
                    progress.files_to_copy - progress.files_completed.load(Ordering::SeqCst)
                ));

                let secs = progress.started.elapsed().as_secs();
                if secs > 0 {
                    let rate = copied / secs;
                    if last_rate != Some(rate) {
                        aux_status.on_status(&format!("{}/sec", bytes_to_human_readable(rate)));
                        last_rate = Some(rate);
                    }
                }
            });

            match result {
                Ok(outcome) if outcome.cancelled => {
                    tracing::debug!("Copy of {} stopped after {} bytes", source.display(), outcome.transferred);
                    return;
                }
                Ok(_) => {
                    slot.set_progress(100);
                    tracing::debug!("Copied {} ({} bytes)", source.display(), size);
                }
                Err(e) => tracing::warn!("Failed to copy {}: {}", source.display(), e),
            }
            progress.files_completed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn percent(part: u64, whole: u64) -> u8 {
    if whole == 0 {
        return 100;
    }
    (part as u128 * 100 / whole as u128).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyKind;
    use crate::progress::{Silent, SlotListeners};
    use crossbeam::channel::bounded;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn create_source_tree(root: &Path) {
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), b"0123456789").unwrap();
        fs::write(root.join("sub/b.txt"), b"abcdefghijklmnopqrst").unwrap();
    }

    fn config(src: &Path, dst: &Path, strategies: Vec<StrategyKind>, workers: usize) -> SyncConfig {
        SyncConfig {
            source: src.to_path_buf(),
            destination: dst.to_path_buf(),
            strategies,
            workers,
            abort_grace_secs: 2,
            ..Default::default()
        }
    }

    /// Silent listeners recording the auxiliary status line and completions
    fn recording_listeners(workers: usize) -> (Listeners, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        let aux = Arc::new(Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&aux);
        let counter = Arc::clone(&completions);
        let mut listeners = Listeners::silent(workers).on_completion(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        listeners.aux_status = Arc::new(move |msg: &str| sink.lock().unwrap().push(msg.to_string()));

        (listeners, aux, completions)
    }

    fn relative_files(root: &Path) -> Vec<(std::path::PathBuf, Vec<u8>)> {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
                (rel, fs::read(e.path()).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_copies_tree_by_size() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        create_source_tree(src.path());

        let (listeners, aux, completions) = recording_listeners(2);
        let handle = SyncEngine::start(config(src.path(), dst.path(), vec![StrategyKind::Size], 2), listeners).unwrap();
        let outcome = handle.join();

        let summary = outcome.summary().expect("run should complete");
        assert_eq!(summary.files_selected, 2);
        assert_eq!(summary.files_completed, 2);
        assert_eq!(summary.bytes_selected, 30);
        assert_eq!(summary.bytes_copied, 30);
        assert_eq!(relative_files(src.path()), relative_files(dst.path()));

        let aux = aux.lock().unwrap();
        assert_eq!(aux[0], "Scanning source files");
        assert_eq!(aux[1], "Checking which files should be copied");
        assert_eq!(aux[2], "30 bytes to copy (2 files)");
        assert!(aux.last().unwrap().starts_with("Done! "));
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identical_tree_nothing_to_copy() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        create_source_tree(src.path());
        create_source_tree(dst.path());

        let (listeners, aux, completions) = recording_listeners(2);
        let handle =
            SyncEngine::start(config(src.path(), dst.path(), vec![StrategyKind::Content], 2), listeners).unwrap();
        let outcome = handle.join();

        let summary = outcome.summary().unwrap();
        assert_eq!(summary.files_selected, 0);
        assert_eq!(summary.bytes_copied, 0);
        assert_eq!(aux.lock().unwrap().last().unwrap(), "Nothing to copy!");
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_run_selects_nothing() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        create_source_tree(src.path());

        for (run, expected) in [(1, 2), (2, 0)] {
            let handle = SyncEngine::start(
                config(src.path(), dst.path(), vec![StrategyKind::Size], 2),
                Listeners::silent(2),
            )
            .unwrap();
            let outcome = handle.join();
            assert_eq!(outcome.summary().unwrap().files_selected, expected, "run {}", run);
        }
    }

    #[test]
    fn test_include_root_and_default_strategy() {
        let parent = TempDir::new().unwrap();
        let src = parent.path().join("project");
        let dst = TempDir::new().unwrap();
        create_source_tree(&src);

        let mut cfg = config(&src, dst.path(), vec![], 1);
        cfg.include_root = true;
        let handle = SyncEngine::start(cfg, Listeners::silent(1)).unwrap();
        let outcome = handle.join();

        assert_eq!(outcome.summary().unwrap().files_completed, 2);
        assert_eq!(fs::read(dst.path().join("project/sub/b.txt")).unwrap(), b"abcdefghijklmnopqrst");
    }

    #[test]
    fn test_interrupt_mid_transfer() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let big: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        fs::write(src.path().join("a.bin"), &big).unwrap();
        fs::write(src.path().join("b.bin"), b"second file").unwrap();

        // The first chunk report parks the copy until the test has interrupted
        let (reached_tx, reached_rx) = bounded::<()>(1);
        let (resume_tx, resume_rx) = bounded::<()>(1);
        let parked = AtomicBool::new(false);
        let slot_progress: Arc<dyn ProgressListener> = Arc::new(move |percent: u8| {
            if percent > 0 && percent < 100 && !parked.swap(true, Ordering::SeqCst) {
                reached_tx.send(()).unwrap();
                resume_rx.recv().unwrap();
            }
        });

        let (mut listeners, aux, completions) = recording_listeners(1);
        listeners.file_slots = vec![(Arc::new(Silent) as Arc<dyn StatusListener>, slot_progress) as SlotListeners];

        let mut cfg = config(src.path(), dst.path(), vec![StrategyKind::Always], 1);
        cfg.chunk_size = 1024;
        let handle = SyncEngine::start(cfg, listeners).unwrap();

        reached_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(handle.state(), RunState::Copying);
        handle.interrupt();
        handle.interrupt();
        resume_tx.send(()).unwrap();

        assert_eq!(handle.join(), RunOutcome::Interrupted);

        let partial = fs::metadata(dst.path().join("a.bin")).unwrap().len();
        assert!(partial < big.len() as u64);
        assert!(!dst.path().join("b.bin").exists());

        let aux = aux.lock().unwrap();
        assert_eq!(aux.iter().filter(|m| *m == "Interrupted").count(), 1);
        assert!(!aux.iter().any(|m| m.starts_with("Done!")));
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abort_when_parent_is_file() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        create_source_tree(src.path());
        fs::write(dst.path().join("sub"), b"in the way").unwrap();

        let (listeners, aux, completions) = recording_listeners(2);
        let handle = SyncEngine::start(config(src.path(), dst.path(), vec![StrategyKind::Size], 2), listeners).unwrap();
        let outcome = handle.join();

        match outcome {
            RunOutcome::Aborted { message } => {
                assert!(message.ends_with("is not a directory"), "{}", message);
                assert_eq!(aux.lock().unwrap().last().unwrap(), &message);
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abort_when_destination_cannot_be_removed() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        create_source_tree(src.path());
        fs::create_dir_all(dst.path().join("a.txt/inner")).unwrap();

        let (listeners, aux, completions) = recording_listeners(2);
        let handle = SyncEngine::start(config(src.path(), dst.path(), vec![], 2), listeners).unwrap();

        match handle.join() {
            RunOutcome::Aborted { message } => {
                assert!(message.starts_with("Can't remove"), "{}", message);
                assert_eq!(aux.lock().unwrap().last().unwrap(), &message);
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert!(dst.path().join("a.txt/inner").is_dir());
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_file_does_not_stop_run() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        create_source_tree(src.path());

        // Pull the first source away once its destination is prepared
        let vanishing = src.path().join("a.txt");
        let watched = vanishing.display().to_string();
        let slot_status: Arc<dyn StatusListener> = Arc::new(move |msg: &str| {
            if msg == watched {
                fs::remove_file(&vanishing).unwrap();
            }
        });

        let (mut listeners, aux, completions) = recording_listeners(1);
        listeners.file_slots = vec![(slot_status, Arc::new(Silent) as Arc<dyn ProgressListener>) as SlotListeners];

        let handle = SyncEngine::start(config(src.path(), dst.path(), vec![StrategyKind::Size], 1), listeners).unwrap();
        let outcome = handle.join();

        let summary = outcome.summary().expect("a single failed file must not end the run");
        assert_eq!(summary.files_selected, 2);
        assert_eq!(summary.files_completed, 2);
        assert_eq!(summary.bytes_copied, 20);
        // One slot, so the failed task must have handed it back
        assert_eq!(fs::read(dst.path().join("sub/b.txt")).unwrap(), b"abcdefghijklmnopqrst");
        assert!(aux.lock().unwrap().last().unwrap().starts_with("Done! "));
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interrupter_stops_joined_run() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let big: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        fs::write(src.path().join("a.bin"), &big).unwrap();

        let (reached_tx, reached_rx) = bounded::<()>(1);
        let (resume_tx, resume_rx) = bounded::<()>(1);
        let parked = AtomicBool::new(false);
        let slot_progress: Arc<dyn ProgressListener> = Arc::new(move |percent: u8| {
            if percent > 0 && percent < 100 && !parked.swap(true, Ordering::SeqCst) {
                reached_tx.send(()).unwrap();
                resume_rx.recv().unwrap();
            }
        });

        let (mut listeners, aux, completions) = recording_listeners(1);
        listeners.file_slots = vec![(Arc::new(Silent) as Arc<dyn StatusListener>, slot_progress) as SlotListeners];

        let mut cfg = config(src.path(), dst.path(), vec![StrategyKind::Always], 1);
        cfg.chunk_size = 1024;
        let handle = SyncEngine::start(cfg, listeners).unwrap();

        // Interrupt from another thread while the handle is blocked in join
        let interrupter = handle.interrupter();
        let signaller = thread::spawn(move || {
            reached_rx.recv_timeout(Duration::from_secs(10)).unwrap();
            interrupter.interrupt();
            resume_tx.send(()).unwrap();
        });

        assert_eq!(handle.join(), RunOutcome::Interrupted);
        signaller.join().unwrap();

        assert!(fs::metadata(dst.path().join("a.bin")).unwrap().len() < big.len() as u64);
        assert_eq!(aux.lock().unwrap().iter().filter(|m| *m == "Interrupted").count(), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interrupt_after_outcome_settled() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        create_source_tree(src.path());

        // Interrupt from inside the final status report, while the run is still marked running
        let (interrupter_tx, interrupter_rx) = bounded::<Interrupter>(1);
        let (mut listeners, aux, completions) = recording_listeners(1);
        let sink = Arc::clone(&aux);
        listeners.aux_status = Arc::new(move |msg: &str| {
            sink.lock().unwrap().push(msg.to_string());
            if msg.starts_with("Done!") {
                let interrupter = interrupter_rx.recv_timeout(Duration::from_secs(10)).unwrap();
                interrupter.interrupt();
            }
        });

        let handle = SyncEngine::start(config(src.path(), dst.path(), vec![], 1), listeners).unwrap();
        assert!(interrupter_tx.send(handle.interrupter()).is_ok());

        let outcome = handle.join();
        assert_eq!(outcome.summary().unwrap().files_completed, 2);
        let aux = aux.lock().unwrap();
        assert!(!aux.iter().any(|m| m == "Interrupted"), "{:?}", aux);
        assert!(aux.last().unwrap().starts_with("Done! "));
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interrupt_after_completion_is_noop() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        create_source_tree(src.path());

        let (listeners, aux, _) = recording_listeners(2);
        let handle = SyncEngine::start(config(src.path(), dst.path(), vec![], 2), listeners).unwrap();
        while handle.is_running() {
            thread::sleep(Duration::from_millis(10));
        }

        handle.interrupt();
        assert_eq!(handle.state(), RunState::Completed);
        assert!(handle.join().summary().is_some());
        assert!(!aux.lock().unwrap().iter().any(|m| m == "Interrupted"));
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();

        let result = SyncEngine::start(config(src.path(), dst.path(), vec![], 2), Listeners::silent(3));
        assert!(matches!(result, Err(SyncError::ConfigError(_))));

        let result = SyncEngine::start(config(src.path(), dst.path(), vec![], 0), Listeners::silent(0));
        assert!(matches!(result, Err(SyncError::ConfigError(_))));

        let missing = src.path().join("missing");
        let result = SyncEngine::start(config(&missing, dst.path(), vec![], 1), Listeners::silent(1));
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
    }
}
