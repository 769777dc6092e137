//! Worker pool and cooperative cancellation
//!
//! The pool runs `workers - 1` background threads behind a bounded queue.
//! The submitting thread counts as the last worker: when the queue is full
//! it runs the task itself, which throttles submission and guarantees
//! forward progress. A waiter whose task has not started yet also runs it
//! inline, so tasks that submit and join sub-tasks cannot starve the pool.

use crate::error::{Result, SyncError};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll interval of idle worker threads
const WORKER_POLL: Duration = Duration::from_millis(100);

/// Poll interval of [`wait_for_result`]
const RESULT_POLL: Duration = Duration::from_secs(1);

/// Shared cancellation flag, checked at loop boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

type Job<T> = Box<dyn FnOnce() -> T + Send>;

/// A submitted job, runnable exactly once by whoever takes it first
struct Task<T> {
    pending: Mutex<Option<(Job<T>, Sender<thread::Result<T>>)>>,
}

/// Type-erased view of a task as stored in the queue
trait Runnable: Send + Sync {
    /// Run the job unless someone else already took it
    fn run(&self) -> bool;
    /// Drop the job so its handle observes a disconnect
    fn cancel(&self);
}

impl<T: Send> Task<T> {
    fn take(&self) -> Option<(Job<T>, Sender<thread::Result<T>>)> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl<T: Send> Runnable for Task<T> {
    fn run(&self) -> bool {
        match self.take() {
            Some((job, result_tx)) => {
                let result = panic::catch_unwind(AssertUnwindSafe(job));
                let _ = result_tx.send(result);
                true
            }
            None => false,
        }
    }

    fn cancel(&self) {
        drop(self.take());
    }
}

/// Handle to the eventual result of a submitted task
pub struct TaskHandle<T> {
    task: Arc<Task<T>>,
    result_rx: Receiver<thread::Result<T>>,
}

impl<T: Send> TaskHandle<T> {
    /// Run the task on this thread if no worker has started it yet
    pub fn run_inline(&self) -> bool {
        self.task.run()
    }

    /// Wait for the result without a cancellation check
    ///
    /// Returns `None` if the task panicked or was discarded.
    pub fn join(self) -> Option<T> {
        self.run_inline();
        match self.result_rx.recv() {
            Ok(Ok(value)) => Some(value),
            Ok(Err(payload)) => {
                tracing::error!("Task panicked: {}", panic_message(&*payload));
                None
            }
            Err(_) => {
                tracing::warn!("Task discarded before it ran");
                None
            }
        }
    }
}

/// Wait for a task's result while staying responsive to cancellation
///
/// Polls every second and gives up with `None` once the token is
/// cancelled. A panicking or discarded task is logged and also yields
/// `None`; the failure never reaches the caller.
pub fn wait_for_result<T: Send>(handle: TaskHandle<T>, token: &CancelToken) -> Option<T> {
    if token.is_cancelled() {
        return None;
    }
    handle.run_inline();

    loop {
        match handle.result_rx.recv_timeout(RESULT_POLL) {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(payload)) => {
                tracing::error!("Task panicked: {}", panic_message(&*payload));
                return None;
            }
            Err(RecvTimeoutError::Timeout) => {
                if token.is_cancelled() {
                    tracing::debug!("Stopped waiting for task: cancelled");
                    return None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("Task discarded before it ran");
                return None;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

/// Bounded worker pool with a caller-runs overflow policy
pub struct WorkerPool {
    queue_tx: Sender<Arc<dyn Runnable>>,
    queue_rx: Receiver<Arc<dyn Runnable>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
    workers: usize,
}

impl WorkerPool {
    /// Create a pool of `workers`, the submitting thread included
    pub fn new(workers: usize, queue_capacity: usize) -> Result<Self> {
        if workers == 0 {
            return Err(SyncError::config("worker count must be at least 1"));
        }

        let (queue_tx, queue_rx) = bounded::<Arc<dyn Runnable>>(queue_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let halted = Arc::new(AtomicBool::new(false));

        let mut threads = Vec::with_capacity(workers - 1);
        for worker_id in 0..workers - 1 {
            let rx = queue_rx.clone();
            let shutdown = Arc::clone(&shutdown);
            let halted = Arc::clone(&halted);

            let handle = thread::Builder::new()
                .name(format!("treesync-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, rx, shutdown, halted))?;
            threads.push(handle);
        }

        tracing::debug!("Started worker pool: {} background threads", workers - 1);

        Ok(Self {
            queue_tx,
            queue_rx,
            threads: Mutex::new(threads),
            shutdown,
            halted,
            workers,
        })
    }

    /// Whether the pool stopped accepting work
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Submit a task
    ///
    /// Runs the task on the calling thread when the pool has no background
    /// threads or its queue is full. Fails once the pool is shut down.
    pub fn submit<T, F>(&self, job: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(SyncError::PoolShutdown);
        }

        let (result_tx, result_rx) = bounded(1);
        let task = Arc::new(Task {
            pending: Mutex::new(Some((Box::new(job) as Job<T>, result_tx))),
        });
        let handle = TaskHandle {
            task: Arc::clone(&task),
            result_rx,
        };

        if self.workers == 1 {
            task.run();
            return Ok(handle);
        }

        match self.queue_tx.try_send(task as Arc<dyn Runnable>) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) => {
                task.run();
            }
            Err(TrySendError::Disconnected(_)) => return Err(SyncError::PoolShutdown),
        }

        Ok(handle)
    }

    /// Stop accepting new tasks; queued tasks still run
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            tracing::debug!("Worker pool shutting down");
        }
    }

    /// Stop accepting tasks and discard everything still queued
    ///
    /// Tasks already running are not interrupted. Returns how many queued
    /// tasks were discarded.
    pub fn shutdown_now(&self) -> usize {
        self.shutdown();
        self.halted.store(true, Ordering::SeqCst);

        let mut discarded = 0;
        while let Ok(task) = self.queue_rx.try_recv() {
            task.cancel();
            discarded += 1;
        }
        if discarded > 0 {
            tracing::warn!("Discarded {} queued tasks", discarded);
        }
        discarded
    }

    /// Wait up to `grace` for all background threads to exit
    ///
    /// Only meaningful after [`shutdown`](Self::shutdown). Returns whether
    /// every thread finished in time.
    pub fn await_termination(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let finished = {
                let threads = self.threads.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                threads.iter().all(|t| t.is_finished())
            };
            if finished {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    worker_id: usize,
    rx: Receiver<Arc<dyn Runnable>>,
    shutdown: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
) {
    while !halted.load(Ordering::SeqCst) {
        match rx.recv_timeout(WORKER_POLL) {
            Ok(task) => {
                task.run();
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) && rx.is_empty() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::trace!("Worker {} exiting", worker_id);
}
