//! Terminal progress reporter
//!
//! Renders the engine's listeners with indicatif:
//! - Overall progress bar with the overall status line
//! - Spinner carrying the auxiliary narrative
//! - One bar per worker slot with the file it is handling

use super::listener::{Listeners, ProgressListener, SlotListeners, StatusListener};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

const MAX_PATH_WIDTH: usize = 60;

/// Progress reporter for sync runs
pub struct TerminalReporter {
    /// Multi-progress container
    multi: MultiProgress,
    /// Overall progress
    total: ProgressBar,
    /// Auxiliary status spinner
    aux: ProgressBar,
    /// One bar per worker slot
    slots: Vec<ProgressBar>,
}

impl TerminalReporter {
    /// Create a reporter with one bar per worker
    pub fn new(workers: usize) -> Self {
        let multi = MultiProgress::new();

        let aux = multi.add(ProgressBar::new_spinner());
        aux.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("Invalid template"),
        );
        aux.enable_steady_tick(Duration::from_millis(120));

        let total = multi.add(ProgressBar::new(100));
        total.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .expect("Invalid template")
                .progress_chars("=> "),
        );
        total.set_prefix("Total ");

        let slots = (0..workers)
            .map(|i| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{prefix:.dim} [{bar:20.green/white}] {pos:>3}% {wide_msg}")
                        .expect("Invalid template")
                        .progress_chars("=> "),
                );
                bar.set_prefix(format!("Slot {:<2}", i + 1));
                bar
            })
            .collect();

        Self { multi, total, aux, slots }
    }

    /// Create a reporter that draws nothing (for quiet mode)
    pub fn hidden(workers: usize) -> Self {
        let reporter = Self::new(workers);
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Listeners that feed this reporter
    pub fn listeners(&self, on_completion: impl FnOnce() + Send + 'static) -> Listeners {
        let total_bar = self.total.clone();
        let total_progress: Arc<dyn ProgressListener> =
            Arc::new(move |percent: u8| total_bar.set_position(percent as u64));

        let total_bar = self.total.clone();
        let total_status: Arc<dyn StatusListener> =
            Arc::new(move |msg: &str| total_bar.set_message(msg.to_string()));

        let aux_bar = self.aux.clone();
        let aux_status: Arc<dyn StatusListener> = Arc::new(move |msg: &str| {
            tracing::info!("{}", msg);
            aux_bar.set_message(msg.to_string());
        });

        let file_slots = self
            .slots
            .iter()
            .map(|bar| {
                let status_bar = bar.clone();
                let progress_bar = bar.clone();
                let status: Arc<dyn StatusListener> = Arc::new(move |msg: &str| {
                    status_bar.set_position(0);
                    status_bar.set_message(shorten_path(msg));
                });
                let progress: Arc<dyn ProgressListener> =
                    Arc::new(move |percent: u8| progress_bar.set_position(percent as u64));
                (status, progress) as SlotListeners
            })
            .collect();

        Listeners {
            total_progress,
            total_status,
            aux_status,
            file_slots,
            on_completion: Box::new(on_completion),
        }
    }

    /// Stop all bars, leaving the final message on the status line
    pub fn finish(&self, message: &str) {
        for bar in &self.slots {
            bar.finish_and_clear();
        }
        self.total.finish();
        self.aux.finish_with_message(format!("✓ {}", message));
    }

    /// Stop all bars after a failed or interrupted run
    pub fn abandon(&self, message: &str) {
        for bar in &self.slots {
            bar.finish_and_clear();
        }
        self.total.abandon();
        self.aux.abandon_with_message(format!("✗ {}", message));
    }
}

/// Keep the tail of long paths so the file name stays visible
fn shorten_path(path: &str) -> String {
    let count = path.chars().count();
    if count <= MAX_PATH_WIDTH {
        return path.to_string();
    }
    let tail: String = path.chars().skip(count - (MAX_PATH_WIDTH - 3)).collect();
    format!("...{}", tail)
}
