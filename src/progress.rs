//! Aggregated progress reporting across workers.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use indicatif::{ProgressBar, ProgressStyle};

use crate::cancel::WorkerState;

/// Tracks completion across all workers and renders a single bar on stderr.
///
/// `report` takes one snapshot (`current = sum of processed counts`) and
/// moves the bar under a single lock; callers gate invocations to every Kth
/// element per worker so the lock stays uncontended.
pub(crate) struct ProgressTracker {
    bar: Option<ProgressBar>,
    workers: Vec<Arc<WorkerState>>,
    render: Mutex<()>,
}

impl ProgressTracker {
    pub(crate) fn new(workers: Vec<Arc<WorkerState>>, enabled: bool, show_eta: bool) -> Self {
        let total: usize = workers.iter().map(|w| w.assigned).sum();
        let bar = enabled.then(|| {
            let template = if show_eta {
                "[{bar:40.cyan/blue}] {pos}/{len} ({percent:>3}%) (ETA: {eta})"
            } else {
                "[{bar:40.cyan/blue}] {pos}/{len} ({percent:>3}%)"
            };
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template(template)
                    .unwrap()
                    .progress_chars("█▉▊▋▌▍▎▏  "),
            );
            bar
        });
        Self {
            bar,
            workers,
            render: Mutex::new(()),
        }
    }

    /// Snapshot + render. Safe to call concurrently from any worker.
    pub(crate) fn report(&self) {
        let Some(bar) = &self.bar else { return };
        if let Ok(_guard) = self.render.lock() {
            let current: usize = self
                .workers
                .iter()
                .map(|w| w.processed.load(Ordering::Relaxed))
                .sum();
            bar.set_position(current as u64);
        }
    }

    /// One final render after all workers have stopped, then release the bar.
    pub(crate) fn finish(&self) {
        if let Some(bar) = &self.bar {
            self.report();
            bar.finish();
        }
    }
}

/// Progress line for forked workers. An in-process bar cannot span a fork,
/// so every child re-renders a fixed-width line in place on stderr; the
/// parent renders it one last time after reaping.
#[cfg(unix)]
pub(crate) struct ForkProgress {
    enabled: bool,
}

#[cfg(unix)]
impl ForkProgress {
    const WIDTH: usize = 40;

    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub(crate) fn render(&self, current: usize, total: usize) {
        use std::io::Write;

        if !self.enabled {
            return;
        }
        let ratio = if total == 0 {
            1.0
        } else {
            current as f64 / total as f64
        };
        let filled = ((ratio * Self::WIDTH as f64) as usize).min(Self::WIDTH);
        let line = format!(
            "\r[{:<width$}] {current} / {total} ({:>6.2}%)",
            "#".repeat(filled),
            ratio * 100.0,
            width = Self::WIDTH,
        );
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }

    /// Final render plus the newline that leaves the line behind.
    pub(crate) fn finish(&self, current: usize, total: usize) {
        use std::io::Write;

        if !self.enabled {
            return;
        }
        self.render(current, total);
        let _ = std::io::stderr().write_all(b"\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracker_reports_without_a_bar() {
        let workers = vec![WorkerState::new(2), WorkerState::new(2)];
        let tracker = ProgressTracker::new(workers.clone(), false, true);
        workers[0].processed.fetch_add(2, Ordering::SeqCst);
        tracker.report();
        tracker.finish();
    }

    #[test]
    fn enabled_tracker_tracks_the_processed_sum() {
        let workers = vec![WorkerState::new(5), WorkerState::new(5)];
        let tracker = ProgressTracker::new(workers.clone(), true, false);
        workers[0].processed.fetch_add(3, Ordering::SeqCst);
        workers[1].processed.fetch_add(4, Ordering::SeqCst);
        tracker.report();
        if let Some(bar) = &tracker.bar {
            assert_eq!(bar.position(), 7);
            assert_eq!(bar.length(), Some(10));
        }
        tracker.finish();
    }

    #[cfg(unix)]
    #[test]
    fn disabled_fork_progress_is_silent() {
        let progress = ForkProgress::new(false);
        progress.render(1, 10);
        progress.finish(10, 10);
    }
}
