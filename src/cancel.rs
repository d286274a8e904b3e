//! Cancellation plumbing shared between the engine and its workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Cloneable stop signal. Hand a clone to a Ctrl-C handler (or any other
/// thread) and flip it to interrupt a running engine call; workers observe it
/// between elements, so at most one in-flight element completes per worker
/// after the flip.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent; safe from any thread or signal handler.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Controller lifecycle: `Running` until a stop is requested, `Stopping`
/// until the last worker is joined, then `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

/// The shared slice of one worker's state: written by the owning worker,
/// read by the progress tracker and the controller.
#[derive(Debug)]
pub(crate) struct WorkerState {
    pub(crate) running: AtomicBool,
    pub(crate) processed: AtomicUsize,
    pub(crate) assigned: usize,
}

impl WorkerState {
    pub(crate) fn new(assigned: usize) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(true),
            processed: AtomicUsize::new(0),
            assigned,
        })
    }
}

/// Propagates a stop signal to every worker. A stop is requested either by
/// the external [`CancelToken`] or by a worker hitting a non-continuable
/// failure; both paths clear every worker's `running` flag, and workers wind
/// down at their next between-elements check.
pub(crate) struct Controller {
    workers: Vec<Arc<WorkerState>>,
    token: CancelToken,
    phase: AtomicU8,
}

impl Controller {
    pub(crate) fn new(workers: Vec<Arc<WorkerState>>, token: CancelToken) -> Self {
        Self {
            workers,
            token,
            phase: AtomicU8::new(Phase::Running as u8),
        }
    }

    /// True while worker `index` may pick up its next element. Observes the
    /// external token as well, so an interrupt reaches every worker without
    /// the blocked joining thread having to mediate.
    pub(crate) fn keep_going(&self, index: usize) -> bool {
        if self.token.is_cancelled() && self.phase() == Phase::Running {
            self.stop_all();
        }
        self.workers[index].running.load(Ordering::SeqCst)
    }

    /// `Running` -> `Stopping`: clear every worker's `running` flag.
    pub(crate) fn stop_all(&self) {
        let _ = self.phase.compare_exchange(
            Phase::Running as u8,
            Phase::Stopping as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        for worker in &self.workers {
            worker.running.store(false, Ordering::SeqCst);
        }
    }

    /// `Stopping` -> `Stopped`, once every worker has been joined. Also the
    /// terminal transition of an uncancelled run.
    pub(crate) fn mark_stopped(&self) {
        self.phase.store(Phase::Stopped as u8, Ordering::SeqCst);
    }

    pub(crate) fn phase(&self) -> Phase {
        match self.phase.load(Ordering::SeqCst) {
            0 => Phase::Running,
            1 => Phase::Stopping,
            _ => Phase::Stopped,
        }
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.token.is_cancelled()
    }
}
