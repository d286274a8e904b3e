//! Dynamic queue model: isolated-memory worker processes draining one
//! shared backlog.
//!
//! [`pfor`] turns a sequential `for` loop into a process-parallel one: the
//! returned iterator forks worker processes on first use, and each worker
//! pulls the next unclaimed element, runs the caller's loop body on it, and
//! comes back for more. The original (parent) process never receives an
//! element: it blocks until every worker has exited, then ends the loop,
//! so code after the loop runs exactly once, in the parent.
//!
//! Workers do not share memory with the parent or each other; the only
//! shared state is the claim cursor. Anything the loop body produces must be
//! accumulated through a process-shared channel the caller sets up, such as
//! an append-mode file or a shared mapping. A body that panics kills only
//! its own worker: the worker names the element it was holding on stderr and
//! exits nonzero, and the parent reports the death coarsely (the original
//! error cannot be recovered across process isolation).

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Options for [`pfor`].
#[derive(Debug, Clone)]
pub struct PforOptions {
    /// Worker processes to fork. Defaults to the number of hardware
    /// execution units.
    pub process_count: Option<usize>,
    /// Render a progress line on stderr, overwritten in place.
    pub show_progress: bool,
    /// Re-render the progress line every this many dequeues per worker.
    pub progress_tick: usize,
    /// Set once your loop body accumulates results through a process-shared
    /// channel; suppresses the one-time reminder and nothing else.
    pub acknowledge_isolation: bool,
    /// External stop signal observed by the parent while it waits; firing it
    /// kills the remaining worker processes outright.
    pub cancel: CancelToken,
}

impl Default for PforOptions {
    fn default() -> Self {
        Self {
            process_count: None,
            show_progress: true,
            progress_tick: 1,
            acknowledge_isolation: false,
            cancel: CancelToken::new(),
        }
    }
}

fn validate(options: &PforOptions) -> Result<()> {
    if options.process_count == Some(0) {
        return Err(Error::Configuration(
            "process count must be at least 1".into(),
        ));
    }
    if options.progress_tick == 0 {
        return Err(Error::Configuration(
            "progress tick must be at least 1".into(),
        ));
    }
    Ok(())
}

#[cfg(unix)]
pub use imp::{Pfor, pfor};

#[cfg(unix)]
mod imp {
    use std::fmt::Debug;
    use std::io::Write;
    use std::num::NonZeroUsize;
    use std::process;
    use std::ptr::NonNull;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, munmap};
    use nix::sys::signal::{Signal, kill};
    use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
    use nix::unistd::{ForkResult, Pid, fork};
    use tracing::{error, warn};

    use super::{PforOptions, validate};
    use crate::cancel::CancelToken;
    use crate::error::{Error, Result};
    use crate::progress::ForkProgress;

    /// One `AtomicUsize` in a shared anonymous mapping: the claim cursor
    /// every worker advances to take the next queued index. `MAP_SHARED`
    /// keeps the same physical word visible on both sides of a fork.
    struct SharedCursor {
        ptr: NonNull<AtomicUsize>,
    }

    impl SharedCursor {
        fn new() -> nix::Result<Self> {
            let length = NonZeroUsize::new(size_of::<AtomicUsize>()).unwrap();
            // SAFETY: fresh anonymous mapping with no address hint; the
            // zero-filled page is a valid AtomicUsize (zero) at any aligned
            // offset, and page alignment exceeds the atomic's.
            let raw = unsafe {
                mmap_anonymous(
                    None,
                    length,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_SHARED,
                )
            }?;
            Ok(Self { ptr: raw.cast() })
        }

        fn value(&self) -> &AtomicUsize {
            // SAFETY: mapping stays valid until Drop; only atomic accesses
            // go through this reference.
            unsafe { self.ptr.as_ref() }
        }

        /// Claim the next index. Each index is handed out exactly once
        /// across all processes; values past the end mean the queue is dry.
        fn claim(&self) -> usize {
            self.value().fetch_add(1, Ordering::SeqCst)
        }

        fn claimed(&self) -> usize {
            self.value().load(Ordering::SeqCst)
        }
    }

    impl Drop for SharedCursor {
        fn drop(&mut self) {
            // SAFETY: created in new() with this exact length; workers exit
            // through process::exit and never run this.
            let _ = unsafe { munmap(self.ptr.cast(), size_of::<AtomicUsize>()) };
        }
    }

    enum Role {
        /// Before the first `next()`: no worker processes exist yet.
        Pending,
        /// The original process, supervising its workers.
        Parent,
        /// A forked worker draining the queue.
        Child,
    }

    /// Lazy, finite, non-restartable sequence of elements handed to forked
    /// workers. Produced by [`pfor`]; drive it with a `for` loop whose body
    /// is the per-element work.
    pub struct Pfor<T> {
        items: Vec<Option<T>>,
        total: usize,
        cursor: SharedCursor,
        process_count: usize,
        tick: usize,
        progress: ForkProgress,
        cancel: CancelToken,
        role: Role,
        dequeues: usize,
        claimed_repr: Option<String>,
    }

    /// Iterate `items` with a pool of forked worker processes.
    ///
    /// The caller's loop body runs inside the workers; see the module docs
    /// for the shared-state obligation this implies. Fails with
    /// [`Error::UnsupportedPlatform`] on hosts without `fork`.
    ///
    /// ```no_run
    /// use parloop::{pfor, PforOptions};
    ///
    /// for x in pfor((0..10).collect(), PforOptions::default())? {
    ///     // Runs in a worker process: publish results through a
    ///     // process-shared channel, not through parent memory.
    ///     let _ = x * x;
    /// }
    /// # Ok::<(), parloop::Error>(())
    /// ```
    pub fn pfor<T: Debug>(items: Vec<T>, options: PforOptions) -> Result<Pfor<T>> {
        validate(&options)?;
        if !options.acknowledge_isolation {
            warn!(
                "pfor workers are isolated processes and do not share memory with the caller; \
                 accumulate loop-body results through a process-shared channel (an append-mode \
                 file, a shared mapping) and set `acknowledge_isolation` once you do"
            );
        }
        let cursor = SharedCursor::new()
            .map_err(|errno| Error::Spawn(format!("cannot map the shared claim cursor: {errno}")))?;
        let total = items.len();
        Ok(Pfor {
            items: items.into_iter().map(Some).collect(),
            total,
            cursor,
            process_count: options.process_count.unwrap_or_else(num_cpus::get),
            tick: options.progress_tick,
            progress: ForkProgress::new(options.show_progress),
            cancel: options.cancel,
            role: Role::Pending,
            dequeues: 0,
            claimed_repr: None,
        })
    }

    impl<T: Debug> Iterator for Pfor<T> {
        type Item = T;

        fn next(&mut self) -> Option<T> {
            match self.role {
                Role::Pending => self.launch(),
                Role::Child => self.claim(),
                Role::Parent => None,
            }
        }
    }

    impl<T: Debug> Pfor<T> {
        /// Fork the workers. Returns the first claimed element when running
        /// in a freshly-forked worker; in the parent it blocks until every
        /// worker has exited, then ends the iteration.
        fn launch(&mut self) -> Option<T> {
            if self.total == 0 {
                self.role = Role::Parent;
                return None;
            }
            self.progress.render(0, self.total);
            let mut workers = Vec::with_capacity(self.process_count);
            for _ in 0..self.process_count {
                // SAFETY: the child touches only its own copied memory, the
                // shared cursor, and stderr, and leaves via process::exit.
                match unsafe { fork() } {
                    Ok(ForkResult::Child) => {
                        self.role = Role::Child;
                        return self.claim();
                    }
                    Ok(ForkResult::Parent { child }) => workers.push(child),
                    Err(errno) => {
                        error!(%errno, "fork failed; continuing with fewer workers");
                    }
                }
            }
            self.role = Role::Parent;
            self.supervise(workers);
            None
        }

        /// Worker side: take the next unclaimed element, or exit when the
        /// queue is dry. Never returns `None`: a worker must not fall
        /// through into the caller's post-loop code.
        fn claim(&mut self) -> Option<T> {
            let index = self.cursor.claim();
            if index >= self.total {
                process::exit(0);
            }
            self.dequeues += 1;
            if self.dequeues % self.tick == 0 {
                self.progress
                    .render(self.cursor.claimed().min(self.total), self.total);
            }
            let Some(item) = self.items[index].take() else {
                // Claims are globally unique, so a hole here means the queue
                // bookkeeping broke; leave rather than re-run an element.
                process::exit(0);
            };
            self.claimed_repr = Some(format!("{item:?}"));
            Some(item)
        }

        /// Parent side: reap workers, killing them first if the cancel token
        /// fires while waiting. Polling keeps the token observable during
        /// the wait.
        fn supervise(&mut self, mut workers: Vec<Pid>) {
            let mut killed = false;
            while !workers.is_empty() {
                if self.cancel.is_cancelled() && !killed {
                    warn!("interrupt received, terminating worker processes");
                    for worker in &workers {
                        let _ = kill(*worker, Signal::SIGKILL);
                    }
                    killed = true;
                }
                workers.retain(|worker| {
                    match waitpid(*worker, Some(WaitPidFlag::WNOHANG)) {
                        Ok(WaitStatus::StillAlive) => true,
                        Ok(WaitStatus::Exited(pid, code)) => {
                            if code != 0 {
                                warn!(
                                    %pid, code,
                                    "worker process died while processing an element; \
                                     the cause cannot be recovered across process isolation"
                                );
                            }
                            false
                        }
                        Ok(WaitStatus::Signaled(pid, signal, _)) => {
                            if !killed {
                                warn!(%pid, %signal, "worker process was killed");
                            }
                            false
                        }
                        Ok(_) => true,
                        Err(_) => false,
                    }
                });
                if !workers.is_empty() {
                    thread::sleep(Duration::from_millis(10));
                }
            }
            self.progress
                .finish(self.cursor.claimed().min(self.total), self.total);
            // After an interrupt, unclaimed elements are expected; only an
            // uninterrupted run with leftovers means every worker died.
            if !killed && self.cursor.claimed() < self.total {
                warn!(
                    remaining = self.total - self.cursor.claimed(),
                    "work queue was not fully drained; all worker processes appear to have died"
                );
            }
        }
    }

    impl<T> Drop for Pfor<T> {
        fn drop(&mut self) {
            if !matches!(self.role, Role::Child) {
                return;
            }
            // A worker only reaches here when the caller's loop ended before
            // the queue did: a panic in the body, or an early break/return.
            if thread::panicking() {
                let item = self.claimed_repr.as_deref().unwrap_or("<unknown>");
                let mut stderr = std::io::stderr();
                let _ = writeln!(stderr, "\nan element failed in a worker process: < {item} >");
                let _ = writeln!(
                    stderr,
                    "the original error cannot be recovered across process isolation; \
                     the worker is terminating"
                );
                let _ = stderr.flush();
                process::exit(70);
            }
            process::exit(0);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn quiet() -> PforOptions {
            PforOptions {
                show_progress: false,
                acknowledge_isolation: true,
                ..Default::default()
            }
        }

        #[test]
        fn cursor_hands_out_consecutive_indices() {
            let cursor = SharedCursor::new().unwrap();
            assert_eq!(cursor.claim(), 0);
            assert_eq!(cursor.claim(), 1);
            assert_eq!(cursor.claimed(), 2);
        }

        #[test]
        fn empty_input_never_forks() {
            let mut it = pfor(Vec::<i32>::new(), quiet()).unwrap();
            assert!(it.next().is_none());
            assert!(it.next().is_none());
        }

        #[test]
        fn zero_processes_is_a_configuration_error() {
            let options = PforOptions {
                process_count: Some(0),
                ..quiet()
            };
            assert!(matches!(
                pfor(vec![1], options),
                Err(Error::Configuration(_))
            ));
        }

        #[test]
        fn zero_tick_is_a_configuration_error() {
            let options = PforOptions {
                progress_tick: 0,
                ..quiet()
            };
            assert!(matches!(
                pfor(vec![1], options),
                Err(Error::Configuration(_))
            ));
        }
    }
}

#[cfg(not(unix))]
pub use stub::{Pfor, pfor};

#[cfg(not(unix))]
mod stub {
    use std::fmt::Debug;
    use std::marker::PhantomData;

    use super::{PforOptions, validate};
    use crate::error::{Error, Result};

    /// Placeholder on hosts without `fork`; [`pfor`] never constructs it.
    pub struct Pfor<T> {
        _items: PhantomData<T>,
    }

    impl<T> Iterator for Pfor<T> {
        type Item = T;

        fn next(&mut self) -> Option<T> {
            None
        }
    }

    /// Isolated process workers need `fork`; this host has no equivalent.
    /// Fails with [`Error::UnsupportedPlatform`] after validating the
    /// options, so configuration mistakes surface the same way everywhere.
    pub fn pfor<T: Debug>(_items: Vec<T>, options: PforOptions) -> Result<Pfor<T>> {
        validate(&options)?;
        Err(Error::UnsupportedPlatform)
    }
}
