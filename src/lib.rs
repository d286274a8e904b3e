//! # parloop: parallelize an existing sequential loop
//!
//! Take a loop you already have, keep its body and its output, and spread
//! the iterations over concurrent workers. Results come back in the original
//! element order, a progress bar tracks completion, and cancellation and
//! per-element failure have precise, documented semantics.
//!
//! Two scheduling models are provided:
//!
//! - **Static partition model**: [`parallelize`] splits the input up front
//!   into near-even chunks, one per shared-memory worker thread, and returns
//!   the ordered results. This is the model to reach for first.
//! - **Dynamic queue model**: [`pfor`] forks isolated-memory worker
//!   processes that drain one shared backlog on demand, yielding each
//!   element into the caller's own loop body. Unix only.
//!
//! ## Static model
//!
//! ```
//! use parloop::{parallelize, ErrorPolicy, ParallelizeOptions};
//!
//! // Same output as `items.iter().map(...)`, computed on all cores.
//! let results = parallelize(
//!     vec![1, 2, 0, 5],
//!     |x| {
//!         if *x == 0 {
//!             anyhow::bail!("division by zero")
//!         } else {
//!             Ok(10 / *x)
//!         }
//!     },
//!     ParallelizeOptions {
//!         on_error: ErrorPolicy::Continue { sentinel: -1 },
//!         show_progress: false,
//!         ..Default::default()
//!     },
//! )?;
//! assert_eq!(results, vec![10, 5, -1, 2]);
//! # Ok::<(), parloop::Error>(())
//! ```
//!
//! With [`ErrorPolicy::Halt`] (the default) the first failure cancels every
//! worker and comes back as [`Error::Captured`] once all of them have been
//! joined. A [`CancelToken`] clone handed to a Ctrl-C handler interrupts a
//! run the same cooperative way and surfaces as [`Error::Interrupted`].
//!
//! ## Dynamic model
//!
//! ```no_run
//! use parloop::{pfor, PforOptions};
//!
//! for x in pfor((0..100).collect(), PforOptions::default())? {
//!     // This body runs inside forked worker processes. Anything it
//!     // produces must leave through a process-shared channel (an
//!     // append-mode file, a shared mapping); worker memory is gone when
//!     // the worker exits.
//!     let _ = x * x;
//! }
//! // Runs once, in the parent, after every worker has exited.
//! # Ok::<(), parloop::Error>(())
//! ```
//!
//! A worker whose body panics dies alone: the element it held is named on
//! stderr, the remaining workers keep draining the queue, and the parent
//! reports the death coarsely, since process isolation makes the original
//! error unrecoverable. This is a weaker failure-reporting guarantee than the
//! static model's and a documented part of the contract.
//!
//! Diagnostics (failed elements, worker deaths, an undrained queue) are
//! emitted as `tracing` events; install any subscriber to see them.

mod cancel;
mod error;
mod forked;
mod progress;
mod threaded;

pub mod partition;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use forked::{Pfor, PforOptions, pfor};
pub use threaded::{ErrorPolicy, ParallelizeOptions, parallelize, parallelize_keyed};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
