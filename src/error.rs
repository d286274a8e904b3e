//! Error types for parloop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected synchronously, before any worker started.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The user function failed on an element while the halt policy was
    /// active. Captured by the failing worker and re-raised only after every
    /// worker has been joined; when several workers fail concurrently, the
    /// lowest-indexed worker's capture is the one re-raised.
    #[error("element {item} failed in worker {worker}: {cause:#}")]
    Captured {
        item: String,
        worker: usize,
        cause: anyhow::Error,
    },

    /// Process workers need a fork-capable host.
    #[error("isolated process workers are not supported on this platform; use `parallelize` instead")]
    UnsupportedPlatform,

    /// Process-worker plumbing failed before any element was handed out.
    #[error("cannot start process workers: {0}")]
    Spawn(String),

    /// The cancel token fired while workers were running. Returned only once
    /// every worker has observed the stop signal and been joined.
    #[error("execution interrupted before all elements were processed")]
    Interrupted,

    /// A worker thread panicked outside the error channel.
    #[error("a worker thread panicked during parallel execution")]
    WorkerPanic,
}

pub type Result<T> = std::result::Result<T, Error>;
