//! Static partition model: shared-memory worker threads over fixed chunks.
//!
//! The input is split up front into per-worker partitions; each worker
//! processes its partition strictly in order, so concatenating the worker
//! results in worker order reproduces the sequential output.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::warn;

use crate::cancel::{CancelToken, Controller, WorkerState};
use crate::error::{Error, Result};
use crate::partition;
use crate::progress::ProgressTracker;

/// What to do when the user function fails on an element.
#[derive(Debug, Clone)]
pub enum ErrorPolicy<R> {
    /// First failure cancels all workers and is re-raised after the join.
    Halt,
    /// Substitute the sentinel for the failed element, emit a warning naming
    /// it, and keep going.
    Continue { sentinel: R },
}

/// Options for [`parallelize`] and [`parallelize_keyed`].
#[derive(Debug, Clone)]
pub struct ParallelizeOptions<R> {
    /// Worker threads to spawn. Defaults to the number of hardware execution
    /// units.
    pub worker_count: Option<usize>,
    /// Render a progress bar on stderr.
    pub show_progress: bool,
    /// Report progress every this many processed elements per worker.
    pub progress_tick: usize,
    pub on_error: ErrorPolicy<R>,
    /// Append an estimated-time-remaining figure to the progress line.
    pub show_eta: bool,
    /// External stop signal; flip it from any thread to interrupt the run.
    pub cancel: CancelToken,
}

impl<R> Default for ParallelizeOptions<R> {
    fn default() -> Self {
        Self {
            worker_count: None,
            show_progress: true,
            progress_tick: 1,
            on_error: ErrorPolicy::Halt,
            show_eta: true,
            cancel: CancelToken::new(),
        }
    }
}

/// Failure captured inside a worker, held until every worker has been joined.
struct CapturedFailure {
    worker: usize,
    item: String,
    source: anyhow::Error,
}

struct WorkerOutput<R> {
    results: Vec<R>,
    failure: Option<CapturedFailure>,
}

/// Apply `fun` to every element of `items` across parallel worker threads and
/// return the results in the original element order.
///
/// Equivalent to `items.iter().map(fun).collect()` with the loop body spread
/// over threads: each worker owns one contiguous partition and processes it
/// in order. Failures follow [`ErrorPolicy`]; an external interrupt through
/// the cancel token stops every worker at its next element boundary and
/// surfaces as [`Error::Interrupted`] once all workers have been joined.
///
/// ```
/// use parloop::{parallelize, ParallelizeOptions};
///
/// let squares = parallelize(
///     vec![1, 2, 3, 4],
///     |x| Ok(x * x),
///     ParallelizeOptions { show_progress: false, ..Default::default() },
/// )?;
/// assert_eq!(squares, vec![1, 4, 9, 16]);
/// # Ok::<(), parloop::Error>(())
/// ```
pub fn parallelize<T, R, F>(items: Vec<T>, fun: F, options: ParallelizeOptions<R>) -> Result<Vec<R>>
where
    T: Send + Debug,
    R: Send + Clone,
    F: Fn(&T) -> anyhow::Result<R> + Sync,
{
    validate(&options)?;
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let ParallelizeOptions {
        worker_count,
        show_progress,
        progress_tick,
        on_error,
        show_eta,
        cancel,
    } = options;

    let total = items.len();
    let worker_count = worker_count.unwrap_or_else(num_cpus::get);
    let partitions = partition::split(items, worker_count)?;

    let states: Vec<Arc<WorkerState>> = partitions
        .iter()
        .map(|chunk| WorkerState::new(chunk.len()))
        .collect();
    let controller = Arc::new(Controller::new(states.clone(), cancel));
    let progress = Arc::new(ProgressTracker::new(
        states.clone(),
        show_progress,
        show_eta,
    ));

    let outputs = crossbeam::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(partitions.len());
        for (index, chunk) in partitions.into_iter().enumerate() {
            let state = states[index].clone();
            let controller = controller.clone();
            let progress = progress.clone();
            let policy = on_error.clone();
            let fun = &fun;
            handles.push(scope.spawn(move |_| {
                worker_loop(
                    index,
                    chunk,
                    fun,
                    &policy,
                    progress_tick,
                    &state,
                    &controller,
                    &progress,
                )
            }));
        }
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<std::result::Result<Vec<_>, _>>()
    })
    .map_err(|_| Error::WorkerPanic)?
    .map_err(|_| Error::WorkerPanic)?;

    controller.mark_stopped();
    progress.finish();

    // Joined in worker order, so the first capture seen is the
    // lowest-indexed worker's.
    let mut results = Vec::with_capacity(total);
    let mut first_failure = None;
    for output in outputs {
        if first_failure.is_none() {
            first_failure = output.failure;
        }
        results.extend(output.results);
    }

    if let Some(failure) = first_failure {
        return Err(Error::Captured {
            item: failure.item,
            worker: failure.worker,
            cause: failure.source,
        });
    }
    if controller.interrupted() {
        return Err(Error::Interrupted);
    }
    Ok(results)
}

/// [`parallelize`] over `(key, value)` pairs: the function sees each value,
/// and every key is re-attached to its position on output, so an ordered
/// index on the input survives onto the result.
pub fn parallelize_keyed<K, T, R, F>(
    items: Vec<(K, T)>,
    fun: F,
    options: ParallelizeOptions<R>,
) -> Result<Vec<(K, R)>>
where
    K: Send,
    T: Send + Debug,
    R: Send + Clone,
    F: Fn(&T) -> anyhow::Result<R> + Sync,
{
    let (keys, values): (Vec<K>, Vec<T>) = items.into_iter().unzip();
    let results = parallelize(values, fun, options)?;
    Ok(keys.into_iter().zip(results).collect())
}

fn validate<R>(options: &ParallelizeOptions<R>) -> Result<()> {
    if options.worker_count == Some(0) {
        return Err(Error::Configuration(
            "worker count must be at least 1".into(),
        ));
    }
    if options.progress_tick == 0 {
        return Err(Error::Configuration(
            "progress tick must be at least 1".into(),
        ));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn worker_loop<T, R, F>(
    index: usize,
    chunk: Vec<T>,
    fun: &F,
    policy: &ErrorPolicy<R>,
    tick: usize,
    state: &WorkerState,
    controller: &Controller,
    progress: &ProgressTracker,
) -> WorkerOutput<R>
where
    T: Debug,
    R: Clone,
    F: Fn(&T) -> anyhow::Result<R>,
{
    let mut results = Vec::with_capacity(chunk.len());
    let mut failure = None;

    for item in &chunk {
        // Stop flag is checked between elements only: one in-flight element
        // always completes (or fails) before the worker exits.
        if !controller.keep_going(index) {
            break;
        }
        match fun(item) {
            Ok(value) => results.push(value),
            Err(error) => match policy {
                ErrorPolicy::Continue { sentinel } => {
                    warn!(item = ?item, error = %error, "element failed, substituting sentinel");
                    results.push(sentinel.clone());
                }
                ErrorPolicy::Halt => {
                    failure = Some(CapturedFailure {
                        worker: index,
                        item: format!("{item:?}"),
                        source: error,
                    });
                    controller.stop_all();
                    break;
                }
            },
        }
        let processed = state.processed.fetch_add(1, Ordering::SeqCst) + 1;
        if processed % tick == 0 {
            progress.report();
        }
    }

    state.running.store(false, Ordering::SeqCst);
    WorkerOutput { results, failure }
}
