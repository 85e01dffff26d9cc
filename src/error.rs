//! Crate-wide error taxonomy.
//!
//! Each subsystem defines its own error type; `ParfnError` is the umbrella
//! enum returned by the top-level engine and deferred-value entry points.

use thiserror::Error;

/// Errors surfaced by a [`crate::backend::Backend`] or [`crate::backend::Session`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// The pool has been torn down and can no longer accept work.
    #[error("backend is unavailable: {0}")]
    Unavailable(String),

    /// The worker executing the task died (panicked) before completing it.
    #[error("worker died while executing the task")]
    WorkerDied,

    /// The user-supplied function returned an error.
    #[error("task raised an error: {0}")]
    TaskRaised(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The session was torn down before the task completed.
    #[error("task was cancelled")]
    Cancelled,
}

impl BackendError {
    /// Wraps an arbitrary user error as a [`BackendError::TaskRaised`],
    /// preserving its message and source chain.
    pub fn task_raised<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BackendError::TaskRaised(Box::new(err))
    }
}

/// Errors surfaced while waiting on a [`crate::backend::future::Deferred`].
#[derive(Debug, Error)]
pub enum WaitError {
    /// The wait exceeded the provided timeout without the deferred completing.
    #[error("timed out waiting for the deferred result")]
    Timeout,

    /// The task itself failed; the inner error is the original cause.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors surfaced by the argument-splitter combinators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SplitError {
    /// Two per-argument generators disagreed on the remaining length at the tail.
    #[error(
        "partition mismatch: argument `{arg_a}` yielded {len_a} items but `{arg_b}` yielded {len_b}"
    )]
    PartitionMismatch {
        arg_a: String,
        len_a: usize,
        arg_b: String,
        len_b: usize,
    },

    /// A generator yielded a zero-sized chunk that was not the terminal signal.
    #[error("partition generator for `{arg}` yielded a zero-sized non-terminal chunk")]
    EmptyChunk { arg: String },
}

/// Errors surfaced by the partition-size estimator.
///
/// These are recovered internally by the estimator (it reverts to the last
/// known-good size and logs a warning); they are exposed publicly only so
/// that callers building custom [`crate::estimator::PartitionSizeEstimator`]
/// implementations have a shared vocabulary for degeneracy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimatorError {
    /// The least-squares fit was singular (e.g. all samples share one partition size).
    #[error("partition-size fit is singular: {0}")]
    SingularFit(String),
}

/// Errors surfaced by the parallel-function engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Top-level error type returned by [`crate::engine::ParallelFunction`] and
/// [`crate::delayed::DelayedValue`] entry points.
#[derive(Debug, Error)]
pub enum ParfnError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("backend registry error: {0}")]
    Registry(String),
}
