//! Online partition-size estimation.
//!
//! Mirrors `gds::concurrency::parallel_util::BatchUtil`'s role of turning a
//! workload size into a batch size, but where `BatchUtil` computes a
//! one-shot static size from known input length, a
//! [`PartitionSizeEstimator`] learns from observed `(size, duration)`
//! samples across calls, the way a feedback controller tunes itself from
//! its own output.

pub mod fixed;
pub mod linear_regression;

use std::time::Duration;

/// Where an estimator sits in its learning lifecycle.
///
/// Exposed mainly for tracing/diagnostics (`log::debug!` at state
/// transitions); callers normally just drive the estimator through
/// [`PartitionSizeEstimator::next_size`] / `observe` without inspecting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorState {
    /// Fewer than the configured minimum number of samples: emits the
    /// configured initial size verbatim.
    Cold,
    /// Enough samples to fit a trend, but the fit is not yet trusted:
    /// emits the fitted optimum perturbed to probe the response surface.
    Learning,
    /// The fit's relative standard error is below the convergence
    /// threshold: emits the fitted optimum unperturbed.
    Converged,
}

/// A pluggable policy for choosing the next partition size.
///
/// Implementations are expected to be cheap to call and are driven
/// entirely by the engine: `next_size` is asked for a size before a chunk
/// is requested from the partition generator, and `observe` is fed back
/// the chunk's actual size and measured duration once it completes.
pub trait PartitionSizeEstimator: Send {
    /// Returns the partition size to request next.
    fn next_size(&mut self) -> usize;

    /// Feeds back an observed `(size, duration)` sample.
    fn observe(&mut self, size: usize, duration: Duration);

    /// The estimator's current lifecycle state, for diagnostics.
    fn state(&self) -> EstimatorState;
}
