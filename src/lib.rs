//! `parfn` — data-parallel function execution.
//!
//! Turns an ordinary function into one that transparently partitions its
//! input, dispatches the partitions across a pool of workers
//! ([`backend`]), and folds the partial results back together
//! ([`engine`]), while an online estimator ([`estimator`]) learns the
//! partition size that keeps each chunk's wall time above a configured
//! floor without over-partitioning. A separate, orthogonal
//! [`delayed`]-value engine builds lazily-evaluated task graphs with
//! transparent dependencies, independent of partitioning.
//!
//! Start with [`engine::ParallelFunction::builder`] to wrap a function,
//! [`delayed::delayed`] to build a deferred value, and
//! [`registry::install_backend_by_name`] (or [`registry::install_backend`])
//! to pick a worker pool before making either kind of call. When a
//! function takes more than one partitioned argument, [`split::zipped`]
//! handles two and [`per_argument!`] handles any number.

pub mod backend;
pub mod config;
pub mod delayed;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod partition;
pub mod registry;
pub mod split;
pub mod trace;

pub use backend::{Backend, BackendOptions, Preloaded, SessionHandle};
pub use backend::future::{Deferred, DeferredOutcome, DeferredWriter};
pub use config::{ParallelConfig, ParallelConfigBuilder};
pub use delayed::{delayed, DelayedValue};
pub use engine::{ParallelFunction, ParallelFunctionBuilder};
pub use error::{BackendError, EngineError, EstimatorError, ParfnError, SplitError, WaitError};
pub use estimator::{EstimatorState, PartitionSizeEstimator};
pub use partition::{Chunked, PartitionChunk, PartitionGenerator, Zip};
pub use registry::{
    current_backend, install_backend, install_backend_by_name, is_inside_task,
    register_backend_factory, scoped_install_backend, ScopedBackend,
};
pub use split::{all_arguments, by_chunk, per_argument_of, zipped};
pub use trace::{ChunkOutcome, ChunkRecord, ChunkTrace};
