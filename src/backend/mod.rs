//! Pluggable execution backends.
//!
//! A [`Backend`] owns whatever execution resource a session dispatches
//! tasks onto (a thread pool, a single in-process thread, eventually a
//! remote cluster). It is intentionally small: almost all of its behavior
//! is exposed through a [`SessionHandle`], which is the handle application
//! code actually submits work to.
//!
//! Mirrors the trait-as-abstraction style of
//! `gds::concurrency::pool::PoolSizes`: the trait is the full contract,
//! implementations are swappable at compile time or behind a trait object.
//!
//! [`SessionHandle::submit`] is generic over its task's return type, so it
//! cannot itself live behind `dyn Session` (a generic method is not
//! object-safe). Instead `SessionHandle` is a closed enum over the concrete
//! session kinds this crate ships, and dispatches by hand; `Backend`
//! remains fully dyn-safe since `Backend::session` returns a concrete,
//! non-generic `SessionHandle`.

pub mod future;
pub mod local;

use std::fmt;

use crate::error::BackendError;
use future::Deferred;
use local::{MultiprocessSession, SingleProcessSession};

/// Tunable knobs shared by every backend implementation.
///
/// Grounds on `gds::concurrency::pool::{default, fixed, from_cpu_cores}`:
/// a small set of named constructors rather than a single struct literal,
/// so call sites read as intent ("give me a fixed pool of 8") rather than
/// a field dump.
#[derive(Debug, Clone, Copy)]
pub struct BackendOptions {
    max_workers: usize,
}

impl BackendOptions {
    /// One worker per available CPU core.
    pub fn from_cpu_cores() -> Self {
        BackendOptions {
            max_workers: num_cpus::get().max(1),
        }
    }

    /// A fixed worker count, useful for reproducible benchmarks and tests.
    pub fn fixed(max_workers: usize) -> Self {
        BackendOptions {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self::from_cpu_cores()
    }
}

/// A reference to a value already transmitted once to a session's workers.
///
/// Returned by [`SessionHandle::preload_value`] so a large carried
/// (broadcast) argument can be captured by value in one `submit` closure
/// per chunk without re-cloning the underlying data each time; this local
/// in-process backend family realizes that purely as a cheap `Arc` clone,
/// but the type exists so call sites read the same way against a future
/// backend that genuinely has to ship bytes over a wire once.
pub struct Preloaded<T>(std::sync::Arc<T>);

impl<T> Preloaded<T> {
    pub fn get(&self) -> &T {
        &self.0
    }
}

impl<T> Clone for Preloaded<T> {
    fn clone(&self) -> Self {
        Preloaded(self.0.clone())
    }
}

/// A handle to a running backend, through which tasks are submitted.
///
/// Acquired from a [`Backend`] and dropped (or explicitly
/// [`SessionHandle::shutdown`]) once a [`crate::engine::ParallelFunction`]
/// call finishes. Submitting returns immediately: the returned
/// [`Deferred`] resolves once the task has actually run.
pub enum SessionHandle {
    SingleProcess(SingleProcessSession),
    Multiprocess(MultiprocessSession),
}

impl SessionHandle {
    /// Submits `task` for execution and returns a handle to its eventual result.
    ///
    /// `task` is boxed by the caller's closure because it is submitted
    /// per partition chunk; the backend decides how (and on what thread)
    /// it eventually runs.
    pub fn submit<T, F>(&self, task: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    {
        match self {
            SessionHandle::SingleProcess(s) => s.submit(task),
            SessionHandle::Multiprocess(s) => s.submit(task),
        }
    }

    /// The number of workers this session can run concurrently.
    pub fn concurrency(&self) -> usize {
        match self {
            SessionHandle::SingleProcess(s) => s.concurrency(),
            SessionHandle::Multiprocess(s) => s.concurrency(),
        }
    }

    /// Wraps `value` so it can be captured by every chunk's `submit`
    /// closure without cloning the underlying data per chunk.
    pub fn preload_value<T>(&self, value: T) -> Preloaded<T> {
        Preloaded(std::sync::Arc::new(value))
    }

    /// Whether a task running on this session may itself submit further
    /// tasks to the same backend. Both bundled local backends answer
    /// `false`: a single-process session has no spare worker to submit to,
    /// and a rayon-backed session would deadlock a worker trying to
    /// recursively `spawn` and then block on its own pool. `DelayedValue`
    /// consults this to decide whether nested construction runs in-worker
    /// synchronously instead.
    pub fn allows_nested_tasks(&self) -> bool {
        false
    }

    /// Releases any resources held by this session. Idempotent.
    pub fn shutdown(&self) {
        match self {
            SessionHandle::SingleProcess(s) => s.shutdown(),
            SessionHandle::Multiprocess(s) => s.shutdown(),
        }
    }
}

/// A factory for [`SessionHandle`]s, and the unit of registration in
/// [`crate::registry`].
///
/// Grounds on `gds::core::utils::progress::task_store_provider`'s pattern
/// of a small trait object kept behind a process-wide registry, looked up
/// by name.
pub trait Backend: Send + Sync + fmt::Debug {
    /// A short, stable name used for registry lookups and trace output
    /// (e.g. `"local_single_process"`, `"local_multiprocessing"`).
    fn name(&self) -> &str;

    /// Opens a new session against this backend.
    fn session(&self, options: BackendOptions) -> SessionHandle;

    /// Whether a task running on a session of this backend may itself
    /// submit sub-tasks. Neither bundled local backend supports it; a
    /// future remote-cluster backend is the intended place to answer
    /// `true`.
    fn allows_nested_tasks(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preloaded_value_is_cheaply_cloneable() {
        let backend = local::LocalSingleProcessBackend::new();
        let session = backend.session(BackendOptions::fixed(1));
        let preloaded = session.preload_value(vec![1, 2, 3]);
        let clone = preloaded.clone();
        assert_eq!(preloaded.get(), clone.get());
    }

    #[test]
    fn local_sessions_disallow_nested_tasks() {
        let backend = local::LocalSingleProcessBackend::new();
        let session = backend.session(BackendOptions::fixed(1));
        assert!(!session.allows_nested_tasks());
        assert!(!backend.allows_nested_tasks());
    }
}
