//! In-process backends: a sequential debug backend and a Rayon-backed
//! multiprocessing-style backend.
//!
//! Neither backend actually forks processes (stable Rust has no portable
//! primitive for that analogous to Python's `multiprocessing`); both run
//! inside the current process. [`LocalMultiprocessBackend`] is named after
//! its Python counterpart because it offers the same operational promise:
//! genuine parallelism across as many workers as requested, isolated from
//! the caller's thread so `submit` never blocks.

use std::fmt;
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::BackendError;

use super::future::Deferred;
use super::{Backend, BackendOptions, SessionHandle};

/// Runs every submitted task synchronously, on the calling thread, inside
/// `submit` itself. Useful for debugging user functions and for tests that
/// need deterministic ordering.
#[derive(Debug, Default)]
pub struct LocalSingleProcessBackend;

impl LocalSingleProcessBackend {
    pub fn new() -> Self {
        LocalSingleProcessBackend
    }
}

impl Backend for LocalSingleProcessBackend {
    fn name(&self) -> &str {
        "local_single_process"
    }

    fn session(&self, _options: BackendOptions) -> SessionHandle {
        SessionHandle::SingleProcess(SingleProcessSession)
    }
}

/// Concrete session kind backing [`LocalSingleProcessBackend`].
pub struct SingleProcessSession;

impl SingleProcessSession {
    pub fn submit<T, F>(&self, task: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    {
        let (deferred, writer) = Deferred::new_pair();
        match task() {
            Ok(value) => writer.resolve_timed(value),
            Err(err) => writer.fail_timed(err),
        }
        deferred
    }

    pub fn concurrency(&self) -> usize {
        1
    }

    pub fn shutdown(&self) {}
}

/// A worker pool backend built on a dedicated [`rayon::ThreadPool`].
///
/// Tasks are dispatched with [`rayon::ThreadPool::spawn`], which returns
/// immediately; the closure runs on one of the pool's worker threads
/// whenever Rayon schedules it. This gives `submit` its required
/// fire-and-forget semantics without reaching for a hand-rolled queue, the
/// same tradeoff `gds::concurrency::virtual_threads::Executor` makes by
/// building on Rayon's scheduler rather than raw `std::thread`.
pub struct LocalMultiprocessBackend {
    pool: Arc<ThreadPool>,
}

impl LocalMultiprocessBackend {
    /// Builds a dedicated pool with `options.max_workers()` threads.
    ///
    /// Returns an error if the underlying `rayon` pool fails to build
    /// (e.g. the requested thread count cannot be satisfied by the OS).
    pub fn new(options: BackendOptions) -> Result<Self, BackendError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.max_workers())
            .thread_name(|i| format!("parfn-worker-{i}"))
            .build()
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;

        Ok(LocalMultiprocessBackend {
            pool: Arc::new(pool),
        })
    }
}

impl fmt::Debug for LocalMultiprocessBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMultiprocessBackend")
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl Backend for LocalMultiprocessBackend {
    fn name(&self) -> &str {
        "local_multiprocessing"
    }

    fn session(&self, _options: BackendOptions) -> SessionHandle {
        SessionHandle::Multiprocess(MultiprocessSession {
            pool: self.pool.clone(),
        })
    }
}

/// Concrete session kind backing [`LocalMultiprocessBackend`].
pub struct MultiprocessSession {
    pool: Arc<ThreadPool>,
}

impl MultiprocessSession {
    pub fn submit<T, F>(&self, task: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    {
        let (deferred, writer) = Deferred::new_pair();
        self.pool.spawn(move || match task() {
            Ok(value) => writer.resolve_timed(value),
            Err(err) => writer.fail_timed(err),
        });
        deferred
    }

    pub fn concurrency(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn single_process_runs_synchronously() {
        let backend = LocalSingleProcessBackend::new();
        let session = backend.session(BackendOptions::fixed(1));
        let deferred = session.submit(|| Ok::<_, BackendError>(5));
        assert_eq!(deferred.wait(None).unwrap(), 5);
    }

    #[test]
    fn single_process_propagates_errors() {
        let backend = LocalSingleProcessBackend::new();
        let session = backend.session(BackendOptions::fixed(1));
        let deferred = session.submit(|| Err::<i32, _>(BackendError::WorkerDied));
        assert!(deferred.wait(None).is_err());
    }

    #[test]
    fn multiprocess_backend_runs_many_tasks() {
        let backend = LocalMultiprocessBackend::new(BackendOptions::fixed(4)).unwrap();
        let session = backend.session(BackendOptions::fixed(4));
        let counter = Arc::new(AtomicUsize::new(0));

        let deferreds: Vec<_> = (0..50)
            .map(|i| {
                let counter = counter.clone();
                session.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BackendError>(i)
                })
            })
            .collect();

        for (i, deferred) in deferreds.into_iter().enumerate() {
            assert_eq!(deferred.wait(Some(Duration::from_secs(5))).unwrap(), i);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn multiprocess_backend_reports_concurrency() {
        let backend = LocalMultiprocessBackend::new(BackendOptions::fixed(3)).unwrap();
        let session = backend.session(BackendOptions::fixed(3));
        assert_eq!(session.concurrency(), 3);
    }
}
