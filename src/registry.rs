//! Process-wide backend registry.
//!
//! Grounds on `gds::core::utils::progress::task_store_provider::TaskStoreHolder`:
//! a `Lazy<Mutex<...>>` global, looked up and mutated behind a single lock
//! so creation races are trivially avoided. `TaskStoreHolder` keys its map
//! by database name; this registry instead keeps a single *current*
//! backend (there is exactly one active parallel backend per process at a
//! time), plus a named catalog of backend factories so callers can install
//! one by name as the Python API does with `set_parallel_backend("name")`.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::backend::local::{LocalMultiprocessBackend, LocalSingleProcessBackend};
use crate::backend::{Backend, BackendOptions};
use crate::error::ParfnError;

type BackendFactory = Arc<dyn Fn(BackendOptions) -> Result<Arc<dyn Backend>, ParfnError> + Send + Sync>;

struct RegistryState {
    current: Option<Arc<dyn Backend>>,
    factories: HashMap<String, BackendFactory>,
}

static REGISTRY: Lazy<Mutex<RegistryState>> = Lazy::new(|| {
    let mut factories: HashMap<String, BackendFactory> = HashMap::new();
    factories.insert(
        "local_single_process".to_string(),
        Arc::new(|_options| Ok(Arc::new(LocalSingleProcessBackend::new()) as Arc<dyn Backend>)),
    );
    factories.insert(
        "local_multiprocessing".to_string(),
        Arc::new(|options| {
            LocalMultiprocessBackend::new(options)
                .map(|b| Arc::new(b) as Arc<dyn Backend>)
                .map_err(ParfnError::Backend)
        }),
    );
    Mutex::new(RegistryState {
        current: None,
        factories,
    })
});

thread_local! {
    /// Whether the calling thread is already running inside a submitted
    /// task. The engine consults this to detect nested `parallel`-decorated
    /// calls so it can fall back to sequential execution instead of trying
    /// to resubmit work to a backend whose workers are themselves blocked
    /// waiting on results (the Python "nested parallelism" guard).
    static INSIDE_TASK: Cell<bool> = const { Cell::new(false) };
}

/// Registers a named backend factory, making it available to
/// [`install_backend_by_name`].
///
/// Built-in factories `"local_single_process"` and `"local_multiprocessing"`
/// are always registered; this is for callers adding their own backend
/// kinds.
pub fn register_backend_factory<F>(name: impl Into<String>, factory: F)
where
    F: Fn(BackendOptions) -> Result<Arc<dyn Backend>, ParfnError> + Send + Sync + 'static,
{
    REGISTRY
        .lock()
        .factories
        .insert(name.into(), Arc::new(factory));
}

/// Installs a backend, by name, as the process-wide current backend.
pub fn install_backend_by_name(name: &str, options: BackendOptions) -> Result<(), ParfnError> {
    let factory = {
        let guard = REGISTRY.lock();
        guard
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| ParfnError::Registry(format!("no backend registered as `{name}`")))?
    };
    let backend = factory(options)?;
    install_backend(backend);
    Ok(())
}

/// Installs an already-constructed backend as the process-wide current backend.
pub fn install_backend(backend: Arc<dyn Backend>) {
    REGISTRY.lock().current = Some(backend);
}

/// Returns the currently installed backend, if any.
pub fn current_backend() -> Option<Arc<dyn Backend>> {
    REGISTRY.lock().current.clone()
}

/// Runs `f` with `backend` temporarily installed as current, restoring
/// whatever was installed before on return (even if `f` panics).
///
/// Mirrors the Python `set_parallel_backend_context` context manager.
pub struct ScopedBackend {
    previous: Option<Arc<dyn Backend>>,
}

impl ScopedBackend {
    pub fn install(backend: Arc<dyn Backend>) -> Self {
        let previous = {
            let mut guard = REGISTRY.lock();
            std::mem::replace(&mut guard.current, Some(backend))
        };
        ScopedBackend { previous }
    }

    pub fn install_by_name(name: &str, options: BackendOptions) -> Result<Self, ParfnError> {
        let factory = {
            let guard = REGISTRY.lock();
            guard
                .factories
                .get(name)
                .cloned()
                .ok_or_else(|| ParfnError::Registry(format!("no backend registered as `{name}`")))?
        };
        let backend = factory(options)?;
        Ok(Self::install(backend))
    }
}

impl Drop for ScopedBackend {
    fn drop(&mut self) {
        REGISTRY.lock().current = self.previous.take();
    }
}

/// Installs `backend` as current for the dynamic extent of `f`, restoring
/// whatever was previously installed on return, including when `f` panics.
///
/// Mirrors the Python `set_parallel_backend_context` context manager; the
/// restoration guarantee here comes from [`ScopedBackend`]'s `Drop` impl
/// rather than a `try`/`finally`.
pub fn scoped_install_backend<R>(backend: Arc<dyn Backend>, f: impl FnOnce() -> R) -> R {
    let _scope = ScopedBackend::install(backend);
    f()
}

/// Runs `f` with the current thread marked as executing inside a submitted
/// task, restoring the previous marker afterward.
pub fn run_marked_inside_task<R>(f: impl FnOnce() -> R) -> R {
    let previous = INSIDE_TASK.with(|cell| cell.replace(true));
    let result = f();
    INSIDE_TASK.with(|cell| cell.set(previous));
    result
}

/// Whether the calling thread is already running inside a submitted task.
pub fn is_inside_task() -> bool {
    INSIDE_TASK.with(|cell| cell.get())
}

/// Serializes tests (in this module and in [`crate::engine`]) that mutate
/// the process-wide current backend, the same way the teacher's own
/// `TaskStoreHolder` tests isolate themselves from one another by distinct
/// database names — here there is only one "current" slot, so tests take
/// a lock instead.
#[cfg(test)]
pub(crate) static TEST_LOCK: Mutex<()> = Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn scoped_backend_restores_previous_on_drop() {
        let _guard = TEST_LOCK.lock();
        install_backend(Arc::new(LocalSingleProcessBackend::new()));
        assert_eq!(current_backend().unwrap().name(), "local_single_process");

        {
            let multi = LocalMultiprocessBackend::new(BackendOptions::fixed(2)).unwrap();
            let _scope = ScopedBackend::install(Arc::new(multi));
            assert_eq!(current_backend().unwrap().name(), "local_multiprocessing");
        }

        assert_eq!(current_backend().unwrap().name(), "local_single_process");
    }

    #[test]
    fn install_by_name_uses_registered_factory() {
        let _guard = TEST_LOCK.lock();
        install_backend_by_name("local_single_process", BackendOptions::default()).unwrap();
        assert_eq!(current_backend().unwrap().name(), "local_single_process");
    }

    #[test]
    fn unknown_backend_name_is_an_error() {
        let _guard = TEST_LOCK.lock();
        let result = install_backend_by_name("does_not_exist", BackendOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn custom_factory_can_be_registered() {
        let _guard = TEST_LOCK.lock();
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        register_backend_factory("counting_single_process", |_options| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(LocalSingleProcessBackend::new()) as Arc<dyn Backend>)
        });

        install_backend_by_name("counting_single_process", BackendOptions::default()).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scoped_install_backend_restores_even_on_panic() {
        let _guard = TEST_LOCK.lock();
        install_backend(Arc::new(LocalSingleProcessBackend::new()));

        let multi = LocalMultiprocessBackend::new(BackendOptions::fixed(2)).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scoped_install_backend(Arc::new(multi), || {
                assert_eq!(current_backend().unwrap().name(), "local_multiprocessing");
                panic!("boom");
            })
        }));
        assert!(result.is_err());
        assert_eq!(current_backend().unwrap().name(), "local_single_process");
    }

    #[test]
    fn nested_task_marker_is_thread_local_and_restored() {
        assert!(!is_inside_task());
        run_marked_inside_task(|| {
            assert!(is_inside_task());
        });
        assert!(!is_inside_task());
    }
}
