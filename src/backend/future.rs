//! A future carrying a task's result alongside a duration measurement.
//!
//! Mirrors the "set duration before triggering completion" contract of the
//! profiled future this crate's backend abstraction is built around: the
//! duration is always visible to waiters and completion callbacks by the
//! time they observe the terminal state.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{BackendError, WaitError};

/// The terminal outcome of a [`Deferred`].
#[derive(Debug)]
pub enum DeferredOutcome<T> {
    Resolved(T),
    Failed(BackendError),
}

impl<T> DeferredOutcome<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, DeferredOutcome::Resolved(_))
    }
}

type Callback<T> = Box<dyn FnOnce(&DeferredOutcome<T>) + Send>;

enum State<T> {
    Pending { callbacks: Vec<Callback<T>> },
    Done,
    /// The terminal value has already been taken out by `wait`.
    Taken,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    outcome: Mutex<Option<DeferredOutcome<T>>>,
    duration: Mutex<Option<Duration>>,
    cond: Condvar,
}

/// A not-yet-computed value returned by [`crate::backend::Session::submit`].
///
/// `Deferred` is consumed by [`Deferred::wait`]: once the value has been
/// taken out, subsequent waits observe [`BackendError::Cancelled`]. This
/// mirrors how the engine uses each deferred exactly once per chunk; code
/// that needs to read a resolved value repeatedly (such as
/// [`crate::delayed::DelayedValue`]) caches it above this type.
pub struct Deferred<T> {
    shared: std::sync::Arc<Shared<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred {
            shared: self.shared.clone(),
        }
    }
}

/// The writer side of a [`Deferred`], held by whichever worker computes the value.
pub struct DeferredWriter<T> {
    shared: std::sync::Arc<Shared<T>>,
    submitted_at: Instant,
}

impl<T: Send + 'static> Deferred<T> {
    /// Creates a linked `(Deferred, DeferredWriter)` pair.
    pub fn new_pair() -> (Deferred<T>, DeferredWriter<T>) {
        let shared = std::sync::Arc::new(Shared {
            state: Mutex::new(State::Pending {
                callbacks: Vec::new(),
            }),
            outcome: Mutex::new(None),
            duration: Mutex::new(None),
            cond: Condvar::new(),
        });
        let submitted_at = Instant::now();
        (
            Deferred {
                shared: shared.clone(),
            },
            DeferredWriter {
                shared,
                submitted_at,
            },
        )
    }

    /// Creates a [`Deferred`] that is already resolved, for backends with no
    /// real asynchrony (e.g. the sequential debug backend).
    pub fn ready(value: T, duration: Duration) -> Self {
        let (deferred, writer) = Self::new_pair();
        writer.resolve(value, Some(duration));
        deferred
    }

    /// Blocks until the deferred completes (or the timeout elapses), then
    /// returns the value, consuming it.
    ///
    /// Calling `wait` a second time on the same `Deferred` (including a
    /// clone) after the value has been taken returns
    /// [`WaitError::Backend`]`(`[`BackendError::Cancelled`]`)`.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<T, WaitError> {
        let mut guard = self.shared.state.lock();
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            match &*guard {
                State::Done => break,
                State::Taken => return Err(WaitError::Backend(BackendError::Cancelled)),
                State::Pending { .. } => {}
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(WaitError::Timeout);
                    }
                    let timed_out = self.shared.cond.wait_for(&mut guard, deadline - now);
                    if timed_out.timed_out() {
                        if matches!(&*guard, State::Pending { .. }) {
                            return Err(WaitError::Timeout);
                        }
                    }
                }
                None => self.shared.cond.wait(&mut guard),
            }
        }

        *guard = State::Taken;
        drop(guard);

        match self.shared.outcome.lock().take() {
            Some(DeferredOutcome::Resolved(value)) => Ok(value),
            Some(DeferredOutcome::Failed(err)) => Err(WaitError::Backend(err)),
            None => Err(WaitError::Backend(BackendError::Cancelled)),
        }
    }

    /// Blocks until completion (or timeout), returning both the value and
    /// its measured duration in one wait instead of two.
    pub fn wait_both(&self, timeout: Option<Duration>) -> Result<(T, Option<Duration>), WaitError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let value = self.wait(timeout)?;
        let duration = self.wait_duration(deadline.map(|d| d.saturating_duration_since(Instant::now())));
        Ok((value, duration))
    }

    /// Returns the measured duration, blocking until completion (or timeout).
    pub fn wait_duration(&self, timeout: Option<Duration>) -> Option<Duration> {
        let mut guard = self.shared.state.lock();
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            if !matches!(&*guard, State::Pending { .. }) {
                break;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.shared.cond.wait_for(&mut guard, deadline - now);
                }
                None => self.shared.cond.wait(&mut guard),
            }
        }

        *self.shared.duration.lock()
    }

    /// Whether the deferred has reached a terminal state.
    pub fn is_done(&self) -> bool {
        !matches!(&*self.shared.state.lock(), State::Pending { .. })
    }

    /// Registers a callback that fires once, in the completing thread, after
    /// the duration has been recorded. Callbacks run in FIFO registration
    /// order. If the deferred is already done, the callback is dropped
    /// silently (there is no outcome left to hand it, since `wait` may have
    /// already taken it) — register callbacks before waiting.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&DeferredOutcome<T>) + Send + 'static,
    {
        let mut guard = self.shared.state.lock();
        if let State::Pending { callbacks } = &mut *guard {
            callbacks.push(Box::new(f));
        }
    }
}

impl<T: Send + 'static> DeferredWriter<T> {
    /// Resolves the deferred successfully.
    ///
    /// `duration` is written before the state transition, satisfying the
    /// contract that waiters/callbacks never observe a terminal state with
    /// a stale duration.
    pub fn resolve(self, value: T, duration: Option<Duration>) {
        self.complete(DeferredOutcome::Resolved(value), duration);
    }

    /// Fails the deferred.
    pub fn fail(self, error: BackendError, duration: Option<Duration>) {
        self.complete(DeferredOutcome::Failed(error), duration);
    }

    /// Convenience: resolve/fail using the elapsed wall-clock time since submission.
    pub fn resolve_timed(self, value: T) {
        let elapsed = self.submitted_at.elapsed();
        self.resolve(value, Some(elapsed));
    }

    pub fn fail_timed(self, error: BackendError) {
        let elapsed = self.submitted_at.elapsed();
        self.fail(error, Some(elapsed));
    }

    fn complete(self, outcome: DeferredOutcome<T>, duration: Option<Duration>) {
        *self.shared.duration.lock() = duration;

        let mut guard = self.shared.state.lock();
        let callbacks = match std::mem::replace(&mut *guard, State::Done) {
            State::Pending { callbacks } => callbacks,
            other => {
                // Already completed or taken: put it back, this writer is redundant.
                *guard = other;
                return;
            }
        };
        *self.shared.outcome.lock() = Some(outcome);

        // Fire callbacks while still holding the state lock: `wait()` also
        // locks `state` before it will `take()` the outcome, so a waiter
        // cannot empty the outcome slot out from under these callbacks
        // until this guard is dropped, which only happens after every
        // callback has run and `notify_all` has been issued.
        {
            let outcome_guard = self.shared.outcome.lock();
            if let Some(outcome_ref) = outcome_guard.as_ref() {
                for cb in callbacks {
                    cb(outcome_ref);
                }
            }
        }

        self.shared.cond.notify_all();
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_done() { "done" } else { "pending" };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn resolves_and_waits() {
        let (deferred, writer) = Deferred::<i32>::new_pair();
        writer.resolve(42, Some(Duration::from_millis(1)));
        assert_eq!(deferred.wait(None).unwrap(), 42);
    }

    #[test]
    fn fails_and_waits() {
        let (deferred, writer) = Deferred::<i32>::new_pair();
        writer.fail(BackendError::WorkerDied, None);
        let err = deferred.wait(None).unwrap_err();
        assert!(matches!(err, WaitError::Backend(BackendError::WorkerDied)));
    }

    #[test]
    fn wait_blocks_until_resolved_from_another_thread() {
        let (deferred, writer) = Deferred::<i32>::new_pair();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.resolve(7, Some(Duration::from_millis(20)));
        });
        assert_eq!(deferred.wait(None).unwrap(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn wait_duration_read_after_completion() {
        let (deferred, writer) = Deferred::<i32>::new_pair();
        writer.resolve(1, Some(Duration::from_millis(5)));
        let duration = deferred.wait_duration(None).unwrap();
        assert_eq!(duration, Duration::from_millis(5));
    }

    #[test]
    fn timeout_on_pending_deferred() {
        let (deferred, _writer) = Deferred::<i32>::new_pair();
        let result = deferred.wait(Some(Duration::from_millis(10)));
        assert!(matches!(result, Err(WaitError::Timeout)));
    }

    #[test]
    fn completion_callbacks_fire_in_fifo_order() {
        let (deferred, writer) = Deferred::<i32>::new_pair();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        deferred.on_complete(move |_| o1.lock().push(1));
        let o2 = order.clone();
        deferred.on_complete(move |_| o2.lock().push(2));

        writer.resolve(0, None);

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn callback_observes_duration_already_set() {
        let (deferred, writer) = Deferred::<i32>::new_pair();
        let seen = Arc::new(AtomicBool::new(false));
        let seen_clone = seen.clone();
        let shared_duration = deferred.clone();

        deferred.on_complete(move |_outcome| {
            // duration must already be visible once the callback fires
            assert!(shared_duration.wait_duration(Some(Duration::ZERO)).is_some());
            seen_clone.store(true, Ordering::SeqCst);
        });

        writer.resolve(5, Some(Duration::from_millis(3)));

        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_both_returns_value_and_duration_together() {
        let (deferred, writer) = Deferred::<i32>::new_pair();
        writer.resolve(9, Some(Duration::from_millis(2)));
        let (value, duration) = deferred.wait_both(None).unwrap();
        assert_eq!(value, 9);
        assert_eq!(duration, Some(Duration::from_millis(2)));
    }

    #[test]
    fn wait_after_take_is_cancelled() {
        let (deferred, writer) = Deferred::<i32>::new_pair();
        writer.resolve(1, None);
        assert_eq!(deferred.wait(None).unwrap(), 1);
        let err = deferred.wait(None).unwrap_err();
        assert!(matches!(err, WaitError::Backend(BackendError::Cancelled)));
    }
}
