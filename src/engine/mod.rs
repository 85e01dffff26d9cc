//! The parallel-function engine: split → submit → combine, with
//! backpressure against a worker pool and feedback into a partition-size
//! estimator.
//!
//! Grounds on `gds::concurrency::virtual_threads::RunWithConcurrency`'s
//! consuming-builder shape for configuration, and on
//! `gds::concurrency::virtual_threads::Executor`'s "the calling thread
//! drives iteration, workers only ever compute" model — except where the
//! `Executor` blocks on a `rayon::scope` for a single synchronization
//! barrier, this engine keeps a bounded sliding window of in-flight
//! [`crate::backend::future::Deferred`]s so workers stay fed while the
//! calling thread is blocked waiting on an older chunk.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::backend::BackendOptions;
use crate::config::ParallelConfig;
use crate::error::{BackendError, ParfnError, WaitError};
use crate::estimator::fixed::FixedSizeEstimator;
use crate::estimator::linear_regression::LinearRegressionEstimator;
use crate::estimator::PartitionSizeEstimator;
use crate::partition::{Chunked, PartitionGenerator};
use crate::registry;
use crate::trace::{ChunkOutcome, ChunkRecord, ChunkTrace};

type ChunkFn<C, O> = dyn Fn(C) -> Result<O, BackendError> + Send + Sync;
type CombineFn<R, O> = dyn Fn(R, O) -> R + Send + Sync;
type IdentityFn<R> = dyn Fn() -> R + Send + Sync;

/// A function transparently parallelized over a [`PartitionGenerator`] of
/// `C`-shaped chunks, producing partial `O`s that fold into an `R`.
///
/// One `ParallelFunction` is meant to be built once per callsite (the
/// Python decorator's role) and invoked many times via
/// [`ParallelFunction::call`]; its estimator's learning state persists
/// across calls, which is what lets it actually converge.
pub struct ParallelFunction<C, O, R> {
    function: Arc<ChunkFn<C, O>>,
    combine: Arc<CombineFn<R, O>>,
    identity: Arc<IdentityFn<R>>,
    estimator: Mutex<Box<dyn PartitionSizeEstimator>>,
    config: ParallelConfig,
    backend_options: BackendOptions,
    call_counter: AtomicU64,
}

struct InFlightChunk<O> {
    size: usize,
    chunk_index: usize,
    schedule_ns: u64,
    deferred: crate::backend::future::Deferred<O>,
}

impl<C, O, R> ParallelFunction<C, O, R>
where
    C: Chunked + Send + 'static,
    O: Send + 'static,
{
    pub fn builder() -> ParallelFunctionBuilder<C, O, R> {
        ParallelFunctionBuilder::new()
    }

    /// Runs `self` over every chunk `generator` produces, combining partial
    /// results in arrival order, and returns the folded result.
    ///
    /// Any carried (broadcast) state the underlying function needs should
    /// already be captured by the closure passed to the builder: Rust's
    /// ownership model resolves "carried argument" broadcasting at closure
    /// construction time rather than through a dynamically-typed argument
    /// bag, so there is no separate carried-argument step here.
    pub fn call(&self, mut generator: impl PartitionGenerator<C>) -> Result<R, ParfnError> {
        let call_id = self.call_counter.fetch_add(1, Ordering::SeqCst);

        let sequential_threshold = { self.estimator.lock().next_size() }.max(1);
        if let Some(total) = generator.total_len() {
            if total <= 2 * sequential_threshold {
                log::debug!(
                    "call {call_id}: input of {total} items is below the sequential threshold \
                     ({}), running in-process",
                    2 * sequential_threshold
                );
                return self.call_sequential(&mut generator, total);
            }
        }

        let backend = registry::current_backend().ok_or_else(|| {
            ParfnError::Registry("no backend installed; call registry::install_backend first".into())
        })?;
        let session = backend.session(self.backend_options);

        let window = if self.config.preload_count() > 0 {
            self.config.preload_count()
        } else {
            (self.config.window_multiplier() * session.concurrency()).max(1)
        };

        let mut trace = self.config.profile().then(ChunkTrace::new);
        let mut in_flight: VecDeque<InFlightChunk<O>> = VecDeque::new();
        let mut accumulator = (self.identity)();
        let mut chunk_index = 0usize;
        let mut exhausted = false;
        let mut first_error: Option<BackendError> = None;

        loop {
            while !exhausted && in_flight.len() < window {
                let size = { self.estimator.lock().next_size() }.max(1);
                match generator.next_chunk(size) {
                    Some(chunk) => {
                        let actual_len = chunk.chunk_len();
                        let function = self.function.clone();
                        let schedule_start = Instant::now();
                        let deferred = session.submit(move || function(chunk));
                        let schedule_ns = schedule_start.elapsed().as_nanos() as u64;
                        in_flight.push_back(InFlightChunk {
                            size: actual_len,
                            chunk_index,
                            schedule_ns,
                            deferred,
                        });
                        chunk_index += 1;
                    }
                    None => exhausted = true,
                }
            }

            let pending = match in_flight.pop_front() {
                Some(pending) => pending,
                None => break,
            };

            match pending.deferred.wait(None) {
                Ok(output) => {
                    let task_duration = pending.deferred.wait_duration(None).unwrap_or_default();
                    if first_error.is_some() {
                        log::debug!(
                            "call {call_id}: discarding result for chunk {} after an earlier failure",
                            pending.chunk_index
                        );
                        continue;
                    }
                    self.estimator.lock().observe(pending.size, task_duration);
                    let combine_start = Instant::now();
                    accumulator = (self.combine)(accumulator, output);
                    let combine_ns = combine_start.elapsed().as_nanos() as u64;
                    if let Some(trace) = trace.as_mut() {
                        trace.record(ChunkRecord {
                            call_id,
                            chunk_index: pending.chunk_index,
                            partition_size: pending.size,
                            schedule_ns: pending.schedule_ns,
                            task_ns: task_duration.as_nanos() as u64,
                            combine_ns,
                            outcome: ChunkOutcome::Ok,
                        });
                    }
                }
                Err(WaitError::Backend(err)) => {
                    if let Some(trace) = trace.as_mut() {
                        trace.record(ChunkRecord {
                            call_id,
                            chunk_index: pending.chunk_index,
                            partition_size: pending.size,
                            schedule_ns: pending.schedule_ns,
                            task_ns: 0,
                            combine_ns: 0,
                            outcome: ChunkOutcome::Err,
                        });
                    }
                    if first_error.is_none() {
                        log::error!("call {call_id}: chunk {} failed: {err}", pending.chunk_index);
                        first_error = Some(err);
                        // Stop requesting and submitting further chunks once a
                        // failure is seen; only the already-in-flight ones are
                        // drained (and discarded) below.
                        exhausted = true;
                    } else {
                        log::debug!(
                            "call {call_id}: discarding subsequent error for chunk {}: {err}",
                            pending.chunk_index
                        );
                    }
                }
                Err(WaitError::Timeout) => unreachable!("wait(None) never times out"),
            }
        }

        session.shutdown();

        if let Some(err) = first_error {
            return Err(ParfnError::Backend(err));
        }

        if let (Some(path), Some(trace)) = (self.config.trace_export(), trace.as_ref()) {
            if let Err(io_err) = trace.write_csv_to_path(path) {
                log::error!("call {call_id}: failed to write trace export to {path:?}: {io_err}");
            }
        }

        Ok(accumulator)
    }

    fn call_sequential(
        &self,
        generator: &mut impl PartitionGenerator<C>,
        total: usize,
    ) -> Result<R, ParfnError> {
        let mut accumulator = (self.identity)();
        if let Some(chunk) = generator.next_chunk(total.max(1)) {
            let output = (self.function)(chunk).map_err(ParfnError::Backend)?;
            accumulator = (self.combine)(accumulator, output);
        }
        Ok(accumulator)
    }
}

/// Consuming builder for [`ParallelFunction`].
///
/// Mirrors `gds::concurrency::virtual_threads::RunWithConcurrency::builder()`:
/// required fields (`function`, `combine`, `identity`) must be set before
/// `build()`; partition-size policy defaults to the learning
/// [`LinearRegressionEstimator`] unless `fixed_partition_size` is set.
pub struct ParallelFunctionBuilder<C, O, R> {
    function: Option<Arc<ChunkFn<C, O>>>,
    combine: Option<Arc<CombineFn<R, O>>>,
    identity: Option<Arc<IdentityFn<R>>>,
    estimator: Option<Box<dyn PartitionSizeEstimator>>,
    initial_partition_size: Option<usize>,
    fixed_partition_size: Option<usize>,
    config: ParallelConfig,
    backend_options: BackendOptions,
}

impl<C, O, R> ParallelFunctionBuilder<C, O, R>
where
    C: Chunked + Send + 'static,
    O: Send + 'static,
{
    pub fn new() -> Self {
        ParallelFunctionBuilder {
            function: None,
            combine: None,
            identity: None,
            estimator: None,
            initial_partition_size: None,
            fixed_partition_size: None,
            config: ParallelConfig::default(),
            backend_options: BackendOptions::default(),
        }
    }

    /// The function applied to each partition chunk.
    pub fn function<F>(mut self, f: F) -> Self
    where
        F: Fn(C) -> Result<O, BackendError> + Send + Sync + 'static,
    {
        self.function = Some(Arc::new(f));
        self
    }

    /// The reducer folding partial results (in arrival order) into the
    /// final accumulator. Must be associative and commutative, since
    /// arrival order is not guaranteed to match submission order.
    pub fn combine<F>(mut self, f: F) -> Self
    where
        F: Fn(R, O) -> R + Send + Sync + 'static,
    {
        self.combine = Some(Arc::new(f));
        self
    }

    /// Produces a fresh accumulator seed for each call.
    pub fn identity<F>(mut self, f: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
    {
        self.identity = Some(Arc::new(f));
        self
    }

    /// Bypasses the learning estimator: every chunk requests exactly `size`
    /// items.
    pub fn fixed_partition_size(mut self, size: usize) -> Self {
        self.fixed_partition_size = Some(size);
        self
    }

    /// Seeds the learning estimator's cold-start size.
    pub fn initial_partition_size(mut self, size: usize) -> Self {
        self.initial_partition_size = Some(size);
        self
    }

    /// Supplies a fully custom estimator, overriding
    /// `fixed_partition_size`/`initial_partition_size`.
    pub fn estimator(mut self, estimator: Box<dyn PartitionSizeEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn config(mut self, config: ParallelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend_options(mut self, options: BackendOptions) -> Self {
        self.backend_options = options;
        self
    }

    pub fn build(self) -> Result<ParallelFunction<C, O, R>, crate::error::EngineError> {
        if self.fixed_partition_size.is_some() && self.initial_partition_size.is_some() {
            return Err(crate::error::EngineError::Config(
                "at most one of `fixed_partition_size`/`initial_partition_size` may be set"
                    .to_string(),
            ));
        }

        let function = self.function.ok_or_else(|| {
            crate::error::EngineError::Config("`function` is required".to_string())
        })?;
        let combine = self.combine.ok_or_else(|| {
            crate::error::EngineError::Config("`combine` is required".to_string())
        })?;
        let identity = self.identity.ok_or_else(|| {
            crate::error::EngineError::Config("`identity` is required".to_string())
        })?;

        let estimator = self.estimator.unwrap_or_else(|| {
            if let Some(size) = self.fixed_partition_size {
                Box::new(FixedSizeEstimator::new(size)) as Box<dyn PartitionSizeEstimator>
            } else {
                let mut linreg_config = self.config.estimator().clone();
                if let Some(initial) = self.initial_partition_size {
                    linreg_config.initial_size = initial;
                }
                Box::new(LinearRegressionEstimator::new(linreg_config))
                    as Box<dyn PartitionSizeEstimator>
            }
        });

        Ok(ParallelFunction {
            function,
            combine,
            identity,
            estimator: Mutex::new(estimator),
            config: self.config,
            backend_options: self.backend_options,
            call_counter: AtomicU64::new(0),
        })
    }
}

impl<C, O, R> Default for ParallelFunctionBuilder<C, O, R>
where
    C: Chunked + Send + 'static,
    O: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalSingleProcessBackend;
    use crate::backend::local::LocalMultiprocessBackend;
    use crate::partition::slice::SlicePartitioner;
    use std::sync::Arc as StdArc;

    fn install_single_process() {
        registry::install_backend(StdArc::new(LocalSingleProcessBackend::new()));
    }

    #[test]
    fn sums_chunks_sequentially_below_threshold() {
        let _guard = registry::TEST_LOCK.lock();
        install_single_process();
        let pf: ParallelFunction<Vec<i32>, i32, i32> = ParallelFunction::builder()
            .function(|chunk: Vec<i32>| Ok(chunk.iter().sum()))
            .combine(|acc, partial| acc + partial)
            .identity(|| 0)
            .fixed_partition_size(1000)
            .build().unwrap();

        let generator = SlicePartitioner::new(vec![1, 2, 3, 4, 5]);
        let result = pf.call(generator).unwrap();
        assert_eq!(result, 15);
    }

    #[test]
    fn sums_chunks_across_the_multiprocess_backend() {
        let _guard = registry::TEST_LOCK.lock();
        let backend = LocalMultiprocessBackend::new(BackendOptions::fixed(4)).unwrap();
        registry::install_backend(StdArc::new(backend));

        let pf: ParallelFunction<Vec<i32>, i32, i32> = ParallelFunction::builder()
            .function(|chunk: Vec<i32>| Ok(chunk.iter().sum()))
            .combine(|acc, partial| acc + partial)
            .identity(|| 0)
            .fixed_partition_size(10)
            .build().unwrap();

        let items: Vec<i32> = (1..=1000).collect();
        let expected: i32 = items.iter().sum();
        let generator = SlicePartitioner::new(items);
        let result = pf.call(generator).unwrap();
        assert_eq!(result, expected);

        install_single_process();
    }

    #[test]
    fn propagates_the_first_task_error() {
        let _guard = registry::TEST_LOCK.lock();
        install_single_process();
        let pf: ParallelFunction<Vec<i32>, i32, i32> = ParallelFunction::builder()
            .function(|chunk: Vec<i32>| {
                if chunk.contains(&13) {
                    Err(BackendError::task_raised(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "unlucky chunk",
                    )))
                } else {
                    Ok(chunk.iter().sum())
                }
            })
            .combine(|acc, partial| acc + partial)
            .identity(|| 0)
            .fixed_partition_size(1)
            .build().unwrap();

        let items: Vec<i32> = (1..=20).collect();
        let generator = SlicePartitioner::new(items);
        let result = pf.call(generator);
        assert!(result.is_err());
    }

    /// Wraps a [`SlicePartitioner`] and counts how many times it was asked
    /// for a chunk, so a test can observe whether the engine kept pulling
    /// partitions after a failure instead of cancelling the rest.
    struct CountingPartitioner {
        inner: SlicePartitioner<i32>,
        requests: StdArc<AtomicUsize>,
    }

    impl PartitionGenerator<Vec<i32>> for CountingPartitioner {
        fn total_len(&self) -> Option<usize> {
            self.inner.total_len()
        }

        fn next_chunk(&mut self, size: usize) -> Option<Vec<i32>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.inner.next_chunk(size)
        }
    }

    #[test]
    fn stops_requesting_chunks_after_the_first_failure() {
        use std::sync::atomic::AtomicUsize;

        let _guard = registry::TEST_LOCK.lock();
        install_single_process();
        let pf: ParallelFunction<Vec<i32>, i32, i32> = ParallelFunction::builder()
            .function(|chunk: Vec<i32>| {
                if chunk.contains(&13) {
                    Err(BackendError::task_raised(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "unlucky chunk",
                    )))
                } else {
                    Ok(chunk.iter().sum())
                }
            })
            .combine(|acc, partial| acc + partial)
            .identity(|| 0)
            .fixed_partition_size(1)
            .build().unwrap();

        let items: Vec<i32> = (1..=1000).collect();
        let requests = StdArc::new(AtomicUsize::new(0));
        let generator = CountingPartitioner {
            inner: SlicePartitioner::new(items),
            requests: requests.clone(),
        };

        let result = pf.call(generator);
        assert!(result.is_err());
        // The failing chunk is requested 13th; the bounded in-flight window
        // admits at most a couple more ahead of it, nowhere near the full
        // 1000-chunk input.
        assert!(
            requests.load(Ordering::SeqCst) < 20,
            "expected the generator to stop well short of the full input, got {}",
            requests.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn estimator_learns_across_repeated_calls() {
        let _guard = registry::TEST_LOCK.lock();
        install_single_process();
        let pf: ParallelFunction<Vec<i32>, i32, i32> = ParallelFunction::builder()
            .function(|chunk: Vec<i32>| Ok(chunk.iter().sum()))
            .combine(|acc, partial| acc + partial)
            .identity(|| 0)
            .initial_partition_size(2)
            .build().unwrap();

        for _ in 0..5 {
            let items: Vec<i32> = (0..500).collect();
            let generator = SlicePartitioner::new(items);
            pf.call(generator).unwrap();
        }

        assert_ne!(pf.estimator.lock().state(), crate::estimator::EstimatorState::Cold);
    }
}
