//! Engine-wide tuning configuration.
//!
//! A consuming builder (`builder()...build()`), the same shape as
//! `gds::concurrency::virtual_threads::RunWithConcurrency::builder()`:
//! required fields default sensibly, optional knobs are set by chained
//! calls, and `build()` produces an immutable value the engine holds for
//! the lifetime of one [`crate::engine::ParallelFunction`] call.

use std::path::PathBuf;

use crate::estimator::linear_regression::LinearRegressionConfig;

/// Tuning knobs shared by every call made through one
/// [`crate::engine::ParallelFunction`].
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    window_multiplier: usize,
    preload_count: usize,
    estimator: LinearRegressionConfig,
    profile: bool,
    trace_export: Option<PathBuf>,
}

impl ParallelConfig {
    pub fn builder() -> ParallelConfigBuilder {
        ParallelConfigBuilder::new()
    }

    /// How many in-flight chunks the engine keeps submitted ahead of the
    /// one it is currently waiting on, expressed as a multiple of the
    /// backend's worker count (`preload_count = window_multiplier *
    /// concurrency`), so the worker pool never starves waiting on the
    /// calling thread to request the next partition.
    pub fn window_multiplier(&self) -> usize {
        self.window_multiplier
    }

    /// The absolute preload count, if one was set directly instead of via
    /// `window_multiplier`.
    pub fn preload_count(&self) -> usize {
        self.preload_count
    }

    pub fn estimator(&self) -> &LinearRegressionConfig {
        &self.estimator
    }

    pub fn profile(&self) -> bool {
        self.profile
    }

    pub fn trace_export(&self) -> Option<&PathBuf> {
        self.trace_export.as_ref()
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfigBuilder::new().build()
    }
}

/// Builder for [`ParallelConfig`].
pub struct ParallelConfigBuilder {
    window_multiplier: usize,
    preload_count: Option<usize>,
    estimator: LinearRegressionConfig,
    profile: bool,
    trace_export: Option<PathBuf>,
}

impl ParallelConfigBuilder {
    pub fn new() -> Self {
        ParallelConfigBuilder {
            window_multiplier: 2,
            preload_count: None,
            estimator: LinearRegressionConfig::default(),
            profile: false,
            trace_export: None,
        }
    }

    /// Sets how many chunks, as a multiple of worker count, the engine
    /// keeps in flight ahead of the chunk it is waiting on.
    pub fn window_multiplier(mut self, multiplier: usize) -> Self {
        self.window_multiplier = multiplier.max(1);
        self
    }

    /// Overrides the preload count directly, ignoring `window_multiplier`.
    pub fn preload_count(mut self, count: usize) -> Self {
        self.preload_count = Some(count.max(1));
        self
    }

    pub fn estimator(mut self, estimator: LinearRegressionConfig) -> Self {
        self.estimator = estimator;
        self
    }

    /// Enables per-chunk timing collection even when no trace file is
    /// exported (useful for programmatic inspection via
    /// [`crate::trace::ChunkTrace`]).
    pub fn profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    /// Enables CSV trace export to the given path; implies `profile(true)`.
    pub fn trace_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_export = Some(path.into());
        self.profile = true;
        self
    }

    pub fn build(self) -> ParallelConfig {
        ParallelConfig {
            window_multiplier: self.window_multiplier,
            preload_count: self.preload_count.unwrap_or(0),
            estimator: self.estimator,
            profile: self.profile,
            trace_export: self.trace_export,
        }
    }
}

impl Default for ParallelConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_window() {
        let config = ParallelConfig::default();
        assert_eq!(config.window_multiplier(), 2);
        assert!(!config.profile());
        assert!(config.trace_export().is_none());
    }

    #[test]
    fn trace_export_implies_profile() {
        let config = ParallelConfig::builder()
            .trace_export("/tmp/trace.csv")
            .build();
        assert!(config.profile());
        assert!(config.trace_export().is_some());
    }

    #[test]
    fn builder_chains_overrides() {
        let config = ParallelConfig::builder()
            .window_multiplier(4)
            .profile(true)
            .build();
        assert_eq!(config.window_multiplier(), 4);
        assert!(config.profile());
    }
}
