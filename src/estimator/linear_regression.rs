//! Ordinary-least-squares partition-size estimator.
//!
//! Fits `duration(n) ≈ α + β·n` over a bounded ring of recent
//! `(size, duration)` samples and solves for the partition size whose
//! predicted duration equals a target minimum, `D_min`. The same
//! "bounded ring of recent measurements feeding a decision" shape as
//! `gds::concurrency::termination::termination_flag`'s throttled check,
//! but the feedback loop here adjusts a size instead of a boolean.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::EstimatorError;

use super::{EstimatorState, PartitionSizeEstimator};

const DEFAULT_WINDOW: usize = 30;
const DEFAULT_MIN_SAMPLES: usize = 4;
const DEFAULT_D_MIN: Duration = Duration::from_millis(10);
const DEFAULT_PERTURBATION: f64 = 0.15;
const DEFAULT_CONVERGENCE_RSE: f64 = 0.1;
const DEFAULT_RESIDUAL_K: f64 = 3.0;
const DEFAULT_INITIAL_SIZE: usize = 1;

/// Tuning knobs for [`LinearRegressionEstimator`].
///
/// Grounds on the builder-of-constants style of
/// `gds::concurrency::batch_size::BatchSize`'s named constructors: each
/// field has a documented default, and [`LinearRegressionConfig::default`]
/// reproduces the values this crate's spec calls out explicitly.
#[derive(Debug, Clone, Copy)]
pub struct LinearRegressionConfig {
    pub window: usize,
    pub min_samples: usize,
    pub d_min: Duration,
    pub perturbation: f64,
    pub convergence_rse: f64,
    pub residual_k: f64,
    pub initial_size: usize,
}

impl Default for LinearRegressionConfig {
    fn default() -> Self {
        LinearRegressionConfig {
            window: DEFAULT_WINDOW,
            min_samples: DEFAULT_MIN_SAMPLES,
            d_min: DEFAULT_D_MIN,
            perturbation: DEFAULT_PERTURBATION,
            convergence_rse: DEFAULT_CONVERGENCE_RSE,
            residual_k: DEFAULT_RESIDUAL_K,
            initial_size: DEFAULT_INITIAL_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Fit {
    alpha: f64,
    beta: f64,
    /// Standard error of `beta`, i.e. `sqrt(residual_variance / Sxx)`.
    se_beta: f64,
    /// Residual standard deviation, `sqrt(residual_variance)`.
    residual_std: f64,
}

impl Fit {
    fn relative_standard_error(&self) -> f64 {
        if self.beta.abs() < f64::EPSILON {
            f64::INFINITY
        } else {
            self.se_beta / self.beta.abs()
        }
    }
}

/// Fits `duration(n) ≈ α + β·n` and proposes the partition size `n*` whose
/// predicted duration equals `D_min`.
pub struct LinearRegressionEstimator {
    config: LinearRegressionConfig,
    samples: VecDeque<(f64, f64)>,
    fit: Option<Fit>,
    state: EstimatorState,
    last_size: usize,
    perturb_up_next: bool,
}

impl LinearRegressionEstimator {
    pub fn new(config: LinearRegressionConfig) -> Self {
        LinearRegressionEstimator {
            last_size: config.initial_size.max(1),
            config,
            samples: VecDeque::new(),
            fit: None,
            state: EstimatorState::Cold,
            perturb_up_next: true,
        }
    }

    fn refit(&mut self) {
        if self.samples.len() < self.config.min_samples {
            self.state = EstimatorState::Cold;
            return;
        }

        match ordinary_least_squares(self.samples.iter().copied()) {
            Ok(fit) if fit.beta > 0.0 => {
                self.state = if fit.relative_standard_error() < self.config.convergence_rse {
                    EstimatorState::Converged
                } else {
                    EstimatorState::Learning
                };
                self.fit = Some(fit);
            }
            Ok(fit) => {
                log::warn!(
                    "partition-size estimator fit a non-positive slope ({:.6}); reverting to last known-good size",
                    fit.beta
                );
                self.state = EstimatorState::Learning;
            }
            Err(err) => {
                log::warn!("{err}; reverting to last known-good size");
                self.state = EstimatorState::Learning;
            }
        }
    }

    fn n_star(&self) -> usize {
        match &self.fit {
            Some(fit) if fit.beta > 0.0 => {
                let target = self.config.d_min.as_secs_f64();
                let n = ((target - fit.alpha) / fit.beta).ceil();
                if n.is_finite() && n >= 1.0 {
                    n as usize
                } else {
                    self.last_size.max(1)
                }
            }
            _ => self.last_size.max(1),
        }
    }

    fn perturbed(&mut self, n: usize) -> usize {
        let factor = if self.perturb_up_next {
            1.0 + self.config.perturbation
        } else {
            1.0 - self.config.perturbation
        };
        self.perturb_up_next = !self.perturb_up_next;
        ((n as f64) * factor).round().max(1.0) as usize
    }
}

impl Default for LinearRegressionEstimator {
    fn default() -> Self {
        Self::new(LinearRegressionConfig::default())
    }
}

impl PartitionSizeEstimator for LinearRegressionEstimator {
    fn next_size(&mut self) -> usize {
        match self.state {
            EstimatorState::Cold => self.config.initial_size.max(1),
            EstimatorState::Converged => self.n_star(),
            EstimatorState::Learning => {
                let n = self.n_star();
                self.perturbed(n)
            }
        }
    }

    fn observe(&mut self, size: usize, duration: Duration) {
        let x = size as f64;
        let y = duration.as_secs_f64();

        if self.state == EstimatorState::Converged {
            if let Some(fit) = &self.fit {
                let predicted = fit.alpha + fit.beta * x;
                let residual = (y - predicted).abs();
                if residual > self.config.residual_k * fit.residual_std {
                    log::debug!(
                        "partition-size estimator residual {residual:.6} exceeded {}x sigma; re-entering Learning",
                        self.config.residual_k
                    );
                    self.state = EstimatorState::Learning;
                }
            }
        }

        self.samples.push_back((x, y));
        while self.samples.len() > self.config.window {
            self.samples.pop_front();
        }
        self.last_size = size;

        self.refit();
    }

    fn state(&self) -> EstimatorState {
        self.state
    }
}

/// Fits `y ≈ alpha + beta * x` by ordinary least squares.
fn ordinary_least_squares(
    points: impl Iterator<Item = (f64, f64)> + Clone,
) -> Result<Fit, EstimatorError> {
    let n = points.clone().count();
    let mean_x = points.clone().map(|(x, _)| x).sum::<f64>() / n as f64;
    let mean_y = points.clone().map(|(_, y)| y).sum::<f64>() / n as f64;

    let s_xx: f64 = points.clone().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let s_xy: f64 = points
        .clone()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();

    if s_xx.abs() < f64::EPSILON {
        return Err(EstimatorError::SingularFit(
            "all samples share the same partition size".to_string(),
        ));
    }

    let beta = s_xy / s_xx;
    let alpha = mean_y - beta * mean_x;

    let residual_sum_sq: f64 = points
        .map(|(x, y)| {
            let predicted = alpha + beta * x;
            (y - predicted).powi(2)
        })
        .sum();

    let degrees_of_freedom = (n as isize - 2).max(1) as f64;
    let residual_variance = residual_sum_sq / degrees_of_freedom;
    let residual_std = residual_variance.sqrt();
    let se_beta = (residual_variance / s_xx).sqrt();

    Ok(Fit {
        alpha,
        beta,
        se_beta,
        residual_std,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_state_emits_initial_size() {
        let mut estimator = LinearRegressionEstimator::new(LinearRegressionConfig {
            initial_size: 50,
            ..Default::default()
        });
        assert_eq!(estimator.state(), EstimatorState::Cold);
        assert_eq!(estimator.next_size(), 50);
    }

    #[test]
    fn enters_learning_after_min_samples() {
        let mut estimator = LinearRegressionEstimator::default();
        for n in [10, 20, 30, 40] {
            estimator.observe(n, Duration::from_micros((n * 100) as u64));
        }
        assert_ne!(estimator.state(), EstimatorState::Cold);
    }

    #[test]
    fn converges_on_a_clean_linear_relationship() {
        let config = LinearRegressionConfig {
            d_min: Duration::from_millis(5),
            min_samples: 4,
            ..Default::default()
        };
        let mut estimator = LinearRegressionEstimator::new(config);

        // duration(n) = 1ms + 0.1ms * n, noiseless.
        for _ in 0..3 {
            for n in [10usize, 50, 100, 200, 400] {
                let micros = 1000.0 + 100.0 * n as f64;
                estimator.observe(n, Duration::from_micros(micros as u64));
            }
        }

        assert_eq!(estimator.state(), EstimatorState::Converged);
        let n_star = estimator.next_size();
        // Analytic optimum for D_min = 5ms: n = (5000 - 1000) / 100 = 40.
        assert!(n_star >= 30 && n_star <= 50, "n_star = {n_star}");
    }

    #[test]
    fn degenerate_fit_falls_back_to_last_size() {
        let mut estimator = LinearRegressionEstimator::default();
        estimator.last_size = 7;
        // Every sample uses the same size: Sxx == 0, a singular fit.
        for _ in 0..5 {
            estimator.observe(7, Duration::from_millis(1));
        }
        assert_eq!(estimator.next_size(), 7);
    }

    #[test]
    fn learning_state_perturbs_round_robin() {
        let config = LinearRegressionConfig {
            d_min: Duration::from_millis(5),
            convergence_rse: 0.0001, // practically unreachable, stays in Learning
            ..Default::default()
        };
        let mut estimator = LinearRegressionEstimator::new(config);
        for n in [10usize, 50, 100, 200] {
            let micros = 1000.0 + 100.0 * n as f64;
            estimator.observe(n, Duration::from_micros(micros as u64));
        }
        assert_eq!(estimator.state(), EstimatorState::Learning);

        let first = estimator.next_size();
        let second = estimator.next_size();
        assert_ne!(first, second, "round-robin perturbation should alternate");
    }
}
