//! Sequential Minimal Optimization (SMO) solver for binary SVMs
//!
//! Solves the dual problem
//!
//! ```text
//! min  1/2 a^T Q a - e^T a
//! s.t. 0 <= a_i <= C,  y^T a = 0,  Q_ij = y_i y_j K(x_i, x_j)
//! ```
//!
//! by repeatedly optimizing the maximal violating pair of multipliers. The
//! solver reports non-convergence, rather than returning a half-optimized
//! machine, when the iteration budget runs out with violations left.

use crate::cache::KernelCache;
use crate::core::{ClassifierError, NonConvergence, Result, TrainOutcome};
use crate::kernel::Kernel;
use std::sync::Arc;

/// Curvature floor for non positive definite pairs
const TAU: f64 = 1e-12;

/// Configuration for the SMO solver
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    /// Complexity: upper bound for the multipliers
    pub c: f64,
    /// Tolerance on the maximal KKT violation
    pub epsilon: f64,
    /// Maximum number of pair updates before giving up
    pub max_iterations: usize,
    /// Kernel cache size in bytes
    pub cache_size: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            epsilon: 0.001,
            max_iterations: 100_000,
            cache_size: 100_000_000, // 100MB
        }
    }
}

/// Result of optimization process
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Lagrange multipliers (alpha values)
    pub alpha: Vec<f64>,
    /// Bias term (b)
    pub b: f64,
    /// Indices of support vectors (where alpha > 0)
    pub support_vectors: Vec<usize>,
    /// Number of pair updates performed
    pub iterations: usize,
    /// Final dual objective value
    pub objective_value: f64,
}

/// SMO solver for SVM optimization
pub struct SMOSolver<K: Kernel> {
    kernel: Arc<K>,
    config: OptimizerConfig,
}

impl<K: Kernel> SMOSolver<K> {
    /// Create a new SMO solver with the given kernel and configuration
    pub fn new(kernel: Arc<K>, config: OptimizerConfig) -> Self {
        Self { kernel, config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Solve the SVM optimization problem for labels in {-1, +1}
    pub fn solve(
        &self,
        inputs: &[Vec<f64>],
        labels: &[f64],
    ) -> Result<TrainOutcome<OptimizationResult>> {
        if inputs.is_empty() {
            return Err(ClassifierError::EmptyDataset);
        }
        if inputs.len() != labels.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: inputs.len(),
                actual: labels.len(),
            });
        }
        if let Some(&bad) = labels.iter().find(|&&y| y != 1.0 && y != -1.0) {
            return Err(ClassifierError::InvalidParameter(format!(
                "Invalid label: expected -1 or +1, got {bad}"
            )));
        }
        if !(self.config.c > 0.0) || !self.config.c.is_finite() {
            return Err(ClassifierError::InvalidParameter(format!(
                "Complexity must be positive, got: {}",
                self.config.c
            )));
        }

        let n = inputs.len();
        let c = self.config.c;
        let mut cache = KernelCache::with_memory_limit(self.config.cache_size, n);

        let mut diag = Vec::new();
        diag.try_reserve_exact(n)?;
        diag.extend(inputs.iter().map(|x| self.kernel.compute(x, x)));

        let mut alpha = vec![0.0; n];
        // Gradient of the dual objective, Q a - e
        let mut gradient = vec![-1.0; n];

        let mut iterations = 0;
        loop {
            let Some((i, j)) = self.select_working_set(labels, &alpha, &gradient) else {
                break;
            };
            if iterations >= self.config.max_iterations {
                log::debug!(
                    "SMO stopped after {iterations} iterations at C={c} without converging"
                );
                return Ok(TrainOutcome::NotConverged(NonConvergence {
                    complexity: c,
                    iterations,
                }));
            }
            iterations += 1;

            let row_i = cache.row(self.kernel.as_ref(), inputs, i)?;
            let row_j = cache.row(self.kernel.as_ref(), inputs, j)?;
            let (y_i, y_j) = (labels[i], labels[j]);
            let (old_i, old_j) = (alpha[i], alpha[j]);

            let mut quad = diag[i] + diag[j] - 2.0 * row_i[j];
            if quad <= 0.0 {
                quad = TAU;
            }

            if y_i != y_j {
                let delta = (-gradient[i] - gradient[j]) / quad;
                let diff = alpha[i] - alpha[j];
                alpha[i] += delta;
                alpha[j] += delta;
                if diff > 0.0 {
                    if alpha[j] < 0.0 {
                        alpha[j] = 0.0;
                        alpha[i] = diff;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = -diff;
                }
                if diff > 0.0 {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = c - diff;
                    }
                } else if alpha[j] > c {
                    alpha[j] = c;
                    alpha[i] = c + diff;
                }
            } else {
                let delta = (gradient[i] - gradient[j]) / quad;
                let sum = alpha[i] + alpha[j];
                alpha[i] -= delta;
                alpha[j] += delta;
                if sum > c {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = sum - c;
                    }
                    if alpha[j] > c {
                        alpha[j] = c;
                        alpha[i] = sum - c;
                    }
                } else {
                    if alpha[j] < 0.0 {
                        alpha[j] = 0.0;
                        alpha[i] = sum;
                    }
                    if alpha[i] < 0.0 {
                        alpha[i] = 0.0;
                        alpha[j] = sum;
                    }
                }
            }

            let delta_i = alpha[i] - old_i;
            let delta_j = alpha[j] - old_j;
            for k in 0..n {
                gradient[k] +=
                    labels[k] * (y_i * row_i[k] * delta_i + y_j * row_j[k] * delta_j);
            }
        }

        let b = -self.calculate_rho(labels, &alpha, &gradient);
        let support_vectors: Vec<usize> = alpha
            .iter()
            .enumerate()
            .filter_map(|(i, &a)| if a > 0.0 { Some(i) } else { None })
            .collect();
        let objective_value = -alpha
            .iter()
            .zip(gradient.iter())
            .map(|(a, g)| a * (g - 1.0))
            .sum::<f64>()
            / 2.0;

        let stats = cache.stats();
        log::trace!(
            "SMO converged: C={c}, iterations={iterations}, SVs={}, cache hits={} misses={}",
            support_vectors.len(),
            stats.hits,
            stats.misses
        );

        Ok(TrainOutcome::Converged(OptimizationResult {
            alpha,
            b,
            support_vectors,
            iterations,
            objective_value,
        }))
    }

    /// Pick the maximal violating pair, or `None` once the KKT gap is within
    /// tolerance
    fn select_working_set(
        &self,
        labels: &[f64],
        alpha: &[f64],
        gradient: &[f64],
    ) -> Option<(usize, usize)> {
        let c = self.config.c;
        let mut up = f64::NEG_INFINITY;
        let mut low = f64::INFINITY;
        let mut best_i = None;
        let mut best_j = None;

        for t in 0..labels.len() {
            let y = labels[t];
            let value = -y * gradient[t];
            let in_up = (y > 0.0 && alpha[t] < c) || (y < 0.0 && alpha[t] > 0.0);
            let in_low = (y > 0.0 && alpha[t] > 0.0) || (y < 0.0 && alpha[t] < c);

            if in_up && value > up {
                up = value;
                best_i = Some(t);
            }
            if in_low && value < low {
                low = value;
                best_j = Some(t);
            }
        }

        match (best_i, best_j) {
            (Some(i), Some(j)) if up - low > self.config.epsilon && i != j => Some((i, j)),
            _ => None,
        }
    }

    /// Offset of the decision function from the free multipliers
    fn calculate_rho(&self, labels: &[f64], alpha: &[f64], gradient: &[f64]) -> f64 {
        let c = self.config.c;
        let mut upper = f64::INFINITY;
        let mut lower = f64::NEG_INFINITY;
        let mut free_sum = 0.0;
        let mut free_count = 0usize;

        for t in 0..labels.len() {
            let yg = labels[t] * gradient[t];
            if alpha[t] >= c {
                if labels[t] < 0.0 {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else if alpha[t] <= 0.0 {
                if labels[t] > 0.0 {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else {
                free_count += 1;
                free_sum += yg;
            }
        }

        if free_count > 0 {
            free_sum / free_count as f64
        } else if upper.is_finite() && lower.is_finite() {
            (upper + lower) / 2.0
        } else if upper.is_finite() {
            upper
        } else if lower.is_finite() {
            lower
        } else {
            0.0
        }
    }
}
