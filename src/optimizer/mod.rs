//! Binary machine training
//!
//! Integrates the kernel and the SMO solver into a trained linear machine.
//! With a linear kernel the support-vector expansion is folded into one
//! weight vector at training time.

use crate::core::{ClassifierError, Result, TrainOutcome};
use crate::kernel::{dot, Kernel, LinearKernel};
use crate::solver::{OptimizerConfig, PlattScaling, SMOSolver};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// High-level SVM optimizer that integrates kernel functions and solving algorithms
pub struct SVMOptimizer<K: Kernel> {
    kernel: Arc<K>,
    config: OptimizerConfig,
}

impl SVMOptimizer<LinearKernel> {
    /// Linear optimizer with the given configuration
    pub fn linear(config: OptimizerConfig) -> Self {
        Self::new(LinearKernel::new(), config)
    }
}

impl<K: Kernel> SVMOptimizer<K> {
    /// Create a new SVM optimizer with the given kernel and configuration
    pub fn new(kernel: K, config: OptimizerConfig) -> Self {
        Self {
            kernel: Arc::new(kernel),
            config,
        }
    }

    /// Get the optimizer configuration
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Train a binary machine on labels in {-1, +1}
    pub fn train(
        &self,
        inputs: &[Vec<f64>],
        labels: &[f64],
    ) -> Result<TrainOutcome<LinearMachine>> {
        let dim = inputs.first().map(Vec::len).ok_or(ClassifierError::EmptyDataset)?;
        let solver = SMOSolver::new(Arc::clone(&self.kernel), self.config.clone());
        let outcome = solver.solve(inputs, labels)?;

        Ok(outcome.map(|result| {
            let mut weights = vec![0.0; dim];
            for &sv in &result.support_vectors {
                let coef = result.alpha[sv] * labels[sv];
                for (w, x) in weights.iter_mut().zip(inputs[sv].iter()) {
                    *w += coef * x;
                }
            }
            LinearMachine {
                weights,
                bias: result.b,
                n_support_vectors: result.support_vectors.len(),
                calibration: None,
            }
        }))
    }
}

/// A trained linear binary machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearMachine {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub n_support_vectors: usize,
    /// Sigmoid fitted after training, when probabilities were requested
    pub calibration: Option<PlattScaling>,
}

impl LinearMachine {
    /// Signed distance-like decision value; positive means the +1 class
    pub fn decision_function(&self, input: &[f64]) -> f64 {
        dot(&self.weights, input) + self.bias
    }

    /// Calibrated probability of the +1 class, if calibrated
    pub fn probability(&self, input: &[f64]) -> Option<f64> {
        self.calibration
            .map(|platt| platt.probability(self.decision_function(input)))
    }

    /// Fit the calibration sigmoid on this machine's own training data
    pub fn calibrate(&mut self, inputs: &[Vec<f64>], labels: &[f64]) -> Result<()> {
        let values: Vec<f64> = inputs.iter().map(|x| self.decision_function(x)).collect();
        self.calibration = Some(PlattScaling::fit(&values, labels)?);
        Ok(())
    }
}
