//! Run configuration persisted alongside the model

use crate::core::{ClassifierError, Result};
use crate::solver::OptimizerConfig;
use serde::{Deserialize, Serialize};

/// Score maximised by the complexity search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    #[default]
    OverallAgreement,
    FScore,
    Precision,
    Recall,
}

/// How the SVM ensemble splits a multi-class problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SvmStrategy {
    /// One-vs-one voting
    #[default]
    Multiclass,
    /// One-vs-rest, highest decision value wins
    Multilabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralNetworkConfig {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub momentum: f64,
    pub max_training_iterations: usize,
    /// Hold out a cross-validation subset while training
    pub cross_validation: bool,
    /// Share of each category used for training when cross-validating
    pub cross_validation_fraction: f64,
    pub early_stopping: bool,
    pub early_stopping_window: usize,
    /// Independent networks built when cross-validating without early stopping
    pub candidate_networks: usize,
}

impl Default for NeuralNetworkConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![10],
            learning_rate: 0.1,
            momentum: 0.0,
            max_training_iterations: 1000,
            cross_validation: true,
            cross_validation_fraction: 0.8,
            early_stopping: true,
            early_stopping_window: 20,
            candidate_networks: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmConfig {
    pub strategy: SvmStrategy,
    /// Fixed complexity; `None` selects it with the complexity search
    pub complexity: Option<f64>,
    pub calibrate_probabilities: bool,
    pub score_kind: ScoreKind,
    /// Share of each category used for training during the search
    pub search_fraction: f64,
    pub epsilon: f64,
    pub max_iterations: usize,
    pub cache_size: usize,
    /// Consecutive decreasing scores that end the coarse search
    pub max_decreasing_run: usize,
    /// Consecutive scores equal to the best (past complexity 1) that end the coarse search
    pub max_equal_run: usize,
    /// Complexity multiplier applied after a non-converging final training
    pub retry_factor: f64,
}

impl Default for SvmConfig {
    fn default() -> Self {
        let solver = OptimizerConfig::default();
        Self {
            strategy: SvmStrategy::Multiclass,
            complexity: None,
            calibrate_probabilities: true,
            score_kind: ScoreKind::OverallAgreement,
            search_fraction: 0.8,
            epsilon: solver.epsilon,
            max_iterations: solver.max_iterations,
            cache_size: solver.cache_size,
            max_decreasing_run: 3,
            max_equal_run: 3,
            retry_factor: 0.75,
        }
    }
}

impl SvmConfig {
    /// Solver settings at a given complexity
    pub fn optimizer(&self, complexity: f64) -> OptimizerConfig {
        OptimizerConfig {
            c: complexity,
            epsilon: self.epsilon,
            max_iterations: self.max_iterations,
            cache_size: self.cache_size,
        }
    }
}

/// Closed set of classifier families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierConfig {
    NeuralNetwork(NeuralNetworkConfig),
    SupportVectorMachine(SvmConfig),
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig::SupportVectorMachine(SvmConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Class name reserved for code 0
    pub negative_class: String,
    pub use_unknown_category: bool,
    /// Predictions scored below this are treated as unknown
    pub unknown_cutoff: Option<f64>,
    /// Class that unknown predictions are translated to, if any
    pub translate_unknown_to: Option<String>,
    pub classifier: ClassifierConfig,
    /// Seed for the random source built by the entry point
    pub seed: u64,
    /// Rows between CSV progress reports
    pub progress_batch: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            negative_class: "None".to_string(),
            use_unknown_category: false,
            unknown_cutoff: None,
            translate_unknown_to: None,
            classifier: ClassifierConfig::default(),
            seed: 0,
            progress_batch: 64,
        }
    }
}

impl ModelConfig {
    /// Check the invariants every run relies on
    pub fn validate(&self) -> Result<()> {
        if self.negative_class.trim().is_empty() {
            return Err(ClassifierError::Configuration(
                "negative class name is not configured".to_string(),
            ));
        }
        if self.use_unknown_category {
            match self.unknown_cutoff {
                Some(cutoff) if (0.0..=1.0).contains(&cutoff) => {}
                Some(cutoff) => {
                    return Err(ClassifierError::Configuration(format!(
                        "unknown cutoff must be within [0, 1], got {cutoff}"
                    )))
                }
                None => {
                    return Err(ClassifierError::Configuration(
                        "unknown category enabled without a cutoff".to_string(),
                    ))
                }
            }
        }
        if self.progress_batch == 0 {
            return Err(ClassifierError::Configuration(
                "progress batch must be at least 1".to_string(),
            ));
        }

        match &self.classifier {
            ClassifierConfig::NeuralNetwork(nn) => {
                if nn.hidden_layers.iter().any(|&n| n == 0) {
                    return Err(ClassifierError::Configuration(
                        "hidden layers must have at least one neuron".to_string(),
                    ));
                }
                check_fraction("cross-validation fraction", nn.cross_validation_fraction)?;
                if nn.early_stopping_window < 2 {
                    return Err(ClassifierError::Configuration(
                        "early stopping window must hold at least two epochs".to_string(),
                    ));
                }
                if !(nn.learning_rate > 0.0) {
                    return Err(ClassifierError::Configuration(format!(
                        "learning rate must be positive, got {}",
                        nn.learning_rate
                    )));
                }
            }
            ClassifierConfig::SupportVectorMachine(svm) => {
                check_fraction("search fraction", svm.search_fraction)?;
                if let Some(c) = svm.complexity {
                    if !(c > 0.0) || !c.is_finite() {
                        return Err(ClassifierError::Configuration(format!(
                            "complexity must be positive, got {c}"
                        )));
                    }
                }
                if !(svm.retry_factor > 0.0 && svm.retry_factor < 1.0) {
                    return Err(ClassifierError::Configuration(format!(
                        "retry factor must be within (0, 1), got {}",
                        svm.retry_factor
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ClassifierError::Configuration(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}
