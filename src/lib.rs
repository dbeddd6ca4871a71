//! Classifier training and evaluation engine
//!
//! Trains a feed-forward neural network or a linear support-vector-machine
//! ensemble on CSV feature files, picks hyperparameters automatically
//! (complexity search for the SVM, early stopping for the network), scores
//! the result with confusion matrices and writes predictions back into the
//! source files.

pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod core;
pub mod data;
pub mod kernel;
pub mod optimizer;
pub mod persistence;
pub mod scoring;
pub mod solver;
pub mod training;
pub mod utils;

// Re-export main types for convenience
pub use crate::api::{resolve_sources, run, AccuracyPair, RunOptions};
pub use crate::cache::{CacheStats, KernelCache};
pub use crate::classifier::{ClassifierModel, NeuralNetworkClassifier, SvmClassifier};
pub use crate::config::{ClassifierConfig, ModelConfig, NeuralNetworkConfig, SvmConfig};
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::core::{CancellationToken, ClassifierError, ProgressEvent, ProgressSink, Result};
pub use crate::data::{CsvData, CsvReader};
pub use crate::kernel::{Kernel, LinearKernel};
pub use crate::optimizer::{LinearMachine, SVMOptimizer};
pub use crate::persistence::{FeatureEncoder, ModelBundle};
pub use crate::scoring::{AccuracyReport, ConfusionMatrix};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
