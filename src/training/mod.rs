//! Hyperparameter selection around the classifiers
//!
//! - [`complexity`]: two-phase log2 grid search for the SVM complexity
//! - [`early_stopping`]: sliding-window early stopping for epoch-trained networks

pub mod complexity;
pub mod early_stopping;

pub use self::complexity::{train_final, ComplexityEvaluator, ComplexitySearch, SearchLimits};
pub use self::early_stopping::{EarlyStopped, EarlyStoppingTrainer, EpochModel, StopReason};
