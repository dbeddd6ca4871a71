//! Error types for the training and evaluation engine

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Format error in {file}: {message}")]
    Format { file: String, message: String },

    #[error("Optimizer did not converge at complexity {complexity}")]
    NonConvergence { complexity: f64 },

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Model not trained")]
    ModelNotTrained,

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClassifierError {
    /// Build a format error tagged with the offending file
    pub fn format<P: AsRef<Path>>(file: P, message: impl Into<String>) -> Self {
        Self::Format {
            file: file.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// Cancellation is "did not complete", not a failure worth logging
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory(_))
    }
}

impl From<std::collections::TryReserveError> for ClassifierError {
    fn from(e: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
