//! Core type definitions shared by both classifier families

use crate::core::{ClassifierError, Result};
use serde::{Deserialize, Serialize};

/// Dense feature vector, fixed length per model
pub type FeatureVector = Vec<f64>;

/// Feature vector plus its string answer label
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub features: FeatureVector,
    pub answer: String,
}

impl LabeledExample {
    pub fn new(features: FeatureVector, answer: impl Into<String>) -> Self {
        Self {
            features,
            answer: answer.into(),
        }
    }
}

/// Predicted class code with an optional calibrated confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionResult {
    pub class_code: usize,
    /// Present only when the model is probability-calibrated, in [0, 1]
    pub score: Option<f64>,
}

impl PredictionResult {
    pub fn new(class_code: usize, score: Option<f64>) -> Self {
        Self { class_code, score }
    }

    pub fn uncalibrated(class_code: usize) -> Self {
        Self::new(class_code, None)
    }
}

/// Bidirectional mapping between class names and small integer codes.
///
/// Code 0 always holds the configured negative class. The remaining names are
/// the distinct training labels sorted case-insensitively. Once built the map
/// is fixed: unknown labels are reported by [`AnswerCodeMap::code_of`] as
/// `None` and never added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerCodeMap {
    names: Vec<String>,
}

impl AnswerCodeMap {
    /// Build the map from the negative class and the training labels
    pub fn build<'a, I>(negative_class: &str, labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let negative_class = negative_class.trim();
        if negative_class.is_empty() {
            return Err(ClassifierError::Configuration(
                "negative class name is not configured".to_string(),
            ));
        }

        let mut others: Vec<String> = Vec::new();
        for label in labels {
            let label = label.trim();
            if label.eq_ignore_ascii_case(negative_class)
                || others.iter().any(|n| n.eq_ignore_ascii_case(label))
            {
                continue;
            }
            others.push(label.to_string());
        }
        others.sort_by_key(|n| n.to_lowercase());

        let mut names = Vec::with_capacity(others.len() + 1);
        names.push(negative_class.to_string());
        names.extend(others);
        Ok(Self { names })
    }

    /// Case-insensitive lookup
    pub fn code_of(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn name_of(&self, code: usize) -> Option<&str> {
        self.names.get(code).map(String::as_str)
    }

    pub fn negative_class(&self) -> Option<&str> {
        self.name_of(0)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Signal raised by a solver that could not converge at a hyperparameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonConvergence {
    pub complexity: f64,
    pub iterations: usize,
}

impl From<NonConvergence> for ClassifierError {
    fn from(signal: NonConvergence) -> Self {
        ClassifierError::NonConvergence {
            complexity: signal.complexity,
        }
    }
}

/// Outcome of one training attempt.
///
/// Fatal problems travel in the surrounding `Result`; non-convergence is a
/// recoverable outcome the caller branches on.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainOutcome<T> {
    Converged(T),
    NotConverged(NonConvergence),
}

impl<T> TrainOutcome<T> {
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> TrainOutcome<U> {
        match self {
            TrainOutcome::Converged(value) => TrainOutcome::Converged(f(value)),
            TrainOutcome::NotConverged(signal) => TrainOutcome::NotConverged(signal),
        }
    }

    /// Treat non-convergence as a hard error
    pub fn into_result(self) -> Result<T> {
        match self {
            TrainOutcome::Converged(value) => Ok(value),
            TrainOutcome::NotConverged(signal) => Err(signal.into()),
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, TrainOutcome::Converged(_))
    }
}
