//! Core traits for the classifier families

use crate::core::{CancellationToken, FeatureVector, PredictionResult, ProgressSink, Result};
use rand::RngCore;

/// Collaborators threaded through every training call
pub struct TrainContext<'a> {
    /// Injected random source; nothing below the entry point creates its own
    pub rng: &'a mut dyn RngCore,
    pub progress: &'a dyn ProgressSink,
    pub cancel: &'a CancellationToken,
}

impl<'a> TrainContext<'a> {
    pub fn new(
        rng: &'a mut dyn RngCore,
        progress: &'a dyn ProgressSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            rng,
            progress,
            cancel,
        }
    }

    /// Reborrow for a nested call
    pub fn reborrow(&mut self) -> TrainContext<'_> {
        TrainContext {
            rng: &mut *self.rng,
            progress: self.progress,
            cancel: self.cancel,
        }
    }
}

/// Contract shared by the neural-network and SVM classifiers
pub trait Classifier {
    /// Train on standardized inputs and their category codes
    fn train(
        &mut self,
        inputs: &[FeatureVector],
        codes: &[usize],
        ctx: &mut TrainContext<'_>,
    ) -> Result<()>;

    /// Predict one standardized input
    fn predict(&self, input: &[f64]) -> Result<PredictionResult>;

    /// Predict many standardized inputs
    fn predict_batch(&self, inputs: &[FeatureVector]) -> Result<Vec<PredictionResult>> {
        inputs.iter().map(|input| self.predict(input)).collect()
    }

    fn number_of_classes(&self) -> usize;

    fn is_trained(&self) -> bool;

    /// Whether predictions carry a calibrated score
    fn is_calibrated(&self) -> bool {
        false
    }
}
