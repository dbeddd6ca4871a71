//! The two classifier families behind one closed type

pub mod neural;
pub mod svm;

pub use self::neural::{Network, NeuralNetworkClassifier};
pub use self::svm::{EnsembleMember, SvmClassifier};

use crate::config::ClassifierConfig;
use crate::core::{Classifier, FeatureVector, PredictionResult, Result, TrainContext};
use serde::{Deserialize, Serialize};

/// A classifier of either family, persisted with a `kind` tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierModel {
    NeuralNetwork(NeuralNetworkClassifier),
    SupportVectorMachine(SvmClassifier),
}

impl ClassifierModel {
    /// Untrained classifier for `number_of_classes` categories
    pub fn from_config(config: &ClassifierConfig, number_of_classes: usize) -> Self {
        match config {
            ClassifierConfig::NeuralNetwork(nn) => ClassifierModel::NeuralNetwork(
                NeuralNetworkClassifier::new(nn.clone(), number_of_classes),
            ),
            ClassifierConfig::SupportVectorMachine(svm) => ClassifierModel::SupportVectorMachine(
                SvmClassifier::new(svm.clone(), number_of_classes),
            ),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierModel::NeuralNetwork(_) => "neural network",
            ClassifierModel::SupportVectorMachine(_) => "support vector machine",
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            ClassifierModel::NeuralNetwork(nn) => nn,
            ClassifierModel::SupportVectorMachine(svm) => svm,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            ClassifierModel::NeuralNetwork(nn) => nn,
            ClassifierModel::SupportVectorMachine(svm) => svm,
        }
    }
}

impl Classifier for ClassifierModel {
    fn train(
        &mut self,
        inputs: &[FeatureVector],
        codes: &[usize],
        ctx: &mut TrainContext<'_>,
    ) -> Result<()> {
        self.inner_mut().train(inputs, codes, ctx)
    }

    fn predict(&self, input: &[f64]) -> Result<PredictionResult> {
        self.inner().predict(input)
    }

    fn predict_batch(&self, inputs: &[FeatureVector]) -> Result<Vec<PredictionResult>> {
        self.inner().predict_batch(inputs)
    }

    fn number_of_classes(&self) -> usize {
        self.inner().number_of_classes()
    }

    fn is_trained(&self) -> bool {
        self.inner().is_trained()
    }

    fn is_calibrated(&self) -> bool {
        self.inner().is_calibrated()
    }
}
