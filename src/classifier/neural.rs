//! Feed-forward neural-network classifier
//!
//! Sigmoid units throughout, one output per class with one-hot targets,
//! trained by online back-propagation with momentum. Predictions are the
//! arg-max output and carry no calibrated score.

use crate::classifier::svm::argmax_lowest;
use crate::config::NeuralNetworkConfig;
use crate::core::{
    Classifier, ClassifierError, FeatureVector, PredictionResult, ProgressEvent, Result,
    TrainContext,
};
use crate::training::early_stopping::{EarlyStoppingTrainer, EpochModel};
use crate::utils::sampling::{select, stratified_split};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Layer {
    /// One row of incoming weights per neuron
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
    #[serde(skip)]
    weight_velocity: Vec<Vec<f64>>,
    #[serde(skip)]
    bias_velocity: Vec<f64>,
}

impl Layer {
    fn new(n_in: usize, n_out: usize, rng: &mut dyn RngCore) -> Result<Self> {
        // Xavier initialization
        let limit = (6.0 / (n_in + n_out) as f64).sqrt();
        let mut weights = Vec::new();
        weights.try_reserve_exact(n_out)?;
        for _ in 0..n_out {
            let mut row = Vec::new();
            row.try_reserve_exact(n_in)?;
            row.extend((0..n_in).map(|_| rng.gen_range(-limit..limit)));
            weights.push(row);
        }
        let biases = (0..n_out).map(|_| rng.gen_range(-limit..limit)).collect();
        Ok(Self {
            weights,
            biases,
            weight_velocity: Vec::new(),
            bias_velocity: Vec::new(),
        })
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(self.biases.iter())
            .map(|(row, b)| {
                let z: f64 = row.iter().zip(input.iter()).map(|(w, x)| w * x).sum();
                sigmoid(z + b)
            })
            .collect()
    }

    /// Momentum buffers are transient and rebuilt after loading
    fn ensure_velocity(&mut self) -> Result<()> {
        if self.weight_velocity.len() == self.weights.len() {
            return Ok(());
        }
        let mut velocity = Vec::new();
        velocity.try_reserve_exact(self.weights.len())?;
        for row in &self.weights {
            let mut v = Vec::new();
            v.try_reserve_exact(row.len())?;
            v.resize(row.len(), 0.0);
            velocity.push(v);
        }
        self.weight_velocity = velocity;
        self.bias_velocity = vec![0.0; self.biases.len()];
        Ok(())
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Multi-layer perceptron
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    layers: Vec<Layer>,
    learning_rate: f64,
    momentum: f64,
}

impl Network {
    pub fn new(
        inputs: usize,
        hidden: &[usize],
        outputs: usize,
        learning_rate: f64,
        momentum: f64,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        let mut sizes = vec![inputs];
        sizes.extend_from_slice(hidden);
        sizes.push(outputs);

        let layers = sizes
            .windows(2)
            .map(|pair| Layer::new(pair[0], pair[1], &mut *rng))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            layers,
            learning_rate,
            momentum,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.layers
            .first()
            .and_then(|l| l.weights.first())
            .map_or(0, Vec::len)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.biases.len())
    }

    /// Output activations for one input
    pub fn outputs(&self, input: &[f64]) -> Vec<f64> {
        self.layers
            .iter()
            .fold(input.to_vec(), |activation, layer| layer.forward(&activation))
    }

    fn classify(&self, input: &[f64]) -> usize {
        argmax_lowest(self.outputs(input))
    }

    /// One back-propagation step on a single example
    fn learn(&mut self, input: &[f64], target: usize) -> Result<()> {
        let mut activations = Vec::new();
        activations.try_reserve_exact(self.layers.len() + 1)?;
        activations.push(input.to_vec());
        for layer in &self.layers {
            let next = layer.forward(&activations[activations.len() - 1]);
            activations.push(next);
        }

        let output = &activations[self.layers.len()];
        let mut delta: Vec<f64> = output
            .iter()
            .enumerate()
            .map(|(k, &o)| {
                let t = if k == target { 1.0 } else { 0.0 };
                (o - t) * o * (1.0 - o)
            })
            .collect();

        for index in (0..self.layers.len()).rev() {
            let previous = &activations[index];
            let back = if index > 0 {
                let layer = &self.layers[index];
                let mut back = vec![0.0; previous.len()];
                for (row, d) in layer.weights.iter().zip(delta.iter()) {
                    for (b, w) in back.iter_mut().zip(row.iter()) {
                        *b += w * d;
                    }
                }
                for (b, &a) in back.iter_mut().zip(previous.iter()) {
                    *b *= a * (1.0 - a);
                }
                Some(back)
            } else {
                None
            };

            let (rate, momentum) = (self.learning_rate, self.momentum);
            let layer = &mut self.layers[index];
            layer.ensure_velocity()?;
            for (n, &d) in delta.iter().enumerate() {
                for (i, &a) in previous.iter().enumerate() {
                    let v = &mut layer.weight_velocity[n][i];
                    *v = momentum * *v - rate * d * a;
                    layer.weights[n][i] += *v;
                }
                let v = &mut layer.bias_velocity[n];
                *v = momentum * *v - rate * d;
                layer.biases[n] += *v;
            }

            if let Some(back) = back {
                delta = back;
            }
        }
        Ok(())
    }
}

impl EpochModel for Network {
    fn train_epoch(
        &mut self,
        inputs: &[FeatureVector],
        codes: &[usize],
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        let mut order: Vec<usize> = (0..inputs.len()).collect();
        order.shuffle(rng);
        for i in order {
            self.learn(&inputs[i], codes[i])?;
        }
        Ok(())
    }

    /// Misclassification rate
    fn validation_error(&self, inputs: &[FeatureVector], codes: &[usize]) -> Result<f64> {
        if inputs.is_empty() {
            return Ok(0.0);
        }
        let wrong = inputs
            .iter()
            .zip(codes.iter())
            .filter(|(x, &c)| self.classify(x) != c)
            .count();
        Ok(wrong as f64 / inputs.len() as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralNetworkClassifier {
    pub config: NeuralNetworkConfig,
    number_of_classes: usize,
    network: Option<Network>,
    /// Validation error of the kept network, when cross-validated
    validation_error: Option<f64>,
    trained_at: Option<DateTime<Utc>>,
}

impl NeuralNetworkClassifier {
    pub fn new(config: NeuralNetworkConfig, number_of_classes: usize) -> Self {
        Self {
            config,
            number_of_classes,
            network: None,
            validation_error: None,
            trained_at: None,
        }
    }

    pub fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    pub fn validation_error(&self) -> Option<f64> {
        self.validation_error
    }

    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.trained_at
    }

    fn fresh_network(&self, dim: usize, rng: &mut dyn RngCore) -> Result<Network> {
        Network::new(
            dim,
            &self.config.hidden_layers,
            self.number_of_classes,
            self.config.learning_rate,
            self.config.momentum,
            rng,
        )
    }

    /// Train candidates on one split, keep the one with the lowest validation error
    fn train_cross_validated(
        &self,
        inputs: &[FeatureVector],
        codes: &[usize],
        ctx: &mut TrainContext<'_>,
    ) -> Result<(Network, f64)> {
        let (train, validation) =
            stratified_split(codes, self.config.cross_validation_fraction, &mut *ctx.rng)?;
        let train_inputs = select(inputs, &train);
        let train_codes = select(codes, &train);
        let validation_inputs = select(inputs, &validation);
        let validation_codes = select(codes, &validation);

        let candidates = self.config.candidate_networks.max(1);
        let mut best: Option<(Network, f64)> = None;
        for candidate in 1..=candidates {
            ctx.cancel.check()?;
            ctx.progress.report(
                &ProgressEvent::new("network", "Training network {} of {}")
                    .count(candidate)
                    .count(candidates),
            );

            let mut trainer = EarlyStoppingTrainer::new(
                self.config.early_stopping_window,
                self.config.max_training_iterations,
                ctx.progress,
                ctx.cancel,
            );
            if !self.config.early_stopping {
                trainer = trainer.without_stopping();
            }
            let network = self.fresh_network(inputs[0].len(), &mut *ctx.rng)?;
            let result = trainer.train(
                network,
                (&train_inputs, &train_codes),
                (&validation_inputs, &validation_codes),
                &mut *ctx.rng,
            )?;
            debug!(
                "Candidate {candidate}: error {:.4} after {} epochs ({:?})",
                result.validation_error, result.epochs_run, result.reason
            );

            if best
                .as_ref()
                .map_or(true, |(_, error)| result.validation_error < *error)
            {
                best = Some((result.model, result.validation_error));
            }
        }
        best.ok_or(ClassifierError::ModelNotTrained)
    }

    fn train_full(
        &self,
        inputs: &[FeatureVector],
        codes: &[usize],
        ctx: &mut TrainContext<'_>,
    ) -> Result<Network> {
        let mut network = self.fresh_network(inputs[0].len(), &mut *ctx.rng)?;
        for epoch in 1..=self.config.max_training_iterations {
            ctx.cancel.check()?;
            network.train_epoch(inputs, codes, &mut *ctx.rng)?;
            if epoch % self.config.early_stopping_window.max(1) == 0 {
                ctx.progress.report(
                    &ProgressEvent::new("network", "Epoch {} of {}")
                        .count(epoch)
                        .count(self.config.max_training_iterations)
                        .indent(1)
                        .replacing(),
                );
            }
        }
        Ok(network)
    }
}

impl Classifier for NeuralNetworkClassifier {
    fn train(
        &mut self,
        inputs: &[FeatureVector],
        codes: &[usize],
        ctx: &mut TrainContext<'_>,
    ) -> Result<()> {
        if inputs.is_empty() {
            return Err(ClassifierError::EmptyDataset);
        }
        if inputs.len() != codes.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: inputs.len(),
                actual: codes.len(),
            });
        }
        if let Some(&bad) = codes.iter().find(|&&c| c >= self.number_of_classes) {
            return Err(ClassifierError::InvalidParameter(format!(
                "category code {bad} outside {} classes",
                self.number_of_classes
            )));
        }

        ctx.progress.report(
            &ProgressEvent::new("network", "Training neural network on {} examples, {} classes")
                .count(inputs.len())
                .count(self.number_of_classes),
        );

        let (network, error) = if self.config.cross_validation {
            let (network, error) = self.train_cross_validated(inputs, codes, ctx)?;
            (network, Some(error))
        } else {
            (self.train_full(inputs, codes, ctx)?, None)
        };

        if let Some(error) = error {
            info!("Neural network kept with validation error {error:.4}");
        }
        self.network = Some(network);
        self.validation_error = error;
        self.trained_at = Some(Utc::now());
        Ok(())
    }

    fn predict(&self, input: &[f64]) -> Result<PredictionResult> {
        let network = self.network.as_ref().ok_or(ClassifierError::ModelNotTrained)?;
        if input.len() != network.input_dim() {
            return Err(ClassifierError::DimensionMismatch {
                expected: network.input_dim(),
                actual: input.len(),
            });
        }
        Ok(PredictionResult::uncalibrated(network.classify(input)))
    }

    fn number_of_classes(&self) -> usize {
        self.number_of_classes
    }

    fn is_trained(&self) -> bool {
        self.network.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CancellationToken, NullProgress};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn blobs() -> (Vec<FeatureVector>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(7);
        let mut inputs = Vec::new();
        let mut codes = Vec::new();
        let centers = [(-2.0, -2.0), (2.0, 2.0), (-2.0, 2.0)];
        for (code, (cx, cy)) in centers.iter().enumerate() {
            for _ in 0..20 {
                inputs.push(vec![
                    cx + rng.gen_range(-0.5..0.5),
                    cy + rng.gen_range(-0.5..0.5),
                ]);
                codes.push(code);
            }
        }
        (inputs, codes)
    }

    fn train(config: NeuralNetworkConfig) -> NeuralNetworkClassifier {
        let (inputs, codes) = blobs();
        let mut rng = StdRng::seed_from_u64(42);
        let token = CancellationToken::new();
        let mut ctx = TrainContext::new(&mut rng, &NullProgress, &token);
        let mut classifier = NeuralNetworkClassifier::new(config, 3);
        classifier.train(&inputs, &codes, &mut ctx).unwrap();
        classifier
    }

    fn accuracy(classifier: &NeuralNetworkClassifier) -> f64 {
        let (inputs, codes) = blobs();
        let predictions = classifier.predict_batch(&inputs).unwrap();
        let correct = predictions
            .iter()
            .zip(codes.iter())
            .filter(|(p, &c)| p.class_code == c)
            .count();
        correct as f64 / codes.len() as f64
    }

    #[test]
    fn test_network_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let network = Network::new(4, &[5, 3], 2, 0.1, 0.0, &mut rng).unwrap();
        assert_eq!(network.input_dim(), 4);
        assert_eq!(network.output_dim(), 2);
        let out = network.outputs(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|&o| o > 0.0 && o < 1.0));
    }

    #[test]
    fn test_same_seed_same_network() {
        let a = Network::new(3, &[4], 2, 0.1, 0.0, &mut StdRng::seed_from_u64(5)).unwrap();
        let b = Network::new(3, &[4], 2, 0.1, 0.0, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_early_stopped_training() {
        let classifier = train(NeuralNetworkConfig {
            learning_rate: 0.5,
            ..NeuralNetworkConfig::default()
        });
        assert!(classifier.is_trained());
        assert!(classifier.validation_error().is_some());
        assert!(accuracy(&classifier) > 0.9);
        assert_eq!(classifier.predict(&[2.0, 2.0]).unwrap().score, None);
    }

    #[test]
    fn test_candidate_networks_without_early_stopping() {
        let classifier = train(NeuralNetworkConfig {
            learning_rate: 0.5,
            early_stopping: false,
            max_training_iterations: 200,
            candidate_networks: 3,
            ..NeuralNetworkConfig::default()
        });
        assert!(accuracy(&classifier) > 0.9);
    }

    #[test]
    fn test_training_without_cross_validation() {
        let classifier = train(NeuralNetworkConfig {
            learning_rate: 0.5,
            momentum: 0.5,
            cross_validation: false,
            max_training_iterations: 200,
            ..NeuralNetworkConfig::default()
        });
        assert!(classifier.validation_error().is_none());
        assert!(accuracy(&classifier) > 0.9);
    }

    #[test]
    fn test_predict_errors() {
        let untrained = NeuralNetworkClassifier::new(NeuralNetworkConfig::default(), 2);
        assert!(matches!(
            untrained.predict(&[0.0]),
            Err(ClassifierError::ModelNotTrained)
        ));

        let classifier = train(NeuralNetworkConfig {
            max_training_iterations: 5,
            ..NeuralNetworkConfig::default()
        });
        assert!(matches!(
            classifier.predict(&[0.0]),
            Err(ClassifierError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_cancelled_training() {
        let (inputs, codes) = blobs();
        let mut rng = StdRng::seed_from_u64(42);
        let token = CancellationToken::new();
        token.cancel();
        let mut ctx = TrainContext::new(&mut rng, &NullProgress, &token);
        let mut classifier = NeuralNetworkClassifier::new(NeuralNetworkConfig::default(), 3);
        let result = classifier.train(&inputs, &codes, &mut ctx);
        assert!(matches!(result, Err(ClassifierError::Cancelled)));
        assert!(!classifier.is_trained());
    }

    #[test]
    fn test_serialized_network_still_learns() {
        let classifier = train(NeuralNetworkConfig {
            max_training_iterations: 5,
            ..NeuralNetworkConfig::default()
        });
        let json = serde_json::to_string(&classifier).unwrap();
        let restored: NeuralNetworkClassifier = serde_json::from_str(&json).unwrap();
        let mut network = restored.network().unwrap().clone();

        let (inputs, codes) = blobs();
        network
            .train_epoch(&inputs, &codes, &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(network.output_dim(), 3);
    }
}
