//! Support-vector-machine classifier
//!
//! An ensemble of linear binary machines: one-vs-one with voting
//! ([`SvmStrategy::Multiclass`]) or one-vs-rest with the highest decision
//! value winning ([`SvmStrategy::Multilabel`]). Probability calibration runs
//! after training, one independent sub-problem per machine, in parallel.

use crate::config::{SvmConfig, SvmStrategy};
use crate::core::{
    CancellationToken, Classifier, ClassifierError, FeatureVector, PredictionResult,
    ProgressEvent, Result, TrainContext, TrainOutcome,
};
use crate::optimizer::{LinearMachine, SVMOptimizer};
use crate::training::complexity;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One binary machine of the ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMember {
    /// Class whose examples are labelled +1
    pub positive: usize,
    /// Class labelled -1; `None` means "every other class"
    pub negative: Option<usize>,
    pub machine: LinearMachine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmClassifier {
    pub config: SvmConfig,
    number_of_classes: usize,
    members: Vec<EnsembleMember>,
    /// Answer when training saw a single class and no machine could be built
    single_class: Option<usize>,
    /// Complexity the current machines were trained with
    complexity: Option<f64>,
    calibrated: bool,
    trained_at: Option<DateTime<Utc>>,
}

impl SvmClassifier {
    pub fn new(config: SvmConfig, number_of_classes: usize) -> Self {
        Self {
            config,
            number_of_classes,
            members: Vec::new(),
            single_class: None,
            complexity: None,
            calibrated: false,
            trained_at: None,
        }
    }

    pub fn complexity(&self) -> Option<f64> {
        self.complexity
    }

    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.trained_at
    }

    /// Train every binary machine at one complexity.
    ///
    /// Returns `NotConverged` as soon as any machine fails to converge; the
    /// previous ensemble is left in place in that case.
    pub fn train_at(
        &mut self,
        inputs: &[FeatureVector],
        codes: &[usize],
        complexity: f64,
        calibrate: bool,
        cancel: &CancellationToken,
    ) -> Result<TrainOutcome<()>> {
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

        let present = present_classes(codes, self.number_of_classes);
        if present.len() == 1 {
            self.members.clear();
            self.single_class = Some(present[0]);
            self.finish(complexity, calibrate);
            return Ok(TrainOutcome::Converged(()));
        }

        let optimizer = SVMOptimizer::linear(self.config.optimizer(complexity));
        let problems = self.subproblems(&present);
        let mut members = Vec::with_capacity(problems.len());
        for (positive, negative) in problems {
            cancel.check()?;
            let (sub_inputs, labels) = binary_problem(inputs, codes, positive, negative);
            match optimizer.train(&sub_inputs, &labels)? {
                TrainOutcome::Converged(machine) => members.push(EnsembleMember {
                    positive,
                    negative,
                    machine,
                }),
                TrainOutcome::NotConverged(signal) => {
                    return Ok(TrainOutcome::NotConverged(signal))
                }
            }
        }

        if calibrate {
            calibrate_members(&mut members, inputs, codes, cancel)?;
        }

        self.members = members;
        self.single_class = None;
        self.finish(complexity, calibrate);
        Ok(TrainOutcome::Converged(()))
    }

    fn finish(&mut self, complexity: f64, calibrated: bool) {
        self.complexity = Some(complexity);
        self.calibrated = calibrated;
        self.trained_at = Some(Utc::now());
    }

    fn subproblems(&self, present: &[usize]) -> Vec<(usize, Option<usize>)> {
        match self.config.strategy {
            SvmStrategy::Multiclass => {
                let mut pairs = Vec::new();
                for (a, &i) in present.iter().enumerate() {
                    for &j in &present[a + 1..] {
                        pairs.push((i, Some(j)));
                    }
                }
                pairs
            }
            SvmStrategy::Multilabel => present.iter().map(|&k| (k, None)).collect(),
        }
    }

    fn predict_one_vs_one(&self, input: &[f64]) -> PredictionResult {
        let mut votes = vec![0usize; self.number_of_classes];
        let mut pairwise = vec![0.0; self.number_of_classes];
        let mut involved = vec![false; self.number_of_classes];

        for member in &self.members {
            let Some(negative) = member.negative else {
                continue;
            };
            let winner = if member.machine.decision_function(input) >= 0.0 {
                member.positive
            } else {
                negative
            };
            votes[winner] += 1;
            involved[member.positive] = true;
            involved[negative] = true;

            if let Some(p) = member.machine.probability(input) {
                pairwise[member.positive] += p;
                pairwise[negative] += 1.0 - p;
            }
        }

        let best = argmax_lowest(votes.iter().map(|&v| v as f64));
        let score = if self.calibrated {
            // Mean over the k - 1 machines the winner takes part in
            let k = involved.iter().filter(|&&b| b).count();
            if k > 1 {
                Some((pairwise[best] / (k - 1) as f64).clamp(0.0, 1.0))
            } else {
                None
            }
        } else {
            None
        };
        PredictionResult::new(best, score)
    }

    fn predict_one_vs_rest(&self, input: &[f64]) -> PredictionResult {
        let mut best: Option<(&EnsembleMember, f64)> = None;
        for member in &self.members {
            let value = member.machine.decision_function(input);
            if best.map_or(true, |(_, b)| value > b) {
                best = Some((member, value));
            }
        }
        match best {
            Some((member, _)) => PredictionResult::new(
                member.positive,
                if self.calibrated {
                    member.machine.probability(input)
                } else {
                    None
                },
            ),
            None => PredictionResult::uncalibrated(0),
        }
    }
}

impl Classifier for SvmClassifier {
    fn train(
        &mut self,
        inputs: &[FeatureVector],
        codes: &[usize],
        ctx: &mut TrainContext<'_>,
    ) -> Result<()> {
        ctx.progress.report(
            &ProgressEvent::new("svm", "Training SVM on {} examples, {} classes")
                .count(inputs.len())
                .count(self.number_of_classes),
        );
        let chosen = match self.config.complexity {
            Some(c) => c,
            None => {
                let mut search = complexity::ComplexitySearch::for_svm(
                    &self.config,
                    self.number_of_classes,
                    inputs,
                    codes,
                    ctx,
                )?;
                search.select(ctx.progress, ctx.cancel)?
            }
        };
        complexity::train_final(self, inputs, codes, chosen, ctx)
    }

    fn predict(&self, input: &[f64]) -> Result<PredictionResult> {
        if !self.is_trained() {
            return Err(ClassifierError::ModelNotTrained);
        }
        if let Some(class) = self.single_class {
            return Ok(PredictionResult::new(
                class,
                if self.calibrated { Some(1.0) } else { None },
            ));
        }
        let expected = self.members[0].machine.weights.len();
        if input.len() != expected {
            return Err(ClassifierError::DimensionMismatch {
                expected,
                actual: input.len(),
            });
        }
        Ok(match self.config.strategy {
            SvmStrategy::Multiclass => self.predict_one_vs_one(input),
            SvmStrategy::Multilabel => self.predict_one_vs_rest(input),
        })
    }

    fn number_of_classes(&self) -> usize {
        self.number_of_classes
    }

    fn is_trained(&self) -> bool {
        self.trained_at.is_some() && (self.single_class.is_some() || !self.members.is_empty())
    }

    fn is_calibrated(&self) -> bool {
        self.calibrated
    }
}

/// Classes with at least one example, ascending
fn present_classes(codes: &[usize], number_of_classes: usize) -> Vec<usize> {
    let mut seen = vec![false; number_of_classes];
    for &c in codes {
        seen[c] = true;
    }
    (0..number_of_classes).filter(|&c| seen[c]).collect()
}

/// Rows and ±1 labels for one ensemble member
fn binary_problem(
    inputs: &[FeatureVector],
    codes: &[usize],
    positive: usize,
    negative: Option<usize>,
) -> (Vec<FeatureVector>, Vec<f64>) {
    inputs
        .iter()
        .zip(codes.iter())
        .filter_map(|(x, &c)| {
            if c == positive {
                Some((x.clone(), 1.0))
            } else if negative.map_or(true, |n| n == c) {
                Some((x.clone(), -1.0))
            } else {
                None
            }
        })
        .unzip()
}

/// Fit each member's sigmoid concurrently; each task reads its own slice of
/// the data and writes only its own machine
fn calibrate_members(
    members: &mut [EnsembleMember],
    inputs: &[FeatureVector],
    codes: &[usize],
    cancel: &CancellationToken,
) -> Result<()> {
    members.par_iter_mut().try_for_each(|member| {
        cancel.check()?;
        let (sub_inputs, labels) = binary_problem(inputs, codes, member.positive, member.negative);
        member.machine.calibrate(&sub_inputs, &labels)
    })
}

/// Index of the largest value, ties going to the lowest index
pub(crate) fn argmax_lowest<I: IntoIterator<Item = f64>>(values: I) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.into_iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_class_data() -> (Vec<FeatureVector>, Vec<usize>) {
        blobs(&[(-3.0, 0.0), (3.0, 0.0), (0.0, 3.0)])
    }

    fn blobs(centers: &[(f64, f64)]) -> (Vec<FeatureVector>, Vec<usize>) {
        let mut inputs = Vec::new();
        let mut codes = Vec::new();
        for (code, (cx, cy)) in centers.iter().enumerate() {
            for k in 0..8 {
                let dx = (k % 3) as f64 * 0.2 - 0.2;
                let dy = (k / 3) as f64 * 0.2 - 0.2;
                inputs.push(vec![cx + dx, cy + dy]);
                codes.push(code);
            }
        }
        (inputs, codes)
    }

    fn fixed(strategy: SvmStrategy) -> SvmConfig {
        SvmConfig {
            strategy,
            complexity: Some(1.0),
            ..SvmConfig::default()
        }
    }

    #[test]
    fn test_one_vs_one_ensemble() {
        let (inputs, codes) = three_class_data();
        let mut svm = SvmClassifier::new(fixed(SvmStrategy::Multiclass), 3);
        let outcome = svm
            .train_at(&inputs, &codes, 1.0, true, &CancellationToken::new())
            .unwrap();
        assert!(outcome.is_converged());
        assert_eq!(svm.members().len(), 3);
        assert!(svm.is_trained());

        for (x, &c) in inputs.iter().zip(codes.iter()) {
            let prediction = svm.predict(x).unwrap();
            assert_eq!(prediction.class_code, c);
            let score = prediction.score.expect("calibrated");
            assert!((0.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn test_one_vs_one_confidence_does_not_shrink_with_classes() {
        let centers = [(-4.0, 0.0), (4.0, 0.0), (0.0, 4.0), (0.0, -4.0)];
        for k in 2..=4 {
            let (inputs, codes) = blobs(&centers[..k]);
            let mut svm = SvmClassifier::new(fixed(SvmStrategy::Multiclass), k);
            svm.train_at(&inputs, &codes, 1.0, true, &CancellationToken::new())
                .unwrap();

            let mut max_score: f64 = 0.0;
            for (x, &c) in inputs.iter().zip(codes.iter()) {
                let prediction = svm.predict(x).unwrap();
                assert_eq!(prediction.class_code, c, "{k} classes");
                max_score = max_score.max(prediction.score.expect("calibrated"));
            }
            assert!(max_score > 0.75, "{k} classes: best score {max_score}");
        }
    }

    #[test]
    fn test_one_vs_rest_ensemble() {
        let (inputs, codes) = three_class_data();
        let mut svm = SvmClassifier::new(fixed(SvmStrategy::Multilabel), 3);
        svm.train_at(&inputs, &codes, 1.0, false, &CancellationToken::new())
            .unwrap();

        assert_eq!(svm.members().len(), 3);
        assert!(!svm.is_calibrated());
        let predictions = svm.predict_batch(&inputs).unwrap();
        for (p, &c) in predictions.iter().zip(codes.iter()) {
            assert_eq!(p.class_code, c);
            assert_eq!(p.score, None);
        }
    }

    #[test]
    fn test_absent_class_gets_no_machine() {
        // class 0 (the negative class) has no examples
        let inputs = vec![vec![1.0], vec![1.2], vec![-1.0], vec![-1.2]];
        let codes = vec![1, 1, 2, 2];
        let mut svm = SvmClassifier::new(fixed(SvmStrategy::Multiclass), 3);
        svm.train_at(&inputs, &codes, 1.0, false, &CancellationToken::new())
            .unwrap();

        assert_eq!(svm.members().len(), 1);
        assert_eq!(svm.predict(&[2.0]).unwrap().class_code, 1);
        assert_eq!(svm.predict(&[-2.0]).unwrap().class_code, 2);
    }

    #[test]
    fn test_single_class_training() {
        let mut svm = SvmClassifier::new(fixed(SvmStrategy::Multiclass), 2);
        svm.train_at(&[vec![1.0], vec![2.0]], &[1, 1], 1.0, true, &CancellationToken::new())
            .unwrap();
        assert_eq!(
            svm.predict(&[5.0]).unwrap(),
            PredictionResult::new(1, Some(1.0))
        );
    }

    #[test]
    fn test_untrained_and_bad_codes() {
        let svm = SvmClassifier::new(SvmConfig::default(), 2);
        assert!(matches!(svm.predict(&[0.0]), Err(ClassifierError::ModelNotTrained)));

        let mut svm = SvmClassifier::new(SvmConfig::default(), 2);
        let result = svm.train_at(&[vec![0.0]], &[5], 1.0, false, &CancellationToken::new());
        assert!(matches!(result, Err(ClassifierError::InvalidParameter(_))));
    }

    #[test]
    fn test_cancelled_calibration() {
        let (inputs, codes) = three_class_data();
        let token = CancellationToken::new();
        token.cancel();
        let mut svm = SvmClassifier::new(fixed(SvmStrategy::Multiclass), 3);
        let result = svm.train_at(&inputs, &codes, 1.0, true, &token);
        assert!(matches!(result, Err(ClassifierError::Cancelled)));
        assert!(!svm.is_trained());
    }

    #[test]
    fn test_argmax_lowest_tie() {
        assert_eq!(argmax_lowest([1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax_lowest([0.0, 0.0]), 0);
    }
}
