//! Complexity (regularization) selection for the SVM classifier
//!
//! A two-phase search over a log2 grid: a coarse pass of ±10 octaves in whole
//! steps around the start value, then a fine pass of ±1 octave in quarter
//! steps around the coarse winner. Every candidate is trained on one
//! stratified split and scored on the other; results are memoized so no
//! complexity is ever trained twice by the same search.
//!
//! A candidate the solver cannot converge at marks the upper edge of the
//! usable range and ends the pass.

use crate::classifier::SvmClassifier;
use crate::config::{ScoreKind, SvmConfig};
use crate::core::{
    CancellationToken, Classifier, ClassifierError, FeatureVector, ProgressEvent, ProgressSink,
    Result, TrainContext, TrainOutcome,
};
use crate::scoring::score_predictions;
use crate::utils::sampling::{select, stratified_split};
use log::{debug, error, info, warn};
use rand::RngCore;
use std::collections::HashMap;

/// Trains a candidate at one complexity and scores it
pub trait ComplexityEvaluator {
    fn evaluate(&mut self, complexity: f64, cancel: &CancellationToken)
        -> Result<TrainOutcome<f64>>;
}

impl<F> ComplexityEvaluator for F
where
    F: FnMut(f64, &CancellationToken) -> Result<TrainOutcome<f64>>,
{
    fn evaluate(
        &mut self,
        complexity: f64,
        cancel: &CancellationToken,
    ) -> Result<TrainOutcome<f64>> {
        self(complexity, cancel)
    }
}

/// Early-termination thresholds of the coarse pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchLimits {
    pub max_decreasing_run: usize,
    pub max_equal_run: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_decreasing_run: 3,
            max_equal_run: 3,
        }
    }
}

impl From<&SvmConfig> for SearchLimits {
    fn from(config: &SvmConfig) -> Self {
        Self {
            max_decreasing_run: config.max_decreasing_run,
            max_equal_run: config.max_equal_run,
        }
    }
}

pub struct ComplexitySearch<E> {
    evaluator: E,
    limits: SearchLimits,
    memo: HashMap<u64, TrainOutcome<f64>>,
    trainings: usize,
}

impl<E: ComplexityEvaluator> ComplexitySearch<E> {
    pub fn new(evaluator: E, limits: SearchLimits) -> Self {
        Self {
            evaluator,
            limits,
            memo: HashMap::new(),
            trainings: 0,
        }
    }

    /// Number of candidates actually trained (memo hits excluded)
    pub fn trainings(&self) -> usize {
        self.trainings
    }

    /// Coarse search from 1, then fine search around the coarse winner
    pub fn select(
        &mut self,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<f64> {
        let coarse = self.search(1.0, false, progress, cancel)?;
        info!("Coarse complexity search chose {coarse}");
        let fine = self.search(coarse, true, progress, cancel)?;
        info!("Fine complexity search chose {fine}");
        progress.report(&ProgressEvent::new("complexity", "Selected complexity {}").value(fine));
        Ok(fine)
    }

    /// One pass over the grid centred on `round(log2(start))`
    pub fn search(
        &mut self,
        start: f64,
        fine_tune: bool,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<f64> {
        if !(start > 0.0) || !start.is_finite() {
            return Err(ClassifierError::InvalidParameter(format!(
                "Search start must be positive, got: {start}"
            )));
        }

        let center = start.log2().round();
        let (span, step): (f64, f64) = if fine_tune { (1.0, 0.25) } else { (10.0, 1.0) };
        let steps = (2.0 * span / step).round() as usize;
        let phase = if fine_tune { "fine" } else { "coarse" };

        let mut best = f64::NEG_INFINITY;
        let mut ties: Vec<f64> = Vec::new();
        let mut previous_ties: Vec<f64> = Vec::new();
        let mut decreasing = 0usize;
        let mut equal = 0usize;
        let mut last: Option<f64> = None;

        for k in 0..=steps {
            cancel.check()?;
            let complexity = (center - span + k as f64 * step).exp2();

            let score = match self.evaluate_memoized(complexity, progress, cancel)? {
                TrainOutcome::Converged(score) => score,
                TrainOutcome::NotConverged(_) => {
                    info!("No convergence at complexity {complexity}; ending {phase} search");
                    progress.report(
                        &ProgressEvent::new("complexity", "No convergence at complexity {}")
                            .value(complexity)
                            .indent(1),
                    );
                    // A lone best right before the boundary is not trusted
                    if ties.len() == 1 && decreasing == 0 && !previous_ties.is_empty() {
                        ties = std::mem::take(&mut previous_ties);
                    }
                    break;
                }
            };

            progress.report(
                &ProgressEvent::new("complexity", "Complexity {} scored {}")
                    .value(complexity)
                    .value(score)
                    .indent(1)
                    .replacing(),
            );

            if score > best {
                previous_ties = std::mem::take(&mut ties);
                best = score;
                ties.push(complexity);
                decreasing = 0;
                equal = 0;
            } else if score == best {
                ties.push(complexity);
                decreasing = 0;
                if complexity > 1.0 {
                    equal += 1;
                }
            } else {
                if last.is_some_and(|l| score < l) {
                    decreasing += 1;
                } else {
                    decreasing = 0;
                }
                equal = 0;
            }
            last = Some(score);

            if !fine_tune
                && (decreasing >= self.limits.max_decreasing_run
                    || equal >= self.limits.max_equal_run)
            {
                debug!(
                    "Coarse search stopped at {complexity}: {decreasing} decreasing, {equal} equal"
                );
                break;
            }
        }

        if ties.is_empty() {
            // Nothing converged: hand the smallest candidate to the retry loop
            let lowest = (center - span).exp2();
            warn!("No complexity converged in the {phase} search; falling back to {lowest}");
            return Ok(lowest);
        }

        // Median of the tied best, lower of the two middles
        Ok(ties[(ties.len() - 1) / 2])
    }

    fn evaluate_memoized(
        &mut self,
        complexity: f64,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TrainOutcome<f64>> {
        if let Some(outcome) = self.memo.get(&complexity.to_bits()) {
            return Ok(outcome.clone());
        }
        self.trainings += 1;
        let outcome = self
            .evaluator
            .evaluate(complexity, cancel)
            .map_err(|e| report_out_of_memory(e, complexity, progress))?;
        self.memo.insert(complexity.to_bits(), outcome.clone());
        Ok(outcome)
    }
}

/// Evaluator that trains an SVM ensemble on one split and scores the other
pub struct SvmEvaluator {
    config: SvmConfig,
    number_of_classes: usize,
    score_kind: ScoreKind,
    train_inputs: Vec<FeatureVector>,
    train_codes: Vec<usize>,
    validation_inputs: Vec<FeatureVector>,
    validation_codes: Vec<Option<usize>>,
}

impl SvmEvaluator {
    pub fn new(
        config: &SvmConfig,
        number_of_classes: usize,
        inputs: &[FeatureVector],
        codes: &[usize],
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        let (train, validation) = stratified_split(codes, config.search_fraction, rng)?;
        Ok(Self {
            config: config.clone(),
            number_of_classes,
            score_kind: config.score_kind,
            train_inputs: select(inputs, &train),
            train_codes: select(codes, &train),
            validation_inputs: select(inputs, &validation),
            validation_codes: validation.iter().map(|&i| Some(codes[i])).collect(),
        })
    }
}

impl ComplexityEvaluator for SvmEvaluator {
    fn evaluate(
        &mut self,
        complexity: f64,
        cancel: &CancellationToken,
    ) -> Result<TrainOutcome<f64>> {
        let mut candidate = SvmClassifier::new(self.config.clone(), self.number_of_classes);
        let outcome = candidate.train_at(
            &self.train_inputs,
            &self.train_codes,
            complexity,
            false,
            cancel,
        )?;
        match outcome {
            TrainOutcome::NotConverged(signal) => Ok(TrainOutcome::NotConverged(signal)),
            TrainOutcome::Converged(()) => {
                let predictions = candidate.predict_batch(&self.validation_inputs)?;
                let scored = score_predictions(
                    &predictions,
                    &self.validation_codes,
                    self.number_of_classes,
                    None,
                )?;
                Ok(TrainOutcome::Converged(scored.matrix.score(self.score_kind)))
            }
        }
    }
}

impl ComplexitySearch<SvmEvaluator> {
    /// Search over a fresh stratified split of the training data
    pub fn for_svm(
        config: &SvmConfig,
        number_of_classes: usize,
        inputs: &[FeatureVector],
        codes: &[usize],
        ctx: &mut TrainContext<'_>,
    ) -> Result<Self> {
        let evaluator = SvmEvaluator::new(config, number_of_classes, inputs, codes, &mut *ctx.rng)?;
        Ok(Self::new(evaluator, SearchLimits::from(config)))
    }
}

/// Train the full ensemble at `complexity`, shrinking it by the retry factor
/// after every non-converging attempt until training converges or is cancelled
pub fn train_final(
    svm: &mut SvmClassifier,
    inputs: &[FeatureVector],
    codes: &[usize],
    complexity: f64,
    ctx: &mut TrainContext<'_>,
) -> Result<()> {
    let calibrate = svm.config.calibrate_probabilities;
    let factor = svm.config.retry_factor;
    let mut complexity = complexity;

    loop {
        ctx.cancel.check()?;
        if !(complexity > f64::MIN_POSITIVE) {
            return Err(ClassifierError::NonConvergence { complexity });
        }
        let outcome = svm
            .train_at(inputs, codes, complexity, calibrate, ctx.cancel)
            .map_err(|e| report_out_of_memory(e, complexity, ctx.progress))?;
        match outcome {
            TrainOutcome::Converged(()) => {
                info!("Final SVM trained at complexity {complexity}");
                ctx.progress.report(
                    &ProgressEvent::new("svm", "Trained at complexity {}").value(complexity),
                );
                return Ok(());
            }
            TrainOutcome::NotConverged(signal) => {
                warn!(
                    "Final training did not converge at complexity {} after {} iterations; retrying",
                    signal.complexity, signal.iterations
                );
                complexity *= factor;
                ctx.progress.report(
                    &ProgressEvent::new("svm", "No convergence, retrying at complexity {}")
                        .value(complexity)
                        .indent(1),
                );
            }
        }
    }
}

/// Out-of-memory failures are always announced before they propagate
fn report_out_of_memory(
    e: ClassifierError,
    complexity: f64,
    progress: &dyn ProgressSink,
) -> ClassifierError {
    if e.is_out_of_memory() {
        error!("Error: Out of memory while training at complexity {complexity}: {e}");
        progress.report(&ProgressEvent::new("svm", "Error: Out of memory"));
    }
    e
}
