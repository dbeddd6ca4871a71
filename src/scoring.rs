//! Accuracy scoring: confusion matrices and the unknown-category policy
//!
//! Predictions whose calibrated score falls below the configured cutoff are
//! either translated to a configured class or moved to a synthetic "unknown"
//! class one past the real ones, so a hesitant model is never credited with a
//! correct answer it did not commit to.

use crate::config::{ModelConfig, ScoreKind};
use crate::core::{AnswerCodeMap, ClassifierError, PredictionResult, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name written for predictions moved to the synthetic unknown class
pub const UNKNOWN_CLASS_NAME: &str = "Unknown";

/// Low-confidence handling resolved against an answer map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnknownPolicy {
    pub cutoff: f64,
    /// Class code low-confidence predictions are translated to
    pub translate_to: Option<usize>,
}

impl UnknownPolicy {
    /// Resolve the configuration; `None` when the unknown category is off
    pub fn from_config(config: &ModelConfig, answers: &AnswerCodeMap) -> Result<Option<Self>> {
        if !config.use_unknown_category {
            return Ok(None);
        }
        let cutoff = match config.unknown_cutoff {
            Some(c) if (0.0..=1.0).contains(&c) => c,
            other => {
                return Err(ClassifierError::Configuration(format!(
                    "unknown category needs a cutoff within [0, 1], got {other:?}"
                )))
            }
        };
        let translate_to = match config.translate_unknown_to.as_deref() {
            None => None,
            Some(name) => Some(answers.code_of(name).ok_or_else(|| {
                ClassifierError::Configuration(format!(
                    "cannot translate unknown predictions to '{name}': class not in the answer map"
                ))
            })?),
        };
        Ok(Some(Self {
            cutoff,
            translate_to,
        }))
    }
}

/// Predicted codes after the unknown policy was applied
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownRemap {
    pub codes: Vec<usize>,
    /// Real classes, plus one when any synthetic unknown was assigned
    pub effective_classes: usize,
}

/// Apply the unknown-category policy to raw predictions
pub fn apply_unknown_policy(
    predictions: &[PredictionResult],
    number_of_classes: usize,
    policy: Option<&UnknownPolicy>,
) -> UnknownRemap {
    let mut synthetic = false;
    let codes = predictions
        .iter()
        .map(|p| match (policy, p.score) {
            (Some(policy), Some(score)) if score < policy.cutoff => match policy.translate_to {
                Some(code) => code,
                None => {
                    synthetic = true;
                    number_of_classes
                }
            },
            _ => p.class_code,
        })
        .collect();

    UnknownRemap {
        codes,
        effective_classes: if synthetic {
            number_of_classes + 1
        } else {
            number_of_classes
        },
    }
}

/// Counts indexed `[expected][predicted]`.
///
/// Index `classes` is an overflow bucket for expected labels the answer map
/// does not know; it never counts as agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfusionMatrix {
    pub classes: usize,
    pub counts: Vec<Vec<usize>>,
}

impl GeneralConfusionMatrix {
    pub fn new(expected: &[Option<usize>], predicted: &[usize], classes: usize) -> Result<Self> {
        if expected.len() != predicted.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: expected.len(),
                actual: predicted.len(),
            });
        }
        let overflow = classes;
        let mut counts = vec![vec![0usize; classes + 1]; classes + 1];
        for (e, &p) in expected.iter().zip(predicted.iter()) {
            let row = e.filter(|&c| c < classes).unwrap_or(overflow);
            counts[row][p.min(overflow)] += 1;
        }
        Ok(Self { classes, counts })
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.classes).map(|i| self.counts[i][i]).sum()
    }

    /// Share of examples whose prediction equals the expected class
    pub fn overall_agreement(&self) -> f64 {
        ratio(self.correct(), self.total())
    }
}

/// Two-class matrix with class 1 as the positive class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryConfusionMatrix {
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// Unknown expected labels predicted as the negative class
    pub unmatched: usize,
}

impl BinaryConfusionMatrix {
    fn from_general(general: &GeneralConfusionMatrix) -> Self {
        let m = &general.counts;
        Self {
            true_positives: m[1][1],
            true_negatives: m[0][0],
            false_positives: m[0][1] + m[2][1],
            false_negatives: m[1][0] + m[1][2],
            unmatched: m[0][2] + m[2][0] + m[2][2],
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives
            + self.true_negatives
            + self.false_positives
            + self.false_negatives
            + self.unmatched
    }

    pub fn overall_agreement(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    /// TP / (TP + FP); NaN when nothing was predicted positive
    pub fn precision(&self) -> f64 {
        self.true_positives as f64 / (self.true_positives + self.false_positives) as f64
    }

    /// TP / (TP + FN); NaN when no positives were expected
    pub fn recall(&self) -> f64 {
        self.true_positives as f64 / (self.true_positives + self.false_negatives) as f64
    }

    pub fn f_score(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        2.0 * p * r / (p + r)
    }
}

/// Confusion matrix of one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfusionMatrix {
    TwoClass(BinaryConfusionMatrix),
    General(GeneralConfusionMatrix),
}

impl ConfusionMatrix {
    /// Build the two-class matrix for exactly two classes, the general one otherwise
    pub fn build(expected: &[Option<usize>], predicted: &[usize], classes: usize) -> Result<Self> {
        let general = GeneralConfusionMatrix::new(expected, predicted, classes)?;
        Ok(if classes == 2 {
            ConfusionMatrix::TwoClass(BinaryConfusionMatrix::from_general(&general))
        } else {
            ConfusionMatrix::General(general)
        })
    }

    pub fn overall_agreement(&self) -> f64 {
        match self {
            ConfusionMatrix::TwoClass(m) => m.overall_agreement(),
            ConfusionMatrix::General(m) => m.overall_agreement(),
        }
    }

    pub fn total(&self) -> usize {
        match self {
            ConfusionMatrix::TwoClass(m) => m.total(),
            ConfusionMatrix::General(m) => m.total(),
        }
    }

    /// Value of `kind` with NaN normalized to 0. A general matrix only has a
    /// meaningful overall agreement, which it reports for every kind.
    pub fn score(&self, kind: ScoreKind) -> f64 {
        let value = match (self, kind) {
            (ConfusionMatrix::TwoClass(m), ScoreKind::FScore) => m.f_score(),
            (ConfusionMatrix::TwoClass(m), ScoreKind::Precision) => m.precision(),
            (ConfusionMatrix::TwoClass(m), ScoreKind::Recall) => m.recall(),
            (matrix, _) => matrix.overall_agreement(),
        };
        if value.is_nan() {
            0.0
        } else {
            value
        }
    }
}

/// Outcome of scoring one dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    /// Predicted codes after the unknown policy
    pub codes: Vec<usize>,
    pub effective_classes: usize,
    pub matrix: ConfusionMatrix,
}

/// Score raw predictions against expected codes (`None` = label unknown to
/// the answer map, always an error)
pub fn score_predictions(
    predictions: &[PredictionResult],
    expected: &[Option<usize>],
    number_of_classes: usize,
    policy: Option<&UnknownPolicy>,
) -> Result<Scored> {
    let remap = apply_unknown_policy(predictions, number_of_classes, policy);
    let matrix = ConfusionMatrix::build(expected, &remap.codes, remap.effective_classes)?;
    Ok(Scored {
        codes: remap.codes,
        effective_classes: remap.effective_classes,
        matrix,
    })
}

/// Training and testing matrices of the last completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub training: Option<ConfusionMatrix>,
    pub testing: Option<ConfusionMatrix>,
    pub created_at: DateTime<Utc>,
}

impl AccuracyReport {
    pub fn new(training: Option<ConfusionMatrix>, testing: Option<ConfusionMatrix>) -> Self {
        Self {
            training,
            testing,
            created_at: Utc::now(),
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn preds(codes: &[usize]) -> Vec<PredictionResult> {
        codes.iter().map(|&c| PredictionResult::uncalibrated(c)).collect()
    }

    #[test]
    fn test_binary_metrics() {
        // expected: 1 1 1 0 0 0 0 ; predicted: 1 1 0 1 0 0 0
        let expected: Vec<Option<usize>> = [1, 1, 1, 0, 0, 0, 0].iter().map(|&c| Some(c)).collect();
        let scored = score_predictions(&preds(&[1, 1, 0, 1, 0, 0, 0]), &expected, 2, None).unwrap();

        match &scored.matrix {
            ConfusionMatrix::TwoClass(m) => {
                assert_eq!(m.true_positives, 2);
                assert_eq!(m.false_negatives, 1);
                assert_eq!(m.false_positives, 1);
                assert_eq!(m.true_negatives, 3);
                assert_relative_eq!(m.precision(), 2.0 / 3.0);
                assert_relative_eq!(m.recall(), 2.0 / 3.0);
                assert_relative_eq!(m.f_score(), 2.0 / 3.0);
            }
            other => panic!("expected two-class matrix, got {other:?}"),
        }
        assert_relative_eq!(scored.matrix.overall_agreement(), 5.0 / 7.0);
    }

    #[test]
    fn test_nan_scores_normalized() {
        let expected = vec![Some(0), Some(0)];
        let scored = score_predictions(&preds(&[0, 0]), &expected, 2, None).unwrap();
        if let ConfusionMatrix::TwoClass(m) = &scored.matrix {
            assert!(m.precision().is_nan());
        }
        assert_eq!(scored.matrix.score(ScoreKind::Precision), 0.0);
        assert_eq!(scored.matrix.score(ScoreKind::FScore), 0.0);
        assert_eq!(scored.matrix.score(ScoreKind::OverallAgreement), 1.0);
    }

    #[test]
    fn test_general_matrix_agreement() {
        let expected = vec![Some(0), Some(1), Some(2), Some(2)];
        let scored = score_predictions(&preds(&[0, 2, 2, 2]), &expected, 3, None).unwrap();
        assert!(matches!(scored.matrix, ConfusionMatrix::General(_)));
        assert_relative_eq!(scored.matrix.overall_agreement(), 0.75);
        assert_relative_eq!(scored.matrix.score(ScoreKind::FScore), 0.75);
    }

    #[test]
    fn test_two_class_and_general_paths_agree() {
        let expected: Vec<Option<usize>> = [0, 1, 1, 0, 1].iter().map(|&c| Some(c)).collect();
        let predicted = [0, 1, 0, 0, 1];
        let two = ConfusionMatrix::build(&expected, &predicted, 2).unwrap();
        let general = GeneralConfusionMatrix::new(&expected, &predicted, 2).unwrap();
        assert_eq!(two.overall_agreement(), general.overall_agreement());
    }

    #[test]
    fn test_unmapped_expected_label_is_an_error() {
        let expected = vec![Some(1), None, Some(0)];
        let scored = score_predictions(&preds(&[1, 0, 0]), &expected, 2, None).unwrap();
        assert_eq!(scored.matrix.total(), 3);
        assert_relative_eq!(scored.matrix.overall_agreement(), 2.0 / 3.0);
    }

    #[test]
    fn test_unknown_policy_synthetic_class() {
        let predictions = vec![
            PredictionResult::new(1, Some(0.9)),
            PredictionResult::new(0, Some(0.3)),
            PredictionResult::new(1, None),
        ];
        let policy = UnknownPolicy {
            cutoff: 0.5,
            translate_to: None,
        };
        let remap = apply_unknown_policy(&predictions, 2, Some(&policy));
        assert_eq!(remap.codes, vec![1, 2, 1]);
        assert_eq!(remap.effective_classes, 3);

        // Expected 0 is not credited for the hesitant prediction
        let scored = score_predictions(
            &predictions,
            &[Some(1), Some(0), Some(1)],
            2,
            Some(&policy),
        )
        .unwrap();
        assert!(matches!(scored.matrix, ConfusionMatrix::General(_)));
        assert_relative_eq!(scored.matrix.overall_agreement(), 2.0 / 3.0);
    }

    #[test]
    fn test_unknown_policy_translation() {
        let predictions = vec![
            PredictionResult::new(2, Some(0.2)),
            PredictionResult::new(1, Some(0.8)),
        ];
        let policy = UnknownPolicy {
            cutoff: 0.5,
            translate_to: Some(0),
        };
        let remap = apply_unknown_policy(&predictions, 3, Some(&policy));
        assert_eq!(remap.codes, vec![0, 1]);
        assert_eq!(remap.effective_classes, 3);
    }

    #[test]
    fn test_policy_from_config() {
        let answers = AnswerCodeMap::build("None", ["cat", "dog"].iter().copied()).unwrap();
        let mut config = ModelConfig {
            use_unknown_category: true,
            unknown_cutoff: Some(0.4),
            translate_unknown_to: Some("DOG".to_string()),
            ..ModelConfig::default()
        };
        let policy = UnknownPolicy::from_config(&config, &answers).unwrap().unwrap();
        assert_eq!(policy.translate_to, Some(2));

        config.translate_unknown_to = Some("bird".to_string());
        assert!(matches!(
            UnknownPolicy::from_config(&config, &answers),
            Err(ClassifierError::Configuration(_))
        ));

        config.use_unknown_category = false;
        assert!(UnknownPolicy::from_config(&config, &answers).unwrap().is_none());
    }

    #[test]
    fn test_length_mismatch() {
        let result = score_predictions(&preds(&[0]), &[Some(0), Some(1)], 2, None);
        assert!(matches!(result, Err(ClassifierError::DimensionMismatch { .. })));
    }
}
