//! Platt scaling (sigmoid calibration)
//!
//! Fits P(y = +1 | f) = 1 / (1 + exp(A * f + B)) to the decision values of a
//! binary machine, using Newton's method with backtracking and Platt's
//! smoothed targets.

use crate::core::{ClassifierError, Result};
use serde::{Deserialize, Serialize};

const MAX_ITERATIONS: usize = 100;
const MIN_STEP: f64 = 1e-10;
const HESSIAN_RIDGE: f64 = 1e-12;
const TOLERANCE: f64 = 1e-5;

/// Fitted sigmoid parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattScaling {
    pub a: f64,
    pub b: f64,
}

impl PlattScaling {
    /// Fit the sigmoid to decision values and labels in {-1, +1}
    pub fn fit(decision_values: &[f64], labels: &[f64]) -> Result<Self> {
        let n = decision_values.len();
        if n != labels.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: n,
                actual: labels.len(),
            });
        }
        if n == 0 {
            return Err(ClassifierError::EmptyDataset);
        }

        let prior_pos = labels.iter().filter(|&&y| y > 0.0).count() as f64;
        let prior_neg = n as f64 - prior_pos;

        let hi_target = (prior_pos + 1.0) / (prior_pos + 2.0);
        let lo_target = 1.0 / (prior_neg + 2.0);
        let targets: Vec<f64> = labels
            .iter()
            .map(|&y| if y > 0.0 { hi_target } else { lo_target })
            .collect();

        let mut a = 0.0;
        let mut b = ((prior_neg + 1.0) / (prior_pos + 1.0)).ln();
        let mut fval = objective(decision_values, &targets, a, b);

        for _ in 0..MAX_ITERATIONS {
            let (mut h11, mut h22, mut h21) = (HESSIAN_RIDGE, HESSIAN_RIDGE, 0.0);
            let (mut g1, mut g2) = (0.0, 0.0);
            for (&f, &t) in decision_values.iter().zip(targets.iter()) {
                let (p, q) = probabilities(f * a + b);
                let d2 = p * q;
                h11 += f * f * d2;
                h22 += d2;
                h21 += f * d2;
                let d1 = t - p;
                g1 += f * d1;
                g2 += d1;
            }

            if g1.abs() < TOLERANCE && g2.abs() < TOLERANCE {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            let mut step = 1.0;
            let mut improved = false;
            while step >= MIN_STEP {
                let new_a = a + step * da;
                let new_b = b + step * db;
                let new_f = objective(decision_values, &targets, new_a, new_b);
                if new_f < fval + 1e-4 * step * gd {
                    a = new_a;
                    b = new_b;
                    fval = new_f;
                    improved = true;
                    break;
                }
                step /= 2.0;
            }

            if !improved {
                log::debug!("Platt scaling line search failed; keeping A={a}, B={b}");
                break;
            }
        }

        Ok(Self { a, b })
    }

    /// Probability of the positive class for a decision value
    pub fn probability(&self, decision_value: f64) -> f64 {
        probabilities(decision_value * self.a + self.b).0
    }
}

/// (P(+1), P(-1)) for the sigmoid argument, computed without overflow
fn probabilities(f_ab: f64) -> (f64, f64) {
    if f_ab >= 0.0 {
        let e = (-f_ab).exp();
        (e / (1.0 + e), 1.0 / (1.0 + e))
    } else {
        let e = f_ab.exp();
        (1.0 / (1.0 + e), e / (1.0 + e))
    }
}

/// Negative log likelihood of the smoothed targets
fn objective(decision_values: &[f64], targets: &[f64], a: f64, b: f64) -> f64 {
    decision_values
        .iter()
        .zip(targets.iter())
        .map(|(&f, &t)| {
            let f_ab = f * a + b;
            if f_ab >= 0.0 {
                t * f_ab + (1.0 + (-f_ab).exp()).ln()
            } else {
                (t - 1.0) * f_ab + (1.0 + f_ab.exp()).ln()
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platt_orders_probabilities() {
        let values = [-3.0, -2.0, -1.5, -0.2, 0.3, 1.2, 2.0, 2.5];
        let labels = [-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
        let platt = PlattScaling::fit(&values, &labels).unwrap();

        assert!(platt.a < 0.0, "positive decisions must map to high probability");
        assert!(platt.probability(2.0) > 0.8);
        assert!(platt.probability(-2.0) < 0.2);
        assert!(platt.probability(1.0) > platt.probability(0.0));
    }

    #[test]
    fn test_platt_probability_bounds() {
        let platt = PlattScaling { a: -5.0, b: 0.0 };
        for v in [-1e6, -10.0, 0.0, 10.0, 1e6] {
            let p = platt.probability(v);
            assert!((0.0..=1.0).contains(&p));
        }
        assert_eq!(platt.probability(0.0), 0.5);
    }

    #[test]
    fn test_platt_rejects_bad_input() {
        assert!(PlattScaling::fit(&[], &[]).is_err());
        assert!(PlattScaling::fit(&[1.0], &[1.0, -1.0]).is_err());
    }
}
