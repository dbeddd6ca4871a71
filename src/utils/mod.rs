//! Preprocessing utilities: feature standardization and stratified sampling

use crate::core::{ClassifierError, FeatureVector, Result};

/// Feature standardization utilities
pub mod scaling {
    use super::*;
    use serde::{Deserialize, Serialize};

    /// Added to a zero standard deviation so constant features stay finite
    pub const SIGMA_PERTURBATION: f64 = 1e-4;

    /// Per-feature mean and population standard deviation
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Standardization {
        pub mean: Vec<f64>,
        pub sigma: Vec<f64>,
    }

    impl Standardization {
        /// Compute the parameters without touching the inputs
        pub fn fit(inputs: &[FeatureVector]) -> Result<Self> {
            let first = inputs.first().ok_or(ClassifierError::EmptyDataset)?;
            let dim = first.len();
            let n = inputs.len() as f64;

            let mut mean = vec![0.0; dim];
            for input in inputs {
                if input.len() != dim {
                    return Err(ClassifierError::DimensionMismatch {
                        expected: dim,
                        actual: input.len(),
                    });
                }
                for (m, &v) in mean.iter_mut().zip(input.iter()) {
                    *m += v;
                }
            }
            for m in mean.iter_mut() {
                *m /= n;
            }

            let mut sigma = vec![0.0; dim];
            for input in inputs {
                for (j, &v) in input.iter().enumerate() {
                    sigma[j] += (v - mean[j]).powi(2);
                }
            }
            for s in sigma.iter_mut() {
                *s = (*s / n).sqrt();
                if *s == 0.0 {
                    *s += SIGMA_PERTURBATION;
                }
            }

            Ok(Self { mean, sigma })
        }

        pub fn dim(&self) -> usize {
            self.mean.len()
        }

        /// Standardize one vector in place
        pub fn apply(&self, input: &mut [f64]) -> Result<()> {
            if input.len() != self.dim() {
                return Err(ClassifierError::DimensionMismatch {
                    expected: self.dim(),
                    actual: input.len(),
                });
            }
            for (j, v) in input.iter_mut().enumerate() {
                *v = (*v - self.mean[j]) / self.sigma[j];
            }
            Ok(())
        }

        /// Standardize every vector in place
        pub fn apply_all(&self, inputs: &mut [FeatureVector]) -> Result<()> {
            inputs.iter_mut().try_for_each(|input| self.apply(input))
        }

        /// Undo [`Standardization::apply`] on one vector
        pub fn invert(&self, input: &mut [f64]) {
            for (j, v) in input.iter_mut().enumerate().take(self.dim()) {
                *v = *v * self.sigma[j] + self.mean[j];
            }
        }

        /// True when the data already looks standardized (mean ~0, sigma ~1
        /// for every feature), usually a sign of standardizing twice upstream
        pub fn looks_standardized(&self) -> bool {
            const TOLERANCE: f64 = 1e-3;
            self.dim() > 0
                && self.mean.iter().all(|m| m.abs() < TOLERANCE)
                && self.sigma.iter().all(|s| (s - 1.0).abs() < TOLERANCE)
        }
    }

    /// Standardize `inputs` in place and return the parameters.
    ///
    /// The raw values are overwritten; clone first if they are still needed.
    pub fn standardize(inputs: &mut [FeatureVector]) -> Result<Standardization> {
        let params = Standardization::fit(inputs)?;
        params.apply_all(inputs)?;
        Ok(params)
    }
}

/// Category-preserving subset sampling
pub mod sampling {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use std::collections::BTreeMap;

    /// Split example indices into two subsets per category.
    ///
    /// Within each category the indices are shuffled with `rng`, the first
    /// `round(n * fraction)` (at least one) go to the first subset and the rest
    /// (at least one) to the second. A category with a single example, or a
    /// fraction that would leave one side empty, shares one example between
    /// both subsets.
    pub fn stratified_split<R: Rng + ?Sized>(
        codes: &[usize],
        fraction: f64,
        rng: &mut R,
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ClassifierError::InvalidParameter(format!(
                "Subset fraction must be within [0, 1], got: {fraction}"
            )));
        }

        let mut by_category: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &code) in codes.iter().enumerate() {
            by_category.entry(code).or_default().push(i);
        }

        let mut subset1 = Vec::with_capacity((codes.len() as f64 * fraction) as usize + 1);
        let mut subset2 = Vec::with_capacity(codes.len());

        for indices in by_category.values_mut() {
            indices.shuffle(rng);
            let n = indices.len();
            let take = ((n as f64 * fraction).round() as usize).clamp(1, n);

            subset1.extend_from_slice(&indices[..take]);
            if take < n {
                subset2.extend_from_slice(&indices[take..]);
            } else {
                subset2.push(indices[n - 1]);
            }
        }

        Ok((subset1, subset2))
    }

    /// Gather the rows named by `indices`
    pub fn select<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
        indices.iter().map(|&i| items[i].clone()).collect()
    }
}
