//! Property tests for preprocessing and label coding

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rclass::core::AnswerCodeMap;
use rclass::utils::sampling::stratified_split;
use rclass::utils::scaling::standardize;
use std::collections::HashSet;

fn feature_matrix() -> impl Strategy<Value = Vec<Vec<f64>>> {
    (1usize..5).prop_flat_map(|dim| {
        prop::collection::vec(prop::collection::vec(-1000.0f64..1000.0, dim), 2..40)
    })
}

proptest! {
    #[test]
    fn standardized_columns_are_centred(mut inputs in feature_matrix()) {
        let raw = inputs.clone();
        let params = standardize(&mut inputs).unwrap();
        let n = inputs.len() as f64;

        for j in 0..params.dim() {
            let mean = inputs.iter().map(|x| x[j]).sum::<f64>() / n;
            prop_assert!(mean.abs() < 1e-6, "column {} mean {}", j, mean);
            let variance = inputs.iter().map(|x| (x[j] - mean).powi(2)).sum::<f64>() / n;
            // Constant columns stay at zero instead of unit variance
            prop_assert!(variance < 1e-12 || (variance - 1.0).abs() < 1e-6);
        }

        for (row, original) in inputs.iter_mut().zip(&raw) {
            params.invert(row);
            for (a, b) in row.iter().zip(original) {
                prop_assert!((a - b).abs() < 1e-6 * (1.0 + b.abs()));
            }
        }
    }

    #[test]
    fn stratified_split_covers_every_category(
        codes in prop::collection::vec(0usize..5, 1..60),
        fraction in 0.0f64..=1.0,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let (first, second) = stratified_split(&codes, fraction, &mut rng).unwrap();

        let categories: HashSet<usize> = codes.iter().copied().collect();
        let in_first: HashSet<usize> = first.iter().map(|&i| codes[i]).collect();
        let in_second: HashSet<usize> = second.iter().map(|&i| codes[i]).collect();
        prop_assert_eq!(&in_first, &categories);
        prop_assert_eq!(&in_second, &categories);

        let union: HashSet<usize> = first.iter().chain(&second).copied().collect();
        prop_assert_eq!(union.len(), codes.len());
        prop_assert!(first.len() + second.len() >= codes.len());
    }

    #[test]
    fn answer_codes_are_stable(labels in prop::collection::vec("[A-Za-z]{1,6}", 0..20)) {
        let map = AnswerCodeMap::build("None", labels.iter().map(String::as_str)).unwrap();

        prop_assert_eq!(map.name_of(0), Some("None"));
        for code in 0..map.len() {
            let name = map.name_of(code).unwrap();
            prop_assert_eq!(map.code_of(name), Some(code));
        }
        for label in &labels {
            prop_assert!(map.code_of(label).is_some());
        }
    }
}
