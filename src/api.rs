//! High-level training and testing entry points
//!
//! [`ModelBundle::train_and_test_with_csv_data`] drives one complete pass:
//! read the training file, build the class map, standardize, train, score,
//! optionally write predictions back, then do the same for the testing file
//! (scoring only). [`run`] wraps it with model loading, source resolution,
//! the seeded random source and the final save.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rclass::api::{run, RunOptions};
//! use rclass::core::{CancellationToken, NullProgress};
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> rclass::core::Result<()> {
//! // Trains on iris.train.csv, tests on iris.test.csv
//! let (training, testing) = run(
//!     Path::new("model.json"),
//!     &[PathBuf::from("iris")],
//!     &RunOptions::default(),
//!     &NullProgress,
//!     &CancellationToken::new(),
//! )?;
//! if let Some(testing) = testing {
//!     println!("Test agreement: {:.2}%", testing.overall_agreement() * 100.0);
//! }
//! # let _ = training;
//! # Ok(())
//! # }
//! ```

use crate::classifier::ClassifierModel;
use crate::core::{
    AnswerCodeMap, CancellationToken, Classifier, ClassifierError, FeatureVector, ProgressEvent,
    ProgressSink, Result, TrainContext,
};
use crate::data::{CsvData, CsvReader};
use crate::persistence::ModelBundle;
use crate::scoring::{
    score_predictions, AccuracyReport, ConfusionMatrix, UnknownPolicy, UNKNOWN_CLASS_NAME,
};
use crate::utils::scaling::{standardize, Standardization};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::path::{Path, PathBuf};

/// Training and testing matrices of one run
pub type AccuracyPair = (Option<ConfusionMatrix>, Option<ConfusionMatrix>);

/// Options of the top-level [`run`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Score with the trained model without retraining it
    pub test_only: bool,
    /// Write `Prediction` and `Probability` columns back into the CSV files
    pub update_in_place: bool,
    /// Overrides the seed stored in the model configuration
    pub seed: Option<u64>,
}

impl ModelBundle {
    /// Train (unless `test_only`) and score against CSV sources.
    ///
    /// Sources that do not exist are skipped, but at least one must exist.
    /// The bundle is only updated when the whole pass succeeds; on error or
    /// cancellation it is left as it was.
    #[allow(clippy::too_many_arguments)]
    pub fn train_and_test_with_csv_data(
        &mut self,
        test_only: bool,
        training_source: Option<&Path>,
        testing_source: Option<&Path>,
        update_in_place: bool,
        rng: &mut dyn RngCore,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<AccuracyPair> {
        if !self.is_configured() {
            return Err(ClassifierError::Configuration(
                "model is not configured".to_string(),
            ));
        }
        if test_only && !self.is_trained() {
            return Err(ClassifierError::ModelNotTrained);
        }
        let training_source = training_source.filter(|p| p.exists());
        let testing_source = testing_source.filter(|p| p.exists());
        if training_source.is_none() && testing_source.is_none() {
            return Err(ClassifierError::format(
                "(none)",
                "neither a training nor a testing source exists",
            ));
        }

        let mut staged = self.clone();
        let config = staged
            .config
            .clone()
            .ok_or_else(|| ClassifierError::Configuration("model is not configured".to_string()))?;
        config.validate()?;
        let reader = CsvReader::new(config.progress_batch, progress, cancel);

        let mut training = None;
        if let Some(path) = training_source {
            let (data, mut inputs) =
                staged.load_source(&reader, path, "training", progress, cancel)?;

            if !test_only {
                staged.answer_codes = AnswerCodeMap::build(&config.negative_class, data.answers())?;
                let codes = data
                    .answers()
                    .map(|a| staged.answer_codes.code_of(a))
                    .collect::<Option<Vec<usize>>>()
                    .ok_or_else(|| {
                        ClassifierError::Configuration(
                            "training label missing from the answer map".to_string(),
                        )
                    })?;

                staged.standardization = Some(standardize(&mut inputs)?);
                let mut classifier =
                    ClassifierModel::from_config(&config.classifier, staged.answer_codes.len());

                cancel.check()?;
                info!(
                    "Training {} on {} examples, {} classes",
                    classifier.kind(),
                    inputs.len(),
                    staged.answer_codes.len()
                );
                classifier
                    .train(&inputs, &codes, &mut TrainContext::new(rng, progress, cancel))
                    .map_err(|e| report_failure(e, progress))?;
                cancel.check()?;
                staged.classifier = Some(classifier);
            } else {
                staged.standardize_for_model(&mut inputs)?;
            }

            let matrix = staged.score_source(&reader, &data, &inputs, update_in_place, progress)?;
            training = Some(matrix);
            cancel.check()?;
        }

        let mut testing = None;
        if let Some(path) = testing_source {
            let (data, mut inputs) =
                staged.load_source(&reader, path, "testing", progress, cancel)?;
            staged.standardize_for_model(&mut inputs)?;
            let matrix = staged.score_source(&reader, &data, &inputs, update_in_place, progress)?;
            testing = Some(matrix);
            cancel.check()?;
        }

        staged.accuracy = Some(AccuracyReport::new(training.clone(), testing.clone()));
        *self = staged;
        Ok((training, testing))
    }

    /// Read one source, check it against the encoder, warn on suspicious data
    fn load_source(
        &mut self,
        reader: &CsvReader<'_>,
        path: &Path,
        role: &str,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(CsvData, Vec<FeatureVector>)> {
        cancel.check()?;
        progress.report(&ProgressEvent::new(
            "csv",
            format!("Reading {role} data from {}", path.display()),
        ));
        let data = reader.read_file(path)?;
        cancel.check()?;

        if data.is_empty() {
            return Err(ClassifierError::format(path, "no data rows"));
        }
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.check(path, &data.feature_names())?;
        }
        info!("Read {} {role} examples from {}", data.len(), path.display());

        let inputs = data.inputs();
        if Standardization::fit(&inputs)?.looks_standardized() {
            warn!(
                "{} already looks standardized; it may have been standardized upstream",
                path.display()
            );
            progress.report(
                &ProgressEvent::new(
                    "csv",
                    "Warning: data already looks standardized (mean 0, sigma 1)",
                )
                .indent(1),
            );
        }
        Ok((data, inputs))
    }

    fn standardize_for_model(&self, inputs: &mut [FeatureVector]) -> Result<()> {
        self.standardization
            .as_ref()
            .ok_or(ClassifierError::ModelNotTrained)?
            .apply_all(inputs)
    }

    /// Predict, score, and optionally rewrite the source with predictions
    fn score_source(
        &self,
        reader: &CsvReader<'_>,
        data: &CsvData,
        inputs: &[FeatureVector],
        update_in_place: bool,
        progress: &dyn ProgressSink,
    ) -> Result<ConfusionMatrix> {
        let classifier = self
            .classifier
            .as_ref()
            .ok_or(ClassifierError::ModelNotTrained)?;
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| ClassifierError::Configuration("model is not configured".to_string()))?;
        let policy = UnknownPolicy::from_config(config, &self.answer_codes)?;

        let predictions = classifier.predict_batch(inputs)?;
        let expected: Vec<Option<usize>> = data
            .answers()
            .map(|a| self.answer_codes.code_of(a))
            .collect();
        let unmapped = expected.iter().filter(|e| e.is_none()).count();
        if unmapped > 0 {
            warn!(
                "{unmapped} examples in {} have labels the model was not trained on",
                data.file.display()
            );
        }

        let scored = score_predictions(
            &predictions,
            &expected,
            self.answer_codes.len(),
            policy.as_ref(),
        )?;
        let template = format!(
            "{}: agreement {{}} over {{}} examples",
            data.file.display()
        );
        progress.report(
            &ProgressEvent::new("score", template)
                .value(scored.matrix.overall_agreement())
                .count(scored.matrix.total()),
        );

        if update_in_place {
            let rows: Vec<(String, Option<f64>)> = scored
                .codes
                .iter()
                .zip(predictions.iter())
                .map(|(&code, p)| {
                    let name = self.answer_codes.name_of(code).unwrap_or(UNKNOWN_CLASS_NAME);
                    (name.to_string(), p.score)
                })
                .collect();
            reader.update_predictions_in_place(&data.file, &rows)?;
        }
        Ok(scored.matrix)
    }
}

/// Turn the command-line CSV arguments into training and testing paths.
///
/// One argument naming an existing file is the training source. Any other
/// single argument is a basename for `<base>.train.csv` and `<base>.test.csv`.
/// Two arguments are the training and testing paths.
pub fn resolve_sources(args: &[PathBuf]) -> Result<(Option<PathBuf>, Option<PathBuf>)> {
    match args {
        [single] if single.is_file() => Ok((Some(single.clone()), None)),
        [base] => {
            let base = base.display().to_string();
            Ok((
                Some(PathBuf::from(format!("{base}.train.csv"))),
                Some(PathBuf::from(format!("{base}.test.csv"))),
            ))
        }
        [training, testing] => Ok((Some(training.clone()), Some(testing.clone()))),
        _ => Err(ClassifierError::InvalidParameter(format!(
            "expected a basename or one or two CSV paths, got {} arguments",
            args.len()
        ))),
    }
}

/// Load the model, run one training/testing pass and save the model.
///
/// This is the only place a random source is created; everything below it
/// receives the seeded generator.
pub fn run(
    model_path: &Path,
    csv_args: &[PathBuf],
    options: &RunOptions,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<AccuracyPair> {
    let mut bundle = ModelBundle::load(model_path)?;
    let (training, testing) = resolve_sources(csv_args)?;

    let seed = options
        .seed
        .or_else(|| bundle.config.as_ref().map(|c| c.seed))
        .unwrap_or_default();
    let mut rng = StdRng::seed_from_u64(seed);

    let result = bundle.train_and_test_with_csv_data(
        options.test_only,
        training.as_deref(),
        testing.as_deref(),
        options.update_in_place,
        &mut rng,
        progress,
        cancel,
    );
    let accuracy = match result {
        Ok(accuracy) => accuracy,
        Err(e) if e.is_cancellation() => {
            info!("Run cancelled; {} left unchanged", model_path.display());
            return Err(e);
        }
        Err(e) => return Err(report_failure(e, progress)),
    };

    bundle.save(model_path)?;
    info!("Saved {}", model_path.display());
    Ok(accuracy)
}

/// Out-of-memory is always announced before it propagates
fn report_failure(e: ClassifierError, progress: &dyn ProgressSink) -> ClassifierError {
    if e.is_out_of_memory() {
        error!("Error: Out of memory: {e}");
        progress.report(&ProgressEvent::new("engine", "Error: Out of memory"));
    }
    e
}
