//! Model bundle serialization and persistence
//!
//! The bundle is everything a run needs between invocations: configuration,
//! feature layout, class map, standardization, trained classifier and the
//! last accuracy report. It is stored as pretty-printed JSON and replaced
//! atomically, so an interrupted save never leaves a truncated model behind.

use crate::classifier::ClassifierModel;
use crate::config::ModelConfig;
use crate::core::{AnswerCodeMap, Classifier, ClassifierError, Result};
use crate::scoring::{AccuracyReport, ConfusionMatrix};
use crate::utils::scaling::Standardization;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Feature columns the model was set up for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    pub feature_names: Vec<String>,
}

impl FeatureEncoder {
    pub fn new(feature_names: Vec<String>) -> Self {
        Self { feature_names }
    }

    /// Encoder for `count` unnamed features, `f0`, `f1`, ...
    pub fn with_count(count: usize) -> Self {
        Self::new((0..count).map(|i| format!("f{i:x}")).collect())
    }

    pub fn dim(&self) -> usize {
        self.feature_names.len()
    }

    /// Check a file's feature columns against this encoder.
    ///
    /// An empty encoder adopts whatever the first file provides.
    pub fn check(&mut self, file: &Path, names: &[String]) -> Result<()> {
        if self.feature_names.is_empty() {
            self.feature_names = names.to_vec();
            return Ok(());
        }
        if self.feature_names.len() != names.len() {
            return Err(ClassifierError::format(
                file,
                format!(
                    "expected {} feature columns, found {}",
                    self.feature_names.len(),
                    names.len()
                ),
            ));
        }
        Ok(())
    }
}

/// Model metadata for tracking and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Library version used to create the model
    pub library_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ModelMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            library_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelBundle {
    pub encoder: Option<FeatureEncoder>,
    pub config: Option<ModelConfig>,
    #[serde(default)]
    pub answer_codes: AnswerCodeMap,
    pub standardization: Option<Standardization>,
    pub classifier: Option<ClassifierModel>,
    pub accuracy: Option<AccuracyReport>,
    #[serde(default)]
    pub metadata: ModelMetadata,
}

impl ModelBundle {
    /// Configured, untrained bundle
    pub fn configured(config: ModelConfig, encoder: FeatureEncoder) -> Self {
        Self {
            encoder: Some(encoder),
            config: Some(config),
            ..Self::default()
        }
    }

    /// Both an encoder and a configuration are present
    pub fn is_configured(&self) -> bool {
        self.encoder.is_some() && self.config.is_some()
    }

    pub fn is_trained(&self) -> bool {
        self.classifier.as_ref().is_some_and(|c| c.is_trained())
            && self.standardization.is_some()
            && !self.answer_codes.is_empty()
    }

    /// Save model to file, replacing any previous bundle atomically
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.metadata.updated_at = Utc::now();

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = NamedTempFile::new_in(dir)?;
        let mut writer = BufWriter::new(temp);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| ClassifierError::Serialization(e.to_string()))?;
        writer.flush()?;
        let temp = writer
            .into_inner()
            .map_err(|e| ClassifierError::Io(e.into_error()))?;
        temp.persist(path).map_err(|e| ClassifierError::Io(e.error))?;
        Ok(())
    }

    /// Load model from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| ClassifierError::Serialization(e.to_string()))
    }

    /// Print model summary
    pub fn print_summary(&self) {
        println!("=== Model Summary ===");
        println!("Library Version: {}", self.metadata.library_version);
        println!("Created: {}", self.metadata.created_at.to_rfc3339());
        println!("Updated: {}", self.metadata.updated_at.to_rfc3339());
        match &self.encoder {
            Some(encoder) => println!("Features: {}", encoder.dim()),
            None => println!("Features: not configured"),
        }
        if let Some(config) = &self.config {
            println!("Negative Class: {}", config.negative_class);
            if config.use_unknown_category {
                println!(
                    "Unknown Category: cutoff {:?}, translated to {}",
                    config.unknown_cutoff,
                    config.translate_unknown_to.as_deref().unwrap_or("(none)")
                );
            }
        }
        match &self.classifier {
            Some(classifier) => println!(
                "Classifier: {} ({})",
                classifier.kind(),
                if classifier.is_trained() { "trained" } else { "untrained" }
            ),
            None => println!("Classifier: none"),
        }
        if !self.answer_codes.is_empty() {
            println!("Classes:");
            for (code, name) in self.answer_codes.names().iter().enumerate() {
                println!("  {code}: {name}");
            }
        }
        if let Some(report) = &self.accuracy {
            println!("Accuracy ({}):", report.created_at.to_rfc3339());
            print_matrix("  Training", report.training.as_ref());
            print_matrix("  Testing", report.testing.as_ref());
        }
    }
}

fn print_matrix(label: &str, matrix: Option<&ConfusionMatrix>) {
    match matrix {
        Some(ConfusionMatrix::TwoClass(m)) => println!(
            "{label}: agreement {:.4}, precision {:.4}, recall {:.4}, F-score {:.4} ({} examples)",
            m.overall_agreement(),
            m.precision(),
            m.recall(),
            m.f_score(),
            m.total()
        ),
        Some(matrix) => println!(
            "{label}: agreement {:.4} ({} examples)",
            matrix.overall_agreement(),
            matrix.total()
        ),
        None => println!("{label}: n/a"),
    }
}
