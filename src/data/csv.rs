//! Comma-delimited example files
//!
//! Files may start with (and interleave) comment lines beginning with `#` or
//! `//`. A header row is recognised when every token is either a feature name
//! (`f` followed by hex digits) or a capitalised word such as `Answer`;
//! otherwise the positional layout `path, index, answer, features...` is used.
//!
//! Predictions are written back by streaming the file into a temporary file
//! next to it and renaming it over the original.

use crate::core::{
    CancellationToken, ClassifierError, FeatureVector, LabeledExample, ProgressEvent,
    ProgressSink, Result,
};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

lazy_static! {
    static ref FEATURE_HEADER: Regex = Regex::new(r"^f[0-9a-fA-F]+$").unwrap();
    static ref WORD_HEADER: Regex = Regex::new(r"^[A-Z][A-Za-z]*$").unwrap();
}

pub const ANSWER: &str = "Answer";
pub const PREDICTION: &str = "Prediction";
pub const PROBABILITY: &str = "Probability";

/// Column roles resolved from a header row or the positional fallback
#[derive(Debug, Clone, PartialEq)]
pub struct CsvLayout {
    /// Header tokens, `None` for headerless files
    pub header: Option<Vec<String>>,
    pub path: Option<usize>,
    pub index: Option<usize>,
    pub answer: usize,
    pub prediction: Option<usize>,
    pub probability: Option<usize>,
    pub features: Vec<usize>,
    /// Minimum tokens a data row must carry
    pub min_columns: usize,
}

impl CsvLayout {
    /// Layout of a headerless row with `columns` tokens
    pub fn positional(columns: usize) -> Self {
        Self {
            header: None,
            path: Some(0),
            index: Some(1),
            answer: 2,
            prediction: None,
            probability: None,
            features: (3..columns.max(3)).collect(),
            min_columns: columns.max(3),
        }
    }

    /// Resolve columns by header name
    pub fn from_header(tokens: &[&str], file: &Path) -> Result<Self> {
        let mut seen = HashSet::new();
        for token in tokens {
            if !seen.insert(*token) {
                return Err(ClassifierError::format(
                    file,
                    format!("duplicate header '{token}'"),
                ));
            }
        }
        let find = |name: &str| tokens.iter().position(|t| *t == name);
        let answer = find(ANSWER)
            .ok_or_else(|| ClassifierError::format(file, "header has no Answer column"))?;

        Ok(Self {
            header: Some(tokens.iter().map(|t| t.to_string()).collect()),
            path: find("Path"),
            index: find("Index"),
            answer,
            prediction: find(PREDICTION),
            probability: find(PROBABILITY),
            features: tokens
                .iter()
                .enumerate()
                .filter(|(_, t)| FEATURE_HEADER.is_match(t))
                .map(|(i, _)| i)
                .collect(),
            min_columns: tokens.len(),
        })
    }

    /// Feature column names, synthesised as `f<hex>` for headerless files
    pub fn feature_names(&self) -> Vec<String> {
        match &self.header {
            Some(header) => self.features.iter().map(|&i| header[i].clone()).collect(),
            None => (0..self.features.len()).map(|i| format!("f{i:x}")).collect(),
        }
    }
}

/// Whether every token looks like a header name
pub fn is_header_line(tokens: &[&str]) -> bool {
    !tokens.is_empty()
        && tokens
            .iter()
            .all(|t| FEATURE_HEADER.is_match(t) || WORD_HEADER.is_match(t))
}

fn is_comment(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with('#') || line.starts_with("//")
}

fn tokenize(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

/// One data row
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub path: Option<String>,
    pub index: Option<String>,
    pub answer: String,
    pub features: FeatureVector,
    /// Values already present from an earlier run
    pub prediction: Option<String>,
    pub probability: Option<String>,
}

/// Parsed contents of one file
#[derive(Debug, Clone)]
pub struct CsvData {
    pub file: PathBuf,
    pub layout: CsvLayout,
    pub rows: Vec<CsvRow>,
}

impl CsvData {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.layout.features.len()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.layout.feature_names()
    }

    pub fn answers(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.answer.as_str())
    }

    /// Copies of the feature vectors
    pub fn inputs(&self) -> Vec<FeatureVector> {
        self.rows.iter().map(|r| r.features.clone()).collect()
    }

    pub fn into_examples(self) -> Vec<LabeledExample> {
        self.rows
            .into_iter()
            .map(|r| LabeledExample::new(r.features, r.answer))
            .collect()
    }
}

/// Streaming reader with batched progress reports
pub struct CsvReader<'a> {
    batch: usize,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
}

impl<'a> CsvReader<'a> {
    pub fn new(
        batch: usize,
        progress: &'a dyn ProgressSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            batch: batch.max(1),
            progress,
            cancel,
        }
    }

    pub fn read_file<P: AsRef<Path>>(&self, path: P) -> Result<CsvData> {
        let path = path.as_ref();
        let file = File::open(path)?;
        self.read(BufReader::new(file), path)
    }

    /// Parse from any buffered source; `file` names it in errors
    pub fn read<R: BufRead>(&self, reader: R, file: &Path) -> Result<CsvData> {
        let name = file.display().to_string();
        let mut layout: Option<CsvLayout> = None;
        let mut rows = Vec::new();

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || is_comment(&line) {
                continue;
            }
            let tokens = tokenize(&line);

            if layout.is_none() && is_header_line(&tokens) {
                layout = Some(CsvLayout::from_header(&tokens, file)?);
                continue;
            }
            let current = layout.get_or_insert_with(|| CsvLayout::positional(tokens.len()));

            rows.push(parse_row(&tokens, current, file, number + 1)?);
            if rows.len() % self.batch == 0 {
                self.cancel.check()?;
                self.progress.report(
                    &ProgressEvent::new("csv", format!("Read {{}} rows from {name}"))
                        .count(rows.len())
                        .indent(1)
                        .replacing(),
                );
            }
        }

        let layout = layout.ok_or_else(|| ClassifierError::format(file, "no header or data rows"))?;
        debug!("Read {} rows with {} features from {name}", rows.len(), layout.features.len());
        Ok(CsvData {
            file: file.to_path_buf(),
            layout,
            rows,
        })
    }

    /// Rewrite `path` with one `(class name, score)` per data row, in order.
    ///
    /// `Prediction` and `Probability` are overwritten where both columns
    /// already exist and otherwise inserted right after `Answer`. Headerless
    /// files gain a header. Comment lines are copied through unchanged.
    pub fn update_predictions_in_place<P: AsRef<Path>>(
        &self,
        path: P,
        predictions: &[(String, Option<f64>)],
    ) -> Result<()> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let reader = BufReader::new(File::open(path)?);
        let mut writer = BufWriter::new(NamedTempFile::new_in(&dir)?);
        let mut placement: Option<(CsvLayout, Placement)> = None;
        let mut rows = 0usize;

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || is_comment(&line) {
                writeln!(writer, "{line}")?;
                continue;
            }
            let tokens = tokenize(&line);

            if placement.is_none() {
                let (layout, header) = if is_header_line(&tokens) {
                    (CsvLayout::from_header(&tokens, path)?, None)
                } else {
                    let layout = CsvLayout::positional(tokens.len());
                    let mut header =
                        vec!["Path".to_string(), "Index".to_string(), ANSWER.to_string()];
                    header.extend(layout.feature_names());
                    (layout, Some(header))
                };
                let rule = Placement::for_layout(&layout);
                let header = header.unwrap_or_else(|| owned(&tokens));
                writeln!(
                    writer,
                    "{}",
                    rule.apply(header, PREDICTION.to_string(), PROBABILITY.to_string())
                        .join(",")
                )?;
                let headerless = layout.header.is_none();
                placement = Some((layout, rule));
                if !headerless {
                    continue;
                }
            }
            let Some((layout, rule)) = placement.as_ref() else {
                continue;
            };

            if tokens.len() < layout.min_columns {
                return Err(short_row(path, number + 1, tokens.len(), layout.min_columns));
            }
            let (prediction, probability) = match predictions.get(rows) {
                Some((class, score)) => (class.clone(), format_probability(*score)),
                None => (String::new(), String::new()),
            };
            writeln!(writer, "{}", rule.apply(owned(&tokens), prediction, probability).join(","))?;

            rows += 1;
            if rows % self.batch == 0 {
                self.cancel.check()?;
                self.progress.report(
                    &ProgressEvent::new("csv", format!("Wrote {{}} predictions to {name}"))
                        .count(rows.min(predictions.len()))
                        .indent(1)
                        .replacing(),
                );
            }
        }

        if rows < predictions.len() {
            return Err(ClassifierError::format(
                path,
                format!(
                    "file has {rows} data rows but {} predictions to write",
                    predictions.len()
                ),
            ));
        }

        let temp = writer
            .into_inner()
            .map_err(|e| ClassifierError::Io(e.into_error()))?;
        temp.persist(path).map_err(|e| ClassifierError::Io(e.error))?;
        debug!("Wrote {} predictions to {name}", predictions.len());
        Ok(())
    }
}

/// Where the prediction columns go in every output line
#[derive(Debug, Clone, PartialEq)]
enum Placement {
    Overwrite {
        prediction: usize,
        probability: usize,
    },
    /// Drop stale columns (descending), then insert after this column
    Insert { strip: Vec<usize>, after: usize },
}

impl Placement {
    fn for_layout(layout: &CsvLayout) -> Self {
        if let (Some(prediction), Some(probability)) = (layout.prediction, layout.probability) {
            return Placement::Overwrite {
                prediction,
                probability,
            };
        }
        let mut strip: Vec<usize> = layout
            .prediction
            .iter()
            .chain(layout.probability.iter())
            .copied()
            .collect();
        strip.sort_unstable_by(|a, b| b.cmp(a));
        let after = layout.answer - strip.iter().filter(|&&i| i < layout.answer).count();
        Placement::Insert { strip, after }
    }

    fn apply(
        &self,
        mut tokens: Vec<String>,
        prediction: String,
        probability: String,
    ) -> Vec<String> {
        match self {
            Placement::Overwrite {
                prediction: p,
                probability: q,
            } => {
                let needed = (*p).max(*q) + 1;
                if tokens.len() < needed {
                    tokens.resize(needed, String::new());
                }
                tokens[*p] = prediction;
                tokens[*q] = probability;
            }
            Placement::Insert { strip, after } => {
                for &i in strip {
                    if i < tokens.len() {
                        tokens.remove(i);
                    }
                }
                if tokens.len() <= *after {
                    tokens.resize(after + 1, String::new());
                }
                tokens.insert(after + 1, prediction);
                tokens.insert(after + 2, probability);
            }
        }
        tokens
    }
}

/// Four decimals, or `1` when the model produced no score
pub fn format_probability(score: Option<f64>) -> String {
    match score {
        Some(score) => format!("{score:.4}"),
        None => "1".to_string(),
    }
}

fn owned(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

fn short_row(file: &Path, line: usize, found: usize, expected: usize) -> ClassifierError {
    ClassifierError::format(
        file,
        format!("line {line} has {found} columns, expected at least {expected}"),
    )
}

fn parse_row(tokens: &[&str], layout: &CsvLayout, file: &Path, line: usize) -> Result<CsvRow> {
    if tokens.len() < layout.min_columns {
        return Err(short_row(file, line, tokens.len(), layout.min_columns));
    }
    let cell = |i: Option<usize>| i.map(|i| tokens[i].to_string());
    let features = layout
        .features
        .iter()
        // Unparsable numbers count as zero
        .map(|&i| tokens[i].parse::<f64>().unwrap_or(0.0))
        .collect();

    Ok(CsvRow {
        path: cell(layout.path),
        index: cell(layout.index),
        answer: tokens[layout.answer].to_string(),
        features,
        prediction: cell(layout.prediction).filter(|p| !p.is_empty()),
        probability: cell(layout.probability).filter(|p| !p.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NullProgress;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn parse(text: &str) -> Result<CsvData> {
        let token = CancellationToken::new();
        CsvReader::new(64, &NullProgress, &token).read(Cursor::new(text), Path::new("test.csv"))
    }

    fn rewrite(text: &str, predictions: &[(String, Option<f64>)]) -> Result<String> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, text).unwrap();
        let token = CancellationToken::new();
        CsvReader::new(64, &NullProgress, &token).update_predictions_in_place(&path, predictions)?;
        Ok(std::fs::read_to_string(&path).unwrap())
    }

    #[test]
    fn test_header_with_comments() {
        let data = parse(
            "# exported\n// second comment\nPath,Index,Answer,f0,f1\na.png,0,Cat,1.5,2\n\nb.png,1,Dog,3,4\n",
        )
        .unwrap();

        assert_eq!(data.len(), 2);
        assert_eq!(data.feature_names(), vec!["f0", "f1"]);
        assert_eq!(data.rows[0].path.as_deref(), Some("a.png"));
        assert_eq!(data.rows[1].answer, "Dog");
        assert_eq!(data.rows[1].features, vec![3.0, 4.0]);
    }

    #[test]
    fn test_positional_fallback() {
        let data = parse("img1,0,Yes,0.5,0.25\nimg2,1,No,1,2\n").unwrap();
        assert!(data.layout.header.is_none());
        assert_eq!(data.dim(), 2);
        assert_eq!(data.feature_names(), vec!["f0", "f1"]);
        assert_eq!(data.answers().collect::<Vec<_>>(), vec!["Yes", "No"]);

        let examples = data.into_examples();
        assert_eq!(examples[1], LabeledExample::new(vec![1.0, 2.0], "No"));
    }

    #[test]
    fn test_unparsable_feature_is_zero() {
        let data = parse("Answer,f0,f1\nA,abc,2\n").unwrap();
        assert_eq!(data.rows[0].features, vec![0.0, 2.0]);
    }

    #[test]
    fn test_existing_prediction_columns_captured() {
        let data = parse("Answer,Prediction,Probability,f0\nA,B,0.7500,1\n").unwrap();
        assert_eq!(data.rows[0].prediction.as_deref(), Some("B"));
        assert_eq!(data.rows[0].probability.as_deref(), Some("0.7500"));
        assert_eq!(data.dim(), 1);
    }

    #[test]
    fn test_format_errors() {
        assert!(matches!(
            parse("Path,Index,f0\na,0,1\n"),
            Err(ClassifierError::Format { .. })
        ));
        assert!(matches!(
            parse("Answer,f0,f0\nA,1,2\n"),
            Err(ClassifierError::Format { .. })
        ));
        assert!(matches!(
            parse("Answer,f0,f1\nA,1\n"),
            Err(ClassifierError::Format { .. })
        ));
        assert!(matches!(parse("a,b\n"), Err(ClassifierError::Format { .. })));
        assert!(matches!(parse("# only comments\n"), Err(ClassifierError::Format { .. })));
    }

    #[test]
    fn test_is_header_line() {
        assert!(is_header_line(&["Path", "Index", "Answer", "f0", "f1a"]));
        assert!(!is_header_line(&["img1", "0", "Yes", "0.5"]));
        assert!(!is_header_line(&["answer", "f0"]));
    }

    #[test]
    fn test_batched_progress_and_cancellation() {
        let text: String = std::iter::once("Answer,f0\n".to_string())
            .chain((0..10).map(|i| format!("A,{i}\n")))
            .collect();
        let events = Mutex::new(0usize);
        let sink = |_: &ProgressEvent| *events.lock().unwrap() += 1;
        let token = CancellationToken::new();
        CsvReader::new(4, &sink, &token)
            .read(Cursor::new(text.as_str()), Path::new("p.csv"))
            .unwrap();
        assert_eq!(*events.lock().unwrap(), 2);

        token.cancel();
        let result =
            CsvReader::new(4, &sink, &token).read(Cursor::new(text.as_str()), Path::new("p.csv"));
        assert!(matches!(result, Err(ClassifierError::Cancelled)));
    }

    #[test]
    fn test_rewrite_inserts_after_answer() {
        let out = rewrite(
            "# keep me\nPath,Index,Answer,f0\na,0,Cat,1\n// and me\nb,1,Dog,2\n",
            &[("Cat".to_string(), Some(0.91234)), ("Cat".to_string(), None)],
        )
        .unwrap();
        assert_eq!(
            out,
            "# keep me\nPath,Index,Answer,Prediction,Probability,f0\na,0,Cat,Cat,0.9123,1\n// and me\nb,1,Dog,Cat,1,2\n"
        );
    }

    #[test]
    fn test_rewrite_overwrites_existing_columns() {
        let out = rewrite(
            "Answer,f0,Prediction,Probability\nA,1,B,0.1\n",
            &[("A".to_string(), Some(0.5))],
        )
        .unwrap();
        assert_eq!(out, "Answer,f0,Prediction,Probability\nA,1,A,0.5000\n");
    }

    #[test]
    fn test_rewrite_headerless_gains_header() {
        let out = rewrite("img,0,Yes,0.5\n", &[("Yes".to_string(), Some(1.0))]).unwrap();
        assert_eq!(
            out,
            "Path,Index,Answer,Prediction,Probability,f0\nimg,0,Yes,Yes,1.0000,0.5\n"
        );

        // the rewritten file reads back with the same features
        let data = parse(&out).unwrap();
        assert_eq!(data.rows[0].features, vec![0.5]);
        assert_eq!(data.rows[0].prediction.as_deref(), Some("Yes"));
    }

    #[test]
    fn test_rewrite_fewer_rows_than_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        let original = "Answer,f0\nA,1\n";
        std::fs::write(&path, original).unwrap();

        let token = CancellationToken::new();
        let result = CsvReader::new(64, &NullProgress, &token).update_predictions_in_place(
            &path,
            &[("A".to_string(), None), ("A".to_string(), None)],
        );
        assert!(matches!(result, Err(ClassifierError::Format { .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }
}
