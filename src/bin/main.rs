//! rclass command line interface
//!
//! Creates model bundles, runs training/testing passes over CSV files and
//! shows what a bundle contains.

use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{error, info};
use rclass::api::{run, RunOptions};
use rclass::config::{
    ClassifierConfig, ModelConfig, NeuralNetworkConfig, SvmConfig, SvmStrategy,
};
use rclass::core::{CancellationToken, ClassifierError, ProgressEvent, ProgressSink, Result};
use rclass::persistence::{FeatureEncoder, ModelBundle};
use rclass::scoring::ConfusionMatrix;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

#[derive(Parser)]
#[command(name = "rclass")]
#[command(about = "Train and evaluate neural-network and SVM classifiers on CSV data")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a configured, untrained model
    Init(InitArgs),
    /// Train and/or test a model on CSV data
    Run(RunArgs),
    /// Display model information
    Info(InfoArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliClassifier {
    /// Feed-forward neural network
    #[value(name = "nn")]
    NeuralNetwork,
    /// Linear support vector machine ensemble
    #[value(name = "svm")]
    Svm,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliStrategy {
    /// One-vs-one voting
    #[value(name = "multiclass")]
    Multiclass,
    /// One-vs-rest
    #[value(name = "multilabel")]
    Multilabel,
}

impl From<CliStrategy> for SvmStrategy {
    fn from(strategy: CliStrategy) -> Self {
        match strategy {
            CliStrategy::Multiclass => SvmStrategy::Multiclass,
            CliStrategy::Multilabel => SvmStrategy::Multilabel,
        }
    }
}

#[derive(Args)]
struct InitArgs {
    /// Model file to create
    #[arg(short, long)]
    model: PathBuf,

    /// Classifier family
    #[arg(long, default_value = "svm")]
    classifier: CliClassifier,

    /// Class name reserved for code 0
    #[arg(long, default_value = "None")]
    negative_class: String,

    /// Number of feature columns; taken from the first training file when omitted
    #[arg(long)]
    features: Option<usize>,

    /// SVM multi-class strategy
    #[arg(long, default_value = "multiclass")]
    strategy: CliStrategy,

    /// Fixed SVM complexity instead of the automatic search
    #[arg(short = 'C', long)]
    complexity: Option<f64>,

    /// Hidden layer sizes of the neural network, comma separated
    #[arg(long, value_delimiter = ',')]
    hidden: Option<Vec<usize>>,

    /// Treat predictions scored below this cutoff as unknown
    #[arg(long)]
    unknown_cutoff: Option<f64>,

    /// Class that unknown predictions are translated to
    #[arg(long, requires = "unknown_cutoff")]
    translate_unknown_to: Option<String>,

    /// Random seed stored in the model
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[derive(Args)]
struct RunArgs {
    /// Model file
    #[arg(short, long)]
    model: PathBuf,

    /// A basename, a training file, or a training and a testing file
    #[arg(required = true, num_args = 1..=2)]
    csv: Vec<PathBuf>,

    /// Score with the trained model without retraining
    #[arg(long)]
    test_only: bool,

    /// Write Prediction and Probability columns back into the CSV files
    #[arg(long)]
    in_place: bool,

    /// Override the seed stored in the model
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args)]
struct InfoArgs {
    /// Model file
    #[arg(short, long)]
    model: PathBuf,
}

/// Renders progress events on stderr, rewriting the line for replacing events
#[derive(Default)]
struct StderrProgress {
    open_line: Mutex<bool>,
}

impl ProgressSink for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        let Ok(mut open_line) = self.open_line.lock() else {
            return;
        };
        let text = format!("{}{}", "  ".repeat(event.indent), event.render());
        let mut stderr = std::io::stderr().lock();
        let _ = if event.replace_previous {
            write!(stderr, "\r{text}\x1b[K")
        } else if *open_line {
            writeln!(stderr, "\n{text}")
        } else {
            writeln!(stderr, "{text}")
        };
        let _ = stderr.flush();
        *open_line = event.replace_previous;
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Commands::Init(args) => init_command(args),
        Commands::Run(args) => run_command(args),
        Commands::Info(args) => info_command(args),
    };

    if let Err(e) = result {
        if e.is_cancellation() {
            info!("Cancelled");
        } else {
            error!("Error: {e}");
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

fn init_command(args: InitArgs) -> Result<()> {
    let classifier = match args.classifier {
        CliClassifier::Svm => ClassifierConfig::SupportVectorMachine(SvmConfig {
            strategy: args.strategy.into(),
            complexity: args.complexity,
            ..SvmConfig::default()
        }),
        CliClassifier::NeuralNetwork => {
            let mut nn = NeuralNetworkConfig::default();
            if let Some(hidden) = args.hidden {
                nn.hidden_layers = hidden;
            }
            ClassifierConfig::NeuralNetwork(nn)
        }
    };

    let config = ModelConfig {
        negative_class: args.negative_class,
        use_unknown_category: args.unknown_cutoff.is_some(),
        unknown_cutoff: args.unknown_cutoff,
        translate_unknown_to: args.translate_unknown_to,
        classifier,
        seed: args.seed,
        ..ModelConfig::default()
    };
    config.validate()?;

    let encoder = match args.features {
        Some(count) => FeatureEncoder::with_count(count),
        None => FeatureEncoder::new(Vec::new()),
    };
    let mut bundle = ModelBundle::configured(config, encoder);
    bundle.save(&args.model)?;
    info!("Model saved to: {:?}", args.model);
    println!("Created {}", args.model.display());
    Ok(())
}

fn run_command(args: RunArgs) -> Result<()> {
    if !args.model.exists() {
        return Err(ClassifierError::Configuration(format!(
            "model {} does not exist; create it with `rclass init`",
            args.model.display()
        )));
    }
    info!("Loading model from: {:?}", args.model);

    let options = RunOptions {
        test_only: args.test_only,
        update_in_place: args.in_place,
        seed: args.seed,
    };
    let progress = StderrProgress::default();
    let cancel = CancellationToken::new();
    let (training, testing) = run(&args.model, &args.csv, &options, &progress, &cancel)?;

    print_matrix("Training", training.as_ref());
    print_matrix("Testing", testing.as_ref());
    Ok(())
}

fn info_command(args: InfoArgs) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let bundle = ModelBundle::load(&args.model)?;
    bundle.print_summary();
    Ok(())
}

fn print_matrix(label: &str, matrix: Option<&ConfusionMatrix>) {
    let Some(matrix) = matrix else {
        return;
    };
    println!(
        "{label} agreement: {:.2}% ({} examples)",
        matrix.overall_agreement() * 100.0,
        matrix.total()
    );
    if let ConfusionMatrix::TwoClass(m) = matrix {
        println!(
            "{label} precision {:.4}, recall {:.4}, F-score {:.4}",
            m.precision(),
            m.recall(),
            m.f_score()
        );
    }
}
