//! Pokedex CLI
//!
//! Main entry point for training the creature classifier and running
//! predictions with a saved model.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use walkdir::WalkDir;

use pokedex::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use pokedex::config::{PipelineConfig, UnreadablePolicy};
use pokedex::dataset::DatasetAssembler;
use pokedex::inference::{BatchPredictionStats, PredictionResult, Predictor};
use pokedex::model::{
    import_keras_weights, ExtractorConfig, MobileNetExtractor, TrainedModel, DEFAULT_ALPHA,
};
use pokedex::training::{resolve_classes, run_training};
use pokedex::utils::logging::{init_logging, LogConfig};
use pokedex::utils::{format_duration, natural_cmp, title_case};

#[derive(Parser)]
#[command(name = "pokedex")]
#[command(author = "Pokedex Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Transfer-learning creature classifier built on Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// JSON pipeline configuration; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract features from the image folders and train the classifier head
    Train {
        /// Directory with one subdirectory of images per class
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// JSON array of class labels (defaults to the subdirectories)
        #[arg(long)]
        classes_file: Option<PathBuf>,

        /// Maximum images taken from each class directory
        #[arg(long)]
        file_limit: Option<usize>,

        /// Maximum images overall
        #[arg(long)]
        data_limit: Option<usize>,

        /// Skip undecodable images instead of aborting
        #[arg(long)]
        skip_unreadable: bool,

        /// Pretrained MobileNet weights (TensorFlow.js model.json or imported .mpk)
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Use a randomly initialised extractor when no weights are given
        #[arg(long)]
        random_init: bool,

        /// Extractor layer used as the embedding
        #[arg(long)]
        layer: Option<String>,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(long)]
        learning_rate: Option<f64>,

        /// Width of the classifier's hidden layer
        #[arg(long)]
        hidden_units: Option<usize>,

        /// Random seed for shuffling and initialization
        #[arg(long)]
        seed: Option<u64>,

        /// Output directory for the model bundle
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Predict the class of an image, or of every image in a directory
    Predict {
        /// Image file or directory of images
        #[arg(short, long)]
        input: PathBuf,

        /// Saved model directory
        #[arg(short, long, default_value = "dist")]
        model: PathBuf,

        /// Pretrained MobileNet weights, as used for training
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Use a randomly initialised extractor when no weights are given
        #[arg(long)]
        random_init: bool,

        /// MobileNet width multiplier used for training
        #[arg(long, default_value_t = DEFAULT_ALPHA)]
        alpha: f64,

        /// Number of ranked classes to show per image
        #[arg(short = 'k', long, default_value = "3")]
        top_k: usize,
    },

    /// Show per-class image counts after the file and data limits
    Stats {
        /// Directory with one subdirectory of images per class
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// JSON array of class labels (defaults to the subdirectories)
        #[arg(long)]
        classes_file: Option<PathBuf>,
    },

    /// Convert TensorFlow.js MobileNet weights (model.json) to a burn record
    ImportWeights {
        /// model.json of the TensorFlow.js layers model
        #[arg(short, long)]
        input: PathBuf,

        /// Output record path (`.mpk` is appended)
        #[arg(short, long, default_value = "weights/mobilenet_v1")]
        output: PathBuf,

        /// MobileNet width multiplier of the published model
        #[arg(long, default_value_t = DEFAULT_ALPHA)]
        alpha: f64,
    },

    /// Write the default pipeline configuration as JSON
    InitConfig {
        /// Destination file
        #[arg(short, long, default_value = "pokedex.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration {:?}", path))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Train {
            data_dir,
            classes_file,
            file_limit,
            data_limit,
            skip_unreadable,
            weights,
            random_init,
            layer,
            epochs,
            batch_size,
            learning_rate,
            hidden_units,
            seed,
            output_dir,
        } => {
            if let Some(data_dir) = data_dir {
                config.dataset.data_dir = data_dir;
            }
            if classes_file.is_some() {
                config.dataset.classes_file = classes_file;
            }
            if let Some(file_limit) = file_limit {
                config.dataset.file_limit = file_limit;
            }
            if data_limit.is_some() {
                config.dataset.data_limit = data_limit;
            }
            if skip_unreadable {
                config.dataset.on_unreadable = UnreadablePolicy::Skip;
            }
            if weights.is_some() {
                config.extractor.weights = weights;
            }
            if random_init {
                config.extractor.random_init = true;
            }
            if let Some(layer) = layer {
                config.extractor.layer = layer;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(learning_rate) = learning_rate {
                config.training.learning_rate = learning_rate;
            }
            if let Some(hidden_units) = hidden_units {
                config.training.hidden_units = hidden_units;
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            if let Some(output_dir) = output_dir {
                config.output_dir = output_dir;
            }

            cmd_train(&config)?;
        }

        Commands::Predict {
            input,
            model,
            weights,
            random_init,
            alpha,
            top_k,
        } => {
            let extractor = ExtractorConfig {
                weights: weights.or(config.extractor.weights.clone()),
                random_init: random_init || config.extractor.random_init,
                alpha,
                ..config.extractor.clone()
            };
            cmd_predict(&input, &model, extractor, top_k, &config.dataset.image_extensions)?;
        }

        Commands::ImportWeights {
            input,
            output,
            alpha,
        } => {
            let device = default_device();
            let file = import_keras_weights::<DefaultBackend>(&input, alpha, &output, &device)
                .with_context(|| format!("importing weights from {:?}", input))?;
            println!("{} {:?}", "Extractor weights written to".green(), file);
        }

        Commands::Stats {
            data_dir,
            classes_file,
        } => {
            if let Some(data_dir) = data_dir {
                config.dataset.data_dir = data_dir;
            }
            if classes_file.is_some() {
                config.dataset.classes_file = classes_file;
            }

            cmd_stats(&config)?;
        }

        Commands::InitConfig { output } => {
            config.save(&output)?;
            println!("{} {:?}", "Configuration written to".green(), output);
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔════════════════════════════════════════════════════════╗
 ║   Pokedex Model Trainer                                ║
 ║   Transfer-learning creature classifier with Burn      ║
 ╚════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn cmd_train(config: &PipelineConfig) -> Result<()> {
    config.validate()?;

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Data:          {:?}", config.dataset.data_dir);
    println!("  File limit:    {}", config.dataset.file_limit);
    if let Some(limit) = config.dataset.data_limit {
        println!("  Data limit:    {}", limit);
    }
    println!(
        "  Weights:       {}",
        config
            .extractor
            .weights
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "random init".to_string())
    );
    println!("  Layer:         {}", config.extractor.layer);
    println!("  Epochs:        {}", config.training.epochs);
    println!("  Batch size:    {}", config.training.batch_size);
    println!("  Learning rate: {}", config.training.learning_rate);
    println!("  Backend:       {}", backend_name());
    println!("  Output:        {:?}", config.output_dir);
    println!();

    if !config.dataset.data_dir.exists() {
        bail!("dataset directory not found: {:?}", config.dataset.data_dir);
    }

    let start = Instant::now();
    let device = default_device();

    let classes = resolve_classes(&config.dataset)?;
    info!("Training on {} classes", classes.len());

    let extractor = MobileNetExtractor::<DefaultBackend>::new(&config.extractor, &device)?;
    let report = run_training::<TrainingBackend, _>(config, &classes, &extractor, &device)?;

    println!();
    println!("{}", "Training Complete:".green().bold());
    println!("  Images:        {}", report.entries);
    println!("  Trained on:    {}", report.training_rows());
    println!("  Classes:       {}", report.num_classes());
    println!("  Embedding dim: {}", report.embedding_dim);
    if let Some(last) = report.epochs.last() {
        println!("  Final loss:    {:.4}", last.loss);
        println!("  Final acc:     {:.2}%", last.accuracy * 100.0);
    }
    println!("  Time:          {}", format_duration(start.elapsed().as_secs_f64()));
    println!("  Saved to:      {:?}", report.model_dir);

    if !report.skipped.is_empty() {
        println!();
        println!("{} {} unreadable images skipped:", "Warning:".yellow(), report.skipped.len());
        for path in &report.skipped {
            println!("  {:?}", path);
        }
    }

    Ok(())
}

/// `extractor` supplies weights and width; layer and input size come from
/// the saved model
fn cmd_predict(
    input: &Path,
    model_dir: &Path,
    extractor: ExtractorConfig,
    top_k: usize,
    extensions: &[String],
) -> Result<()> {
    if !input.exists() {
        bail!("input path not found: {:?}", input);
    }

    let device = default_device();

    println!("{}", "Loading model...".cyan());
    let model = TrainedModel::<DefaultBackend>::load(model_dir, &device)?;

    let extractor_config = ExtractorConfig {
        layer: model.metadata.extractor_layer.clone(),
        input_size: model.metadata.input_size,
        ..extractor
    };
    let extractor = MobileNetExtractor::<DefaultBackend>::new(&extractor_config, &device)?;

    println!("{}", "Inference Configuration:".cyan().bold());
    println!("  Input:   {:?}", input);
    println!("  Model:   {:?}", model_dir);
    println!("  Classes: {}", model.labels.len());
    println!("  Layer:   {}", model.metadata.extractor_layer);
    println!("  Backend: {}", backend_name());
    println!();

    let predictor = Predictor::new(extractor, model)?.with_top_k(top_k);

    let paths = collect_images(input, extensions);
    if paths.is_empty() {
        println!("{} No images found in {:?}", "Warning:".yellow(), input);
        return Ok(());
    }

    let results = predictor.predict_batch(&paths)?;
    for (result, expected) in &results {
        print_prediction(result, expected.as_deref());
    }

    if results.len() > 1 {
        println!();
        print!("{}", BatchPredictionStats::from_predictions(&results));
    }

    Ok(())
}

/// A single image, or every recognised image under a directory in name order
fn collect_images(input: &Path, extensions: &[String]) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }

    WalkDir::new(input)
        .sort_by(|a, b| natural_cmp(&a.file_name().to_string_lossy(), &b.file_name().to_string_lossy()))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    extensions.iter().any(|known| known.eq_ignore_ascii_case(&ext))
                })
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect()
}

fn print_prediction(result: &PredictionResult, expected: Option<&str>) {
    let name = result
        .image_path
        .as_deref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let marker = match expected {
        Some(label) if label == result.label => format!("(expected {})", label).green(),
        Some(label) => format!("(expected {})", label).red(),
        None => "".normal(),
    };

    println!(
        "{:32} {} {:.1}% {}",
        name,
        title_case(&result.label).bold(),
        result.confidence * 100.0,
        marker
    );

    for (idx, label, prob) in result.top_k.iter().skip(1) {
        println!("{:32}   {} (class {}) {:.1}%", "", label, idx, prob * 100.0);
    }
}

fn cmd_stats(config: &PipelineConfig) -> Result<()> {
    info!("Computing dataset statistics for: {:?}", config.dataset.data_dir);

    if !config.dataset.data_dir.exists() {
        println!(
            "{} Dataset directory not found: {:?}",
            "Error:".red(),
            config.dataset.data_dir
        );
        return Ok(());
    }

    let classes = resolve_classes(&config.dataset)?;
    let dataset = DatasetAssembler::from_config(&config.dataset).assemble(&classes)?;
    let stats = dataset.get_stats();

    println!("{}", "Dataset Statistics:".cyan().bold());
    print!("{}", stats);

    let empty = stats.empty_classes();
    if !empty.is_empty() {
        println!();
        println!(
            "{} {} classes have no images: {}",
            "Warning:".yellow(),
            empty.len(),
            empty.join(", ")
        );
    }

    Ok(())
}
