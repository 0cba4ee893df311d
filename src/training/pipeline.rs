//! End-to-end training run
//!
//! assemble -> extract features -> encode labels -> fit head -> save bundle

use std::path::PathBuf;

use burn::tensor::backend::AutodiffBackend;
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::trainer::{ClassifierTrainer, EpochMetrics, FitOutput};
use crate::config::{DatasetConfig, PipelineConfig};
use crate::dataset::{
    build_feature_matrix, discover_classes, encode, load_class_list, DatasetAssembler,
    FeatureMatrixOutput, TrainingSet,
};
use crate::model::{ClassifierConfig, FeatureExtractor, ModelMetadata, TrainedModel};
use crate::utils::error::{PokedexError, Result};

/// Summary of a completed training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Dataset entries after FILE_LIMIT / DATA_LIMIT
    pub entries: usize,
    /// Entries left out as unreadable
    pub skipped: Vec<PathBuf>,
    /// Labels in index order
    pub labels: Vec<String>,
    pub embedding_dim: usize,
    pub epochs: Vec<EpochMetrics>,
    /// Where the model bundle was written
    pub model_dir: PathBuf,
}

impl TrainingReport {
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// Rows that actually went into training
    pub fn training_rows(&self) -> usize {
        self.entries - self.skipped.len()
    }
}

/// The class list for a run: the species file if configured, else the
/// sorted subdirectories of the data root
pub fn resolve_classes(config: &DatasetConfig) -> Result<Vec<String>> {
    match &config.classes_file {
        Some(path) => load_class_list(path),
        None => discover_classes(&config.data_dir),
    }
}

/// Train a classifier head for `classes` and save it to `config.output_dir`
///
/// The backend RNG is seeded with `config.training.seed` before the head is
/// initialised, so a run is reproducible end to end.
pub fn run_training<B, E>(
    config: &PipelineConfig,
    classes: &[String],
    extractor: &E,
    device: &B::Device,
) -> Result<TrainingReport>
where
    B: AutodiffBackend,
    E: FeatureExtractor + ?Sized,
{
    config.validate()?;
    config.extractor.require_weights()?;

    let dataset = DatasetAssembler::from_config(&config.dataset).assemble(classes)?;
    if dataset.is_empty() {
        return Err(PokedexError::Training(format!(
            "no images found under {:?} for {} classes",
            config.dataset.data_dir,
            classes.len()
        )));
    }

    let (labels, num_classes) = encode(&dataset.labels());
    info!("Encoded {} classes", num_classes);

    let FeatureMatrixOutput { matrix, skipped } =
        build_feature_matrix(&dataset, extractor, config.dataset.on_unreadable)?;
    let set = TrainingSet::new(matrix, &labels)?;

    let classifier_config = ClassifierConfig::new(extractor.embedding_dim(), num_classes)
        .with_hidden_units(config.training.hidden_units);
    B::seed(config.training.seed);
    let model = classifier_config.init::<B>(device);

    info!(
        "Training classifier: {} rows, {} -> {} -> {}",
        set.len(),
        classifier_config.embedding_dim,
        classifier_config.hidden_units,
        classifier_config.num_classes
    );

    let trainer = ClassifierTrainer::<B>::new(config.training.clone(), device.clone());
    let FitOutput { model, state } = trainer.fit(model, &set)?;

    let metadata = ModelMetadata {
        extractor_layer: extractor.layer().to_string(),
        input_size: extractor.input_size(),
        embedding_dim: extractor.embedding_dim(),
        num_classes,
        epochs: config.training.epochs,
        training_rows: set.len(),
        version: crate::VERSION.to_string(),
        saved_at: Local::now(),
    };

    let trained = TrainedModel::new(model, classifier_config, labels, metadata)?;
    trained.save(&config.output_dir)?;

    Ok(TrainingReport {
        entries: dataset.len(),
        skipped,
        labels: trained.labels.labels().to_vec(),
        embedding_dim: extractor.embedding_dim(),
        epochs: state.epochs,
        model_dir: config.output_dir.clone(),
    })
}
