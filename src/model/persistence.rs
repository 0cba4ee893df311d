//! Model Persistence
//!
//! A trained model is saved as a directory bundle:
//!
//! ```text
//! dist/
//! ├── model.mpk         classifier weights (full precision)
//! ├── classifier.json   classifier architecture
//! ├── labels.json       label index, ordered by index
//! └── metadata.json     extractor and training provenance
//! ```
//!
//! The label index travels with the weights, so prediction always decodes
//! with the map the classifier was trained against.

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::classifier::{ClassifierConfig, CreatureClassifier};
use crate::dataset::LabelIndex;
use crate::utils::error::{PokedexError, Result};

/// Weights file stem; the recorder appends `.mpk`
pub const WEIGHTS_FILE: &str = "model";
pub const CLASSIFIER_FILE: &str = "classifier.json";
pub const LABELS_FILE: &str = "labels.json";
pub const METADATA_FILE: &str = "metadata.json";

type BundleRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Provenance stored next to the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Extractor layer the classifier was trained on
    pub extractor_layer: String,
    /// Extractor input resolution
    pub input_size: usize,
    /// Embedding length
    pub embedding_dim: usize,
    /// Number of classes
    pub num_classes: usize,
    /// Epochs the classifier was trained for
    pub epochs: usize,
    /// Rows in the training feature matrix
    pub training_rows: usize,
    /// Crate version that wrote the bundle
    pub version: String,
    /// When the bundle was written
    pub saved_at: DateTime<Local>,
}

/// A trained classifier together with everything needed to use it
#[derive(Debug)]
pub struct TrainedModel<B: Backend> {
    pub classifier: CreatureClassifier<B>,
    pub config: ClassifierConfig,
    pub labels: LabelIndex,
    pub metadata: ModelMetadata,
}

impl<B: Backend> TrainedModel<B> {
    /// Bundle a classifier with its label index
    ///
    /// Fails if the label count differs from the classifier output width.
    pub fn new(
        classifier: CreatureClassifier<B>,
        config: ClassifierConfig,
        labels: LabelIndex,
        metadata: ModelMetadata,
    ) -> Result<Self> {
        if labels.len() != config.num_classes {
            return Err(PokedexError::ShapeMismatch {
                stage: "label index",
                expected: vec![config.num_classes],
                actual: vec![labels.len()],
            });
        }

        Ok(Self {
            classifier,
            config,
            labels,
            metadata,
        })
    }

    /// Write the bundle to `dir`, replacing whatever was there
    pub fn save(&self, dir: &Path) -> Result<()> {
        if dir.is_file() {
            return Err(persist_error(dir, "destination exists and is a file"));
        }
        if dir.exists() {
            std::fs::remove_dir_all(dir).map_err(|e| persist_error(dir, e))?;
        }
        std::fs::create_dir_all(dir).map_err(|e| persist_error(dir, e))?;

        self.classifier
            .clone()
            .save_file(dir.join(WEIGHTS_FILE), &BundleRecorder::new())
            .map_err(|e| persist_error(dir, format!("{:?}", e)))?;

        let config_path = dir.join(CLASSIFIER_FILE);
        self.config
            .save(&config_path)
            .map_err(|e| persist_error(&config_path, e))?;

        write_json(&dir.join(LABELS_FILE), &self.labels)?;
        write_json(&dir.join(METADATA_FILE), &self.metadata)?;

        info!("Model saved to {:?}", dir);
        Ok(())
    }

    /// Read a bundle written by [`TrainedModel::save`]
    ///
    /// A missing directory or weights file is `ModelNotFound`; anything
    /// present but unreadable or inconsistent is `CorruptModel`.
    pub fn load(dir: &Path, device: &B::Device) -> Result<Self> {
        if !dir.is_dir() {
            return Err(PokedexError::ModelNotFound(dir.to_path_buf()));
        }

        let weights = dir.join(format!("{}.mpk", WEIGHTS_FILE));
        if !weights.is_file() {
            return Err(PokedexError::ModelNotFound(weights));
        }

        let config_path = dir.join(CLASSIFIER_FILE);
        let config = ClassifierConfig::load(&config_path)
            .map_err(|e| corrupt_error(&config_path, format!("{:?}", e)))?;

        let labels: LabelIndex = read_json(&dir.join(LABELS_FILE))?;
        let metadata: ModelMetadata = read_json(&dir.join(METADATA_FILE))?;

        if labels.len() != config.num_classes {
            return Err(corrupt_error(
                dir,
                format!(
                    "{} labels for a classifier with {} outputs",
                    labels.len(),
                    config.num_classes
                ),
            ));
        }

        let classifier = config
            .init::<B>(device)
            .load_file(&weights, &BundleRecorder::new(), device)
            .map_err(|e| corrupt_error(&weights, format!("{:?}", e)))?;

        info!(
            "Loaded model from {:?} ({} classes, layer {})",
            dir,
            labels.len(),
            metadata.extractor_layer
        );

        Ok(Self {
            classifier,
            config,
            labels,
            metadata,
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| persist_error(path, e))?;
    std::fs::write(path, json).map_err(|e| persist_error(path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path).map_err(|e| corrupt_error(path, e))?;
    serde_json::from_str(&json).map_err(|e| corrupt_error(path, e))
}

fn persist_error(path: &Path, reason: impl std::fmt::Display) -> PokedexError {
    PokedexError::PersistenceFailure {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}

fn corrupt_error(path: &Path, reason: impl std::fmt::Display) -> PokedexError {
    PokedexError::CorruptModel {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}
