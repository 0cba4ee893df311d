//! # Pokedex
//!
//! A transfer-learning image classifier for creature species, built on the
//! Burn framework.
//!
//! Images are run once through a frozen, pretrained MobileNet truncated at a
//! named layer. The flattened activations become fixed-length embeddings, and
//! only a small dense head is trained on them. The head is saved together
//! with its label index so predictions decode back to species names.
//!
//! ## Modules
//!
//! - `config`: Pipeline configuration (dataset, extractor, training, output)
//! - `dataset`: Dataset assembly, label encoding and feature matrices
//! - `preprocess`: Image decoding, center crop, resize and normalization
//! - `model`: MobileNet body, feature extractor, classifier head, persistence
//! - `training`: Classifier training loop and the end-to-end training run
//! - `inference`: Prediction on single images and directories
//! - `utils`: Logging, errors and helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pokedex::backend::{default_device, DefaultBackend, TrainingBackend};
//! use pokedex::model::MobileNetExtractor;
//! use pokedex::training::{resolve_classes, run_training};
//! use pokedex::PipelineConfig;
//!
//! let config = PipelineConfig::load("pokedex.json".as_ref())?;
//! let classes = resolve_classes(&config.dataset)?;
//! let extractor = MobileNetExtractor::<DefaultBackend>::new(&config.extractor, &default_device())?;
//! let report = run_training::<TrainingBackend, _>(&config, &classes, &extractor, &default_device())?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod preprocess;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{DatasetConfig, PipelineConfig, UnreadablePolicy};
pub use dataset::{CreatureDataset, DatasetAssembler, FeatureMatrix, LabelIndex, TrainingSet};
pub use inference::{predict, BatchPredictionStats, PredictionResult, Predictor};
pub use model::{
    ClassifierConfig, CreatureClassifier, ExtractorConfig, FeatureExtractor, MobileNetExtractor,
    TrainedModel,
};
pub use training::{run_training, ClassifierTrainer, TrainingConfig, TrainingReport};
pub use utils::error::{PokedexError, Result};

/// Side length of the square image the pretrained extractor expects
pub const IMAGE_SIZE: usize = 224;

/// Crate version, stored in every saved model bundle
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
