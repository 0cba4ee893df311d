//! Model module: frozen backbone, classifier head and persistence
//!
//! This module provides:
//! - The MobileNet v1 body used as a frozen feature extractor
//! - The [`FeatureExtractor`] seam the pipeline talks to
//! - The dense classifier head trained on embeddings
//! - Saving and loading trained model bundles
//! - Importing the published TensorFlow.js MobileNet weights
//!
//! ## Architecture
//!
//! ```text
//! image -> MobileNet v1 (alpha 0.25, cut at conv_pw_13_relu) -> 7x7x256
//!       -> Dense(100, relu) -> Dense(num_classes, softmax, no bias)
//! ```

pub mod classifier;
pub mod config;
pub mod extractor;
pub mod mobilenet;
pub mod persistence;
pub mod tfjs;

// Re-export main types for convenience
pub use classifier::{ClassifierConfig, CreatureClassifier};
pub use config::{ExtractorConfig, TrainingConfig};
pub use extractor::{import_keras_weights, save_weights, Embedding, FeatureExtractor, MobileNetExtractor};
pub use mobilenet::{MobileNetBody, MobileNetConfig, TruncationPoint};
pub use persistence::{ModelMetadata, TrainedModel};
pub use tfjs::KerasWeights;

/// Default truncation layer of the extractor
pub const DEFAULT_LAYER: &str = "conv_pw_13_relu";

/// Smallest input the five stride-2 stages reduce to at least 1x1
pub const MIN_INPUT_SIZE: usize = 32;

/// Default MobileNet width multiplier
pub const DEFAULT_ALPHA: f64 = 0.25;

/// Default width of the classifier's hidden layer
pub const DEFAULT_HIDDEN_UNITS: usize = 100;
