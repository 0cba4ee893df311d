//! Training module for the classifier head
//!
//! This module provides:
//! - The training loop over precomputed embeddings (Burn autodiff + Adam)
//! - The end-to-end training run from image folders to a saved bundle
//!
//! ## Transfer Learning Approach
//!
//! 1. Run every dataset image through the frozen extractor once
//! 2. Encode the labels and build one-hot targets
//! 3. Fit a small dense head on the resulting feature matrix
//! 4. Save the head together with its label index

pub mod pipeline;
pub mod trainer;

// Re-export main types for convenience
pub use pipeline::{resolve_classes, run_training, TrainingReport};
pub use trainer::{
    categorical_cross_entropy, ClassifierTrainer, EpochMetrics, FitOutput, TrainingState,
};

// Re-export TrainingConfig from model::config where it's defined
pub use crate::model::config::TrainingConfig;

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 20;

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default Adam learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 1e-4;
