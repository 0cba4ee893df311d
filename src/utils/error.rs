//! Error Handling Module
//!
//! Defines the error type shared by the training and prediction pipelines.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for Pokedex operations
#[derive(Error, Debug)]
pub enum PokedexError {
    /// A class label listed for training has no directory under the data root
    #[error("Class directory for '{label}' does not exist: {path:?}")]
    MissingClassDirectory { label: String, path: PathBuf },

    /// An image file is missing, unreadable or not a decodable image
    #[error("Failed to load image at {path:?}: {reason}")]
    UnreadableImage { path: PathBuf, reason: String },

    /// A tensor did not have the shape the next stage requires
    #[error("Shape mismatch in {stage}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        stage: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Writing a model bundle failed
    #[error("Failed to persist model to {path:?}: {reason}")]
    PersistenceFailure { path: PathBuf, reason: String },

    /// No model bundle exists at the given location
    #[error("Model not found: {0:?}")]
    ModelNotFound(PathBuf),

    /// A model bundle exists but cannot be decoded
    #[error("Corrupt model at {path:?}: {reason}")]
    CorruptModel { path: PathBuf, reason: String },

    /// Argmax produced an index the label map does not know
    #[error("Predicted class index {index} has no label ({num_labels} labels known)")]
    UnknownIndex { index: usize, num_labels: usize },

    /// A label was one-hot encoded against a map that does not contain it
    #[error("Label '{0}' is not present in the label index")]
    UnknownLabel(String),

    /// The configured truncation layer does not exist in the backbone
    #[error("Unknown feature extractor layer: {0}")]
    UnknownLayer(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error raised while fitting the classifier
    #[error("Training error: {0}")]
    Training(String),

    /// Tensor contents could not be read back to host memory
    #[error("Tensor data error: {0}")]
    Tensor(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PokedexError {
    fn from(err: serde_json::Error) -> Self {
        PokedexError::Serialization(err.to_string())
    }
}

impl PokedexError {
    /// Build an `UnreadableImage` error from any displayable cause
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        PokedexError::UnreadableImage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a skip-and-log policy may swallow this error
    pub fn is_skippable(&self) -> bool {
        matches!(self, PokedexError::UnreadableImage { .. })
    }
}

/// Convenience Result type for Pokedex operations
pub type Result<T> = std::result::Result<T, PokedexError>;
