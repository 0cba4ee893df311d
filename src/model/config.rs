//! Model Configuration Module
//!
//! Configuration for the frozen feature extractor and for fitting the
//! classifier head.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::utils::error::{PokedexError, Result};

/// Configuration for the frozen, pretrained feature extractor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractorConfig {
    /// Pretrained weights for the full backbone
    ///
    /// Either a TensorFlow.js `model.json` or a burn record written by
    /// `import-weights`.
    pub weights: Option<PathBuf>,

    /// Allow a randomly initialised backbone when no weights are given
    ///
    /// Embeddings from random weights carry no pretrained features; only
    /// useful for dry runs and tests.
    #[serde(default)]
    pub random_init: bool,

    /// Layer whose output becomes the embedding
    ///
    /// Changing this changes the embedding dimension and invalidates any
    /// classifier trained against the previous layer.
    pub layer: String,

    /// MobileNet width multiplier
    pub alpha: f64,

    /// Side length of the square input the backbone expects
    pub input_size: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            weights: None,
            random_init: false,
            layer: super::DEFAULT_LAYER.to_string(),
            alpha: super::DEFAULT_ALPHA,
            input_size: crate::IMAGE_SIZE,
        }
    }
}

impl ExtractorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.input_size < super::MIN_INPUT_SIZE {
            return Err(PokedexError::Config(format!(
                "extractor input_size must be at least {}, got {}",
                super::MIN_INPUT_SIZE,
                self.input_size
            )));
        }

        if !(self.alpha > 0.0) {
            return Err(PokedexError::Config(
                "extractor alpha must be positive".to_string(),
            ));
        }

        if self.layer.trim().is_empty() {
            return Err(PokedexError::Config(
                "extractor layer must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Fail unless weights are configured or random init was asked for
    pub fn require_weights(&self) -> Result<()> {
        if self.weights.is_none() && !self.random_init {
            return Err(PokedexError::Config(
                "no extractor weights configured; pass --weights (model.json or .mpk) \
                 or opt into --random-init"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Hyperparameters for fitting the classifier head
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingConfig {
    /// Number of passes over the full feature matrix
    pub epochs: usize,

    /// Rows per optimizer step
    pub batch_size: usize,

    /// Adam learning rate
    pub learning_rate: f64,

    /// Width of the hidden dense layer
    pub hidden_units: usize,

    /// Reshuffle row order every epoch
    pub shuffle: bool,

    /// Random seed for the shuffle order and the classifier's initial weights
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: crate::training::DEFAULT_EPOCHS,
            batch_size: crate::training::DEFAULT_BATCH_SIZE,
            learning_rate: crate::training::DEFAULT_LEARNING_RATE,
            hidden_units: super::DEFAULT_HIDDEN_UNITS,
            shuffle: true,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Create a fast config for smoke tests
    pub fn debug() -> Self {
        Self {
            epochs: 1,
            batch_size: 4,
            hidden_units: 16,
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(PokedexError::Config("epochs must be greater than 0".to_string()));
        }

        if self.batch_size == 0 {
            return Err(PokedexError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if !(self.learning_rate > 0.0) {
            return Err(PokedexError::Config(
                "learning_rate must be positive".to_string(),
            ));
        }

        if self.hidden_units == 0 {
            return Err(PokedexError::Config(
                "hidden_units must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extractor_config_default() {
        let config = ExtractorConfig::default();
        assert_eq!(config.layer, "conv_pw_13_relu");
        assert_eq!(config.input_size, 224);
        assert_eq!(config.alpha, 0.25);
        assert!(config.weights.is_none());
        assert!(!config.random_init);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_extractor_requires_weights_or_opt_in() {
        let mut config = ExtractorConfig::default();
        assert!(matches!(config.require_weights(), Err(PokedexError::Config(_))));

        config.random_init = true;
        assert!(config.require_weights().is_ok());

        config.random_init = false;
        config.weights = Some(PathBuf::from("weights/model.json"));
        assert!(config.require_weights().is_ok());
    }

    #[test]
    fn test_random_init_defaults_off_in_config_files() {
        let json = r#"{"weights": null, "layer": "conv_pw_13_relu", "alpha": 0.25, "input_size": 224}"#;
        let config: ExtractorConfig = serde_json::from_str(json).unwrap();
        assert!(!config.random_init);
    }

    #[test]
    fn test_extractor_config_validation() {
        let mut config = ExtractorConfig::default();
        config.alpha = 0.0;
        assert!(config.validate().is_err());

        config = ExtractorConfig::default();
        config.input_size = 0;
        assert!(config.validate().is_err());

        config.input_size = 31;
        assert!(config.validate().is_err());

        config.input_size = 32;
        assert!(config.validate().is_ok());

        config = ExtractorConfig::default();
        config.layer = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_training_config_default() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 20);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.learning_rate, 1e-4);
        assert_eq!(config.hidden_units, 100);
        assert!(config.shuffle);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_training_config_validation() {
        let mut config = TrainingConfig::default();
        config.epochs = 0;
        assert!(config.validate().is_err());

        config = TrainingConfig::default();
        config.learning_rate = -1.0;
        assert!(config.validate().is_err());

        config = TrainingConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }
}
