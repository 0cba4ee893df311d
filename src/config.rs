//! Pipeline Configuration
//!
//! One serde-backed structure holds every recognised option of a training or
//! prediction run. It can be loaded from JSON and is then overridden by CLI
//! flags in `main.rs`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::{DEFAULT_FILE_LIMIT, DEFAULT_IMAGE_EXTENSIONS};
use crate::model::config::{ExtractorConfig, TrainingConfig};
use crate::utils::error::{PokedexError, Result};

/// What to do when a dataset image cannot be decoded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnreadablePolicy {
    /// Stop the whole run on the first unreadable image
    #[default]
    Abort,
    /// Log the file, leave it out of the feature matrix and continue
    Skip,
}

/// Dataset discovery options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetConfig {
    /// Root directory holding one subdirectory per class label
    pub data_dir: PathBuf,

    /// Optional JSON array of class labels; discovery order otherwise
    pub classes_file: Option<PathBuf>,

    /// Maximum number of files taken from each class directory (FILE_LIMIT)
    pub file_limit: usize,

    /// Maximum number of entries overall, applied after flattening (DATA_LIMIT)
    pub data_limit: Option<usize>,

    /// Recognised image extensions, compared case-insensitively
    pub image_extensions: Vec<String>,

    /// Policy for undecodable images
    pub on_unreadable: UnreadablePolicy,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            classes_file: None,
            file_limit: DEFAULT_FILE_LIMIT,
            data_limit: None,
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            on_unreadable: UnreadablePolicy::Abort,
        }
    }
}

/// Complete configuration of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub dataset: DatasetConfig,
    pub extractor: ExtractorConfig,
    pub training: TrainingConfig,
    /// Directory the trained model bundle is written to
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig::default(),
            extractor: ExtractorConfig::default(),
            training: TrainingConfig::default(),
            output_dir: PathBuf::from("dist"),
        }
    }
}

impl PipelineConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        if self.dataset.file_limit == 0 {
            return Err(PokedexError::Config(
                "file_limit must be greater than 0".to_string(),
            ));
        }

        if self.dataset.data_limit == Some(0) {
            return Err(PokedexError::Config(
                "data_limit must be greater than 0 when set".to_string(),
            ));
        }

        if self.dataset.image_extensions.is_empty() {
            return Err(PokedexError::Config(
                "at least one image extension is required".to_string(),
            ));
        }

        self.extractor.validate()?;
        self.training.validate()
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.dataset.file_limit, 30);
        assert_eq!(config.dataset.data_limit, None);
        assert_eq!(config.dataset.on_unreadable, UnreadablePolicy::Abort);
        assert_eq!(config.output_dir, PathBuf::from("dist"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_validation() {
        let mut config = PipelineConfig::default();
        config.dataset.file_limit = 0;
        assert!(config.validate().is_err());

        config = PipelineConfig::default();
        config.dataset.data_limit = Some(0);
        assert!(config.validate().is_err());

        config = PipelineConfig::default();
        config.dataset.image_extensions.clear();
        assert!(config.validate().is_err());

        config = PipelineConfig::default();
        config.training.epochs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_config_save_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("pokedex.json");

        let mut config = PipelineConfig::default();
        config.dataset.file_limit = 5;
        config.dataset.on_unreadable = UnreadablePolicy::Skip;
        config.training.epochs = 3;
        config.save(&path)?;

        let loaded = PipelineConfig::load(&path)?;
        assert_eq!(loaded, config);

        let json = std::fs::read_to_string(&path)?;
        assert!(json.contains("\"skip\""));
        Ok(())
    }
}
