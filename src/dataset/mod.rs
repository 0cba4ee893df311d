//! Dataset module for creature image data
//!
//! This module provides functionality for:
//! - Resolving the list of supported classes (species file or directory discovery)
//! - Assembling ordered (path, label) entries from per-class folders
//! - Encoding labels into stable indices and one-hot targets
//! - Building the feature matrix from a frozen extractor
//! - Burn `Dataset`/`Batcher` plumbing for fitting the classifier head
//!
//! ## Directory Layout
//!
//! The data root holds one subdirectory per class label; the directory name is
//! the label. Each subdirectory holds zero or more images. A directory may be
//! empty, or contain only a fallback screenshot the scraper wrote when it found
//! no images; such classes contribute no entries.

pub mod burn_dataset;
pub mod features;
pub mod labels;
pub mod loader;

use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::utils::error::{PokedexError, Result};

// Re-export main types for convenience
pub use burn_dataset::{EmbeddingBatch, EmbeddingBatcher, EmbeddingDataset, EmbeddingItem};
pub use features::{build_feature_matrix, FeatureMatrix, FeatureMatrixOutput, TrainingSet};
pub use labels::{encode, one_hot, LabelIndex, OneHotTargets};
pub use loader::{CreatureDataset, DatasetAssembler, DatasetEntry, DatasetStats};

/// Default number of files taken from each class directory
pub const DEFAULT_FILE_LIMIT: usize = 30;

/// Extensions the scraper writes for real images
///
/// The scraper's `page_screen.png` fallback is deliberately not matched.
pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 2] = ["jpeg", "jpg"];

/// Read an ordered class list from a JSON array of strings
pub fn load_class_list(path: &Path) -> Result<Vec<String>> {
    let json = std::fs::read_to_string(path)?;
    let classes: Vec<String> = serde_json::from_str(&json)?;

    if classes.is_empty() {
        return Err(PokedexError::Config(format!(
            "class list {:?} is empty",
            path
        )));
    }

    debug!("Loaded {} classes from {:?}", classes.len(), path);
    Ok(classes)
}

/// Discover class labels as the subdirectories of `root`, sorted by name
pub fn discover_classes(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(PokedexError::Config(format!(
            "data directory {:?} does not exist",
            root
        )));
    }

    let mut classes = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_dir() {
            classes.push(entry.file_name().to_string_lossy().to_string());
        }
    }

    debug!("Discovered {} class directories under {:?}", classes.len(), root);
    Ok(classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_class_list_keeps_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pokemon.json");
        fs::write(&path, r#"["squirtle", "bulbasaur", "charmander"]"#).unwrap();

        let classes = load_class_list(&path).unwrap();
        assert_eq!(classes, vec!["squirtle", "bulbasaur", "charmander"]);
    }

    #[test]
    fn test_load_class_list_rejects_bad_input() {
        let dir = TempDir::new().unwrap();

        let empty = dir.path().join("empty.json");
        fs::write(&empty, "[]").unwrap();
        assert!(matches!(
            load_class_list(&empty),
            Err(PokedexError::Config(_))
        ));

        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, "{not json").unwrap();
        assert!(matches!(
            load_class_list(&garbage),
            Err(PokedexError::Serialization(_))
        ));
    }

    #[test]
    fn test_discover_classes_sorted_dirs_only() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("squirtle")).unwrap();
        fs::create_dir(dir.path().join("bulbasaur")).unwrap();
        fs::create_dir(dir.path().join("bulbasaur").join("nested")).unwrap();
        fs::write(dir.path().join("pokemon.json"), "[]").unwrap();

        let classes = discover_classes(dir.path()).unwrap();
        assert_eq!(classes, vec!["bulbasaur", "squirtle"]);
    }

    #[test]
    fn test_discover_classes_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            discover_classes(&dir.path().join("nope")),
            Err(PokedexError::Config(_))
        ));
    }
}
