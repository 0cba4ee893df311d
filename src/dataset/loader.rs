//! Creature Dataset Assembler
//!
//! Discovers image files under a root directory that holds one subdirectory per
//! class label and turns them into an ordered list of dataset entries.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{DEFAULT_FILE_LIMIT, DEFAULT_IMAGE_EXTENSIONS};
use crate::config::DatasetConfig;
use crate::utils::error::{PokedexError, Result};
use crate::utils::natural_cmp;

/// A single discovered image and the class it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    /// Class label (the directory name, e.g. "bulbasaur")
    pub class_label: String,
    /// Path to the image file
    pub file_path: PathBuf,
}

/// Builds the ordered entry list from the on-disk layout
///
/// ```text
/// root_dir/
/// ├── bulbasaur/
/// │   ├── 0.jpeg
/// │   └── 1.jpeg
/// ├── squirtle/
/// │   └── ...
/// └── ...
/// ```
#[derive(Debug, Clone)]
pub struct DatasetAssembler {
    root_dir: PathBuf,
    file_limit: usize,
    data_limit: Option<usize>,
    extensions: Vec<String>,
}

impl DatasetAssembler {
    /// Create an assembler with the default limits and extensions
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            file_limit: DEFAULT_FILE_LIMIT,
            data_limit: None,
            extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }

    /// Create an assembler from the dataset section of the pipeline config
    pub fn from_config(config: &DatasetConfig) -> Self {
        Self::new(&config.data_dir)
            .with_file_limit(config.file_limit)
            .with_data_limit(config.data_limit)
            .with_extensions(&config.image_extensions)
    }

    /// Cap on files taken from each class directory
    pub fn with_file_limit(mut self, file_limit: usize) -> Self {
        self.file_limit = file_limit;
        self
    }

    /// Cap on entries overall, applied after all classes are flattened
    pub fn with_data_limit(mut self, data_limit: Option<usize>) -> Self {
        self.data_limit = data_limit;
        self
    }

    /// Replace the recognised extensions
    pub fn with_extensions<S: AsRef<str>>(mut self, extensions: &[S]) -> Self {
        self.extensions = extensions
            .iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Assemble entries for `classes`, in list order
    ///
    /// Within a class, files are taken in file-name order and capped at the
    /// file limit. A class directory with no matching files contributes no
    /// entries; a missing class directory is an error.
    pub fn assemble<S: AsRef<str>>(&self, classes: &[S]) -> Result<CreatureDataset> {
        info!("Assembling dataset from: {:?}", self.root_dir);

        let mut entries = Vec::new();
        let mut class_counts = Vec::with_capacity(classes.len());

        for label in classes {
            let label = label.as_ref();
            let class_entries = self.list_class(label)?;

            debug!(
                "Class '{}': {} entries (limit {})",
                label,
                class_entries.len(),
                self.file_limit
            );

            class_counts.push((label.to_string(), class_entries.len()));
            entries.extend(class_entries);
        }

        if let Some(limit) = self.data_limit {
            if entries.len() > limit {
                info!("Applying data limit: {} -> {} entries", entries.len(), limit);
                entries.truncate(limit);
                recount(&mut class_counts, &entries);
            }
        }

        info!(
            "Assembled {} entries across {} classes",
            entries.len(),
            classes.len()
        );

        Ok(CreatureDataset {
            root_dir: self.root_dir.clone(),
            entries,
            class_counts,
        })
    }

    fn list_class(&self, label: &str) -> Result<Vec<DatasetEntry>> {
        let class_dir = self.root_dir.join(label);

        if !class_dir.is_dir() {
            return Err(PokedexError::MissingClassDirectory {
                label: label.to_string(),
                path: class_dir,
            });
        }

        let mut entries = Vec::new();

        for entry in WalkDir::new(&class_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by(|a, b| {
                natural_cmp(&a.file_name().to_string_lossy(), &b.file_name().to_string_lossy())
            })
        {
            if entries.len() >= self.file_limit {
                break;
            }

            let entry = entry.map_err(std::io::Error::from)?;
            let path = entry.path();

            if entry.file_type().is_file() && self.is_image(path) {
                entries.push(DatasetEntry {
                    class_label: label.to_string(),
                    file_path: path.to_path_buf(),
                });
            }
        }

        Ok(entries)
    }

    fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| self.extensions.iter().any(|known| *known == ext))
            .unwrap_or(false)
    }
}

fn recount(class_counts: &mut [(String, usize)], entries: &[DatasetEntry]) {
    for (label, count) in class_counts.iter_mut() {
        *count = entries.iter().filter(|e| &e.class_label == label).count();
    }
}

/// The assembled, immutable list of dataset entries
#[derive(Debug, Clone)]
pub struct CreatureDataset {
    /// Root directory of the dataset
    pub root_dir: PathBuf,
    entries: Vec<DatasetEntry>,
    class_counts: Vec<(String, usize)>,
}

impl CreatureDataset {
    /// All entries, classes in list order then files in name order
    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    /// Get the number of entries in the dataset
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the dataset is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The class label of every entry, in entry order
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.class_label.as_str()).collect()
    }

    /// Get statistics about the dataset
    pub fn get_stats(&self) -> DatasetStats {
        DatasetStats {
            total_entries: self.entries.len(),
            class_counts: self.class_counts.clone(),
        }
    }
}

/// Per-class entry counts after limits were applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_entries: usize,
    pub class_counts: Vec<(String, usize)>,
}

impl DatasetStats {
    /// Classes that ended up with no entries
    pub fn empty_classes(&self) -> Vec<&str> {
        self.class_counts
            .iter()
            .filter(|(_, count)| *count == 0)
            .map(|(label, _)| label.as_str())
            .collect()
    }
}

impl std::fmt::Display for DatasetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total entries: {}", self.total_entries)?;
        writeln!(f, "Classes: {}", self.class_counts.len())?;
        for (label, count) in &self.class_counts {
            let bar_len = if self.total_entries > 0 {
                (*count as f32 / self.total_entries as f32 * 40.0) as usize
            } else {
                0
            };
            writeln!(f, "  {:24} {:5} {}", label, count, "█".repeat(bar_len))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"not decoded here").unwrap();
    }

    fn make_class(root: &Path, label: &str, files: &[&str]) {
        let dir = root.join(label);
        fs::create_dir_all(&dir).unwrap();
        for file in files {
            touch(&dir, file);
        }
    }

    #[test]
    fn test_file_limit_takes_lowest_numbers_first() {
        let root = TempDir::new().unwrap();
        let files: Vec<String> = (0..12).map(|i| format!("{}.jpeg", i)).collect();
        let files: Vec<&str> = files.iter().map(String::as_str).collect();
        make_class(root.path(), "bulbasaur", &files);

        let dataset = DatasetAssembler::new(root.path())
            .with_file_limit(3)
            .assemble(&["bulbasaur"])
            .unwrap();

        let names: Vec<_> = dataset
            .entries()
            .iter()
            .map(|e| e.file_path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["0.jpeg", "1.jpeg", "2.jpeg"]);
    }

    #[test]
    fn test_assemble_preserves_class_and_file_order() {
        let root = TempDir::new().unwrap();
        make_class(root.path(), "squirtle", &["1.jpeg", "0.jpeg"]);
        make_class(root.path(), "bulbasaur", &["2.jpeg", "0.jpeg", "1.jpeg"]);

        let dataset = DatasetAssembler::new(root.path())
            .assemble(&["bulbasaur", "squirtle"])
            .unwrap();

        assert_eq!(dataset.len(), 5);
        assert_eq!(
            dataset.labels(),
            vec!["bulbasaur", "bulbasaur", "bulbasaur", "squirtle", "squirtle"]
        );
        let names: Vec<_> = dataset
            .entries()
            .iter()
            .map(|e| e.file_path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["0.jpeg", "1.jpeg", "2.jpeg", "0.jpeg", "1.jpeg"]);
    }

    #[test]
    fn test_file_limit_caps_each_class() {
        let root = TempDir::new().unwrap();
        make_class(root.path(), "mankey", &["0.jpeg", "1.jpeg", "2.jpeg", "3.jpeg"]);
        make_class(root.path(), "abra", &["0.jpeg"]);

        let dataset = DatasetAssembler::new(root.path())
            .with_file_limit(2)
            .assemble(&["mankey", "abra"])
            .unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(
            dataset.get_stats().class_counts,
            vec![("mankey".to_string(), 2), ("abra".to_string(), 1)]
        );
    }

    #[test]
    fn test_data_limit_applies_after_flattening() {
        let root = TempDir::new().unwrap();
        make_class(root.path(), "bulbasaur", &["0.jpeg", "1.jpeg"]);
        make_class(root.path(), "squirtle", &["0.jpeg", "1.jpeg"]);

        let dataset = DatasetAssembler::new(root.path())
            .with_data_limit(Some(3))
            .assemble(&["bulbasaur", "squirtle"])
            .unwrap();

        assert_eq!(dataset.labels(), vec!["bulbasaur", "bulbasaur", "squirtle"]);
        assert_eq!(
            dataset.get_stats().class_counts,
            vec![("bulbasaur".to_string(), 2), ("squirtle".to_string(), 1)]
        );
    }

    #[test]
    fn test_extension_filter_skips_fallback_screenshot() {
        let root = TempDir::new().unwrap();
        make_class(root.path(), "ditto", &["page_screen.png", "notes.txt", "0.JPEG"]);

        let dataset = DatasetAssembler::new(root.path())
            .assemble(&["ditto"])
            .unwrap();

        assert_eq!(dataset.len(), 1);
        assert!(dataset.entries()[0].file_path.ends_with("0.JPEG"));

        let with_png = DatasetAssembler::new(root.path())
            .with_extensions(&[".png", "jpeg"])
            .assemble(&["ditto"])
            .unwrap();
        assert_eq!(with_png.len(), 2);
    }

    #[test]
    fn test_empty_class_directory_is_valid() {
        let root = TempDir::new().unwrap();
        make_class(root.path(), "missingno", &[]);
        make_class(root.path(), "pikachu", &["0.jpeg"]);

        let dataset = DatasetAssembler::new(root.path())
            .assemble(&["missingno", "pikachu"])
            .unwrap();

        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.get_stats().empty_classes(), vec!["missingno"]);
    }

    #[test]
    fn test_missing_class_directory_is_error() {
        let root = TempDir::new().unwrap();
        make_class(root.path(), "pikachu", &["0.jpeg"]);

        let err = DatasetAssembler::new(root.path())
            .assemble(&["pikachu", "raichu"])
            .unwrap_err();

        match err {
            PokedexError::MissingClassDirectory { label, .. } => assert_eq!(label, "raichu"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_subdirectories_are_not_entries() {
        let root = TempDir::new().unwrap();
        make_class(root.path(), "eevee", &["0.jpeg"]);
        fs::create_dir_all(root.path().join("eevee").join("nested.jpeg")).unwrap();

        let dataset = DatasetAssembler::new(root.path())
            .assemble(&["eevee"])
            .unwrap();
        assert_eq!(dataset.len(), 1);
    }
}
