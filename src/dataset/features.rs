//! Feature Matrix Builder
//!
//! Feeds every dataset entry through load -> preprocess -> extract, one image
//! at a time, and appends the embedding to a pre-sized matrix. All buffers
//! for one image live inside [`embed_entry`] and are dropped when it returns,
//! on success or error, before the next image is touched. Only the matrix
//! grows across iterations.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::labels::{one_hot, LabelIndex, OneHotTargets};
use super::loader::{CreatureDataset, DatasetEntry};
use crate::config::UnreadablePolicy;
use crate::model::extractor::{Embedding, FeatureExtractor};
use crate::preprocess::{load_image, preprocess};
use crate::utils::error::{PokedexError, Result};
use crate::utils::logging::ProgressLogger;

/// Row-major embeddings, one row per kept dataset entry
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Vec<f32>,
    dim: usize,
    row_labels: Vec<String>,
}

impl FeatureMatrix {
    /// Empty matrix with room for `rows` embeddings of length `dim`
    pub fn with_capacity(dim: usize, rows: usize) -> Self {
        Self {
            data: Vec::with_capacity(dim * rows),
            dim,
            row_labels: Vec::with_capacity(rows),
        }
    }

    /// Append one embedding and the label of the entry it came from
    pub fn push_row(&mut self, label: &str, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dim {
            return Err(PokedexError::ShapeMismatch {
                stage: "feature matrix row",
                expected: vec![self.dim],
                actual: vec![embedding.len()],
            });
        }
        self.data.extend_from_slice(embedding);
        self.row_labels.push(label.to_string());
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.row_labels.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    /// Label of every row, in row order
    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Result of a builder pass
#[derive(Debug, Clone)]
pub struct FeatureMatrixOutput {
    pub matrix: FeatureMatrix,
    /// Entries left out under the skip policy
    pub skipped: Vec<PathBuf>,
}

/// Embed every entry of `dataset`, strictly in order
///
/// Under [`UnreadablePolicy::Abort`] the first unreadable image ends the
/// pass. Under [`UnreadablePolicy::Skip`] it is logged and left out; every
/// other error still ends the pass.
pub fn build_feature_matrix<E: FeatureExtractor + ?Sized>(
    dataset: &CreatureDataset,
    extractor: &E,
    policy: UnreadablePolicy,
) -> Result<FeatureMatrixOutput> {
    info!(
        "Extracting features for {} images at layer {} ({} floats each)",
        dataset.len(),
        extractor.layer(),
        extractor.embedding_dim()
    );

    let mut matrix = FeatureMatrix::with_capacity(extractor.embedding_dim(), dataset.len());
    let mut skipped = Vec::new();
    let mut progress = ProgressLogger::new("Feature extraction", dataset.len());

    for entry in dataset.entries() {
        match embed_entry(entry, extractor) {
            Ok(embedding) => matrix.push_row(&entry.class_label, &embedding)?,
            Err(err) if policy == UnreadablePolicy::Skip && err.is_skippable() => {
                warn!("Skipping {:?}: {}", entry.file_path, err);
                skipped.push(entry.file_path.clone());
            }
            Err(err) => return Err(err),
        }
        progress.increment();
    }
    progress.finish();

    if !skipped.is_empty() {
        warn!("{} of {} images skipped", skipped.len(), dataset.len());
    }

    Ok(FeatureMatrixOutput { matrix, skipped })
}

/// Load, preprocess and embed one entry
fn embed_entry<E: FeatureExtractor + ?Sized>(
    entry: &DatasetEntry,
    extractor: &E,
) -> Result<Embedding> {
    let image = load_image(&entry.file_path)?;
    let batch = preprocess(image, extractor.input_size())?;
    let embedding = extractor.embed(&batch)?;
    debug!("Embedded {:?}", entry.file_path);
    Ok(embedding)
}

/// Feature matrix paired with its one-hot targets
///
/// Targets are always built from the matrix's own row labels, so the two
/// matrices share row count and order.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    features: FeatureMatrix,
    targets: OneHotTargets,
}

impl TrainingSet {
    pub fn new(features: FeatureMatrix, labels: &LabelIndex) -> Result<Self> {
        let targets = one_hot(labels, features.row_labels())?;
        if targets.rows() != features.rows() {
            return Err(PokedexError::ShapeMismatch {
                stage: "training set",
                expected: vec![features.rows()],
                actual: vec![targets.rows()],
            });
        }
        Ok(Self { features, targets })
    }

    pub fn features(&self) -> &FeatureMatrix {
        &self.features
    }

    pub fn targets(&self) -> &OneHotTargets {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.features.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.features.rows() == 0
    }

    pub fn num_classes(&self) -> usize {
        self.targets.num_classes()
    }
}
