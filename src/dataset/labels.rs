//! Label encoding
//!
//! Class labels get integer indices in first-seen order. The resulting
//! [`LabelIndex`] is an explicit, immutable value: it is built once from the
//! training labels, saved next to the model, and handed to every consumer,
//! including the predictor, which decodes with the very same map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::utils::error::{PokedexError, Result};

/// Stable label -> index assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct LabelIndex {
    labels: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl LabelIndex {
    /// Scan `labels` once; a label's index is the number of distinct labels
    /// seen strictly before its first occurrence
    pub fn encode<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut index = Self {
            labels: Vec::new(),
            lookup: HashMap::new(),
        };

        for label in labels {
            let label = label.as_ref();
            if !index.lookup.contains_key(label) {
                index.lookup.insert(label.to_string(), index.labels.len());
                index.labels.push(label.to_string());
            }
        }

        index
    }

    /// Index assigned to `label`
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.lookup.get(label).copied()
    }

    /// Label assigned to `index`
    pub fn label_of(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Number of distinct classes
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels ordered by index
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl From<Vec<String>> for LabelIndex {
    fn from(labels: Vec<String>) -> Self {
        Self::encode(&labels)
    }
}

impl From<LabelIndex> for Vec<String> {
    fn from(index: LabelIndex) -> Self {
        index.labels
    }
}

/// Build the label index for a label sequence, returning it with its class count
pub fn encode<S: AsRef<str>>(labels: &[S]) -> (LabelIndex, usize) {
    let index = LabelIndex::encode(labels);
    let class_count = index.len();
    (index, class_count)
}

/// Row-major one-hot target matrix
#[derive(Debug, Clone, PartialEq)]
pub struct OneHotTargets {
    data: Vec<f32>,
    rows: usize,
    num_classes: usize,
}

impl OneHotTargets {
    /// Number of rows (one per dataset entry)
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (one per class)
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// The row for entry `index`
    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.num_classes;
        &self.data[start..start + self.num_classes]
    }

    /// Column holding the 1 in row `index`
    pub fn hot_index(&self, index: usize) -> Option<usize> {
        self.row(index).iter().position(|&v| v == 1.0)
    }

    /// Flat row-major values
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// One-hot encode `labels` against `index`
///
/// Row `i` has a single 1 at `index[labels[i]]`. Fails on a label the index
/// does not contain.
pub fn one_hot<S: AsRef<str>>(index: &LabelIndex, labels: &[S]) -> Result<OneHotTargets> {
    let num_classes = index.len();
    let mut data = vec![0.0f32; labels.len() * num_classes];

    for (row, label) in labels.iter().enumerate() {
        let label = label.as_ref();
        let column = index
            .index_of(label)
            .ok_or_else(|| PokedexError::UnknownLabel(label.to_string()))?;
        data[row * num_classes + column] = 1.0;
    }

    Ok(OneHotTargets {
        data,
        rows: labels.len(),
        num_classes,
    })
}
