//! Burn Dataset Integration
//!
//! Exposes a [`TrainingSet`] through Burn's `Dataset` trait and batches
//! (embedding, one-hot) pairs into tensors for the classifier trainer.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;

use super::features::TrainingSet;

/// One training row ready for Burn
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingItem {
    /// Flattened embedding [embedding_dim]
    pub embedding: Vec<f32>,
    /// One-hot target [num_classes]
    pub target: Vec<f32>,
}

/// View of a training set through Burn's `Dataset` trait
///
/// Rows are copied out one item at a time in [`Dataset::get`]; the feature
/// matrix itself is never duplicated.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingDataset<'a> {
    set: &'a TrainingSet,
}

impl<'a> EmbeddingDataset<'a> {
    pub fn from_training_set(set: &'a TrainingSet) -> Self {
        Self { set }
    }

    /// The training set this dataset reads from
    pub fn training_set(&self) -> &'a TrainingSet {
        self.set
    }

    pub fn embedding_dim(&self) -> usize {
        self.set.features().dim()
    }

    pub fn num_classes(&self) -> usize {
        self.set.num_classes()
    }
}

impl Dataset<EmbeddingItem> for EmbeddingDataset<'_> {
    fn get(&self, index: usize) -> Option<EmbeddingItem> {
        if index >= self.set.len() {
            return None;
        }
        Some(EmbeddingItem {
            embedding: self.set.features().row(index).to_vec(),
            target: self.set.targets().row(index).to_vec(),
        })
    }

    fn len(&self) -> usize {
        self.set.len()
    }
}

/// A batch of embeddings and their targets
#[derive(Clone, Debug)]
pub struct EmbeddingBatch<B: Backend> {
    /// [batch_size, embedding_dim]
    pub embeddings: Tensor<B, 2>,
    /// [batch_size, num_classes]
    pub targets: Tensor<B, 2>,
}

/// Batcher stacking embedding items into tensors
#[derive(Clone, Debug)]
pub struct EmbeddingBatcher {
    embedding_dim: usize,
    num_classes: usize,
}

impl EmbeddingBatcher {
    pub fn new(embedding_dim: usize, num_classes: usize) -> Self {
        Self {
            embedding_dim,
            num_classes,
        }
    }
}

impl<B: Backend> Batcher<B, EmbeddingItem, EmbeddingBatch<B>> for EmbeddingBatcher {
    fn batch(&self, items: Vec<EmbeddingItem>, device: &B::Device) -> EmbeddingBatch<B> {
        let batch_size = items.len();

        let mut embeddings = Vec::with_capacity(batch_size * self.embedding_dim);
        let mut targets = Vec::with_capacity(batch_size * self.num_classes);
        for item in items {
            embeddings.extend(item.embedding);
            targets.extend(item.target);
        }

        let embeddings = Tensor::<B, 2>::from_data(
            TensorData::new(embeddings, [batch_size, self.embedding_dim]),
            device,
        );
        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(targets, [batch_size, self.num_classes]),
            device,
        );

        EmbeddingBatch {
            embeddings,
            targets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{encode, FeatureMatrix};

    fn training_set() -> TrainingSet {
        let mut matrix = FeatureMatrix::with_capacity(3, 3);
        matrix.push_row("bulbasaur", &[0.1, 0.2, 0.3]).unwrap();
        matrix.push_row("squirtle", &[0.4, 0.5, 0.6]).unwrap();
        matrix.push_row("bulbasaur", &[0.7, 0.8, 0.9]).unwrap();
        let (labels, _) = encode(matrix.row_labels());
        TrainingSet::new(matrix, &labels).unwrap()
    }

    #[test]
    fn test_dataset_rows() {
        let set = training_set();
        let dataset = EmbeddingDataset::from_training_set(&set);

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.embedding_dim(), 3);
        assert_eq!(dataset.num_classes(), 2);

        let item = dataset.get(1).unwrap();
        assert_eq!(item.embedding, vec![0.4, 0.5, 0.6]);
        assert_eq!(item.target, vec![0.0, 1.0]);
        assert!(dataset.get(3).is_none());
    }

    #[test]
    fn test_dataset_reads_through_to_training_set() {
        let set = training_set();
        let dataset = EmbeddingDataset::from_training_set(&set);

        assert!(std::ptr::eq(dataset.training_set(), &set));
        assert!(std::ptr::eq(
            dataset.training_set().features().as_slice().as_ptr(),
            set.features().as_slice().as_ptr()
        ));
        for row in 0..set.len() {
            let item = dataset.get(row).unwrap();
            assert_eq!(item.embedding, set.features().row(row));
            assert_eq!(item.target, set.targets().row(row));
        }
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_batcher_shapes() {
        use burn_ndarray::NdArray;

        let set = training_set();
        let dataset = EmbeddingDataset::from_training_set(&set);
        let batcher = EmbeddingBatcher::new(dataset.embedding_dim(), dataset.num_classes());
        let items = vec![dataset.get(2).unwrap(), dataset.get(0).unwrap()];

        let device = <NdArray as Backend>::Device::default();
        let batch: EmbeddingBatch<NdArray> = batcher.batch(items, &device);

        assert_eq!(batch.embeddings.dims(), [2, 3]);
        assert_eq!(batch.targets.dims(), [2, 2]);
        assert_eq!(
            batch.targets.into_data().to_vec::<f32>().unwrap(),
            vec![1.0, 0.0, 1.0, 0.0]
        );
    }
}
