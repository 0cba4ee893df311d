//! Classifier Trainer
//!
//! Fits the classifier head on a [`TrainingSet`] with a custom loop:
//! - categorical cross-entropy against the one-hot targets
//! - Adam at the configured learning rate
//! - the full set every epoch, reshuffled with a seeded RNG
//!
//! There is no validation split and no early stopping; the epoch count is
//! fixed by configuration.

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        activation::log_softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{EmbeddingBatch, EmbeddingBatcher, EmbeddingDataset, TrainingSet};
use crate::model::{CreatureClassifier, TrainingConfig};
use crate::utils::error::{PokedexError, Result};
use crate::utils::logging::TrainingLogger;

/// Loss and accuracy of one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean batch loss
    pub loss: f64,
    /// Fraction of rows classified correctly while training
    pub accuracy: f64,
}

/// Training progress
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingState {
    /// Completed epochs
    pub epochs: Vec<EpochMetrics>,
    /// Rows seen across all epochs
    pub samples_seen: usize,
    /// Optimizer steps taken
    pub iterations: usize,
}

impl TrainingState {
    pub fn record_epoch(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|m| m.loss)
    }

    pub fn final_accuracy(&self) -> Option<f64> {
        self.epochs.last().map(|m| m.accuracy)
    }
}

/// Categorical cross-entropy of `logits` against one-hot `targets`
///
/// Uses log-softmax on the logits, which equals cross-entropy on the softmax
/// output without its overflow at extreme logits.
pub fn categorical_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    (targets * log_softmax(logits, 1))
        .sum_dim(1)
        .mean()
        .neg()
}

/// Rows whose argmax matches the target's hot column
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> usize {
    let correct: i64 = logits
        .argmax(1)
        .equal(targets.argmax(1))
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

/// Row order for one epoch
fn epoch_order(len: usize, shuffle: bool, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    if shuffle {
        indices.shuffle(rng);
    }
    indices
}

/// Fitted classifier, moved to the inference backend
#[derive(Debug)]
pub struct FitOutput<B: AutodiffBackend> {
    pub model: CreatureClassifier<B::InnerBackend>,
    pub state: TrainingState,
}

/// Fits a classifier head on an autodiff backend
pub struct ClassifierTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> ClassifierTrainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        Self { config, device }
    }

    /// Train `model` for the configured number of epochs
    pub fn fit(&self, mut model: CreatureClassifier<B>, set: &TrainingSet) -> Result<FitOutput<B>> {
        self.config.validate()?;

        if set.is_empty() {
            return Err(PokedexError::Training(
                "training set has no rows".to_string(),
            ));
        }

        if model.embedding_dim() != set.features().dim() {
            return Err(PokedexError::ShapeMismatch {
                stage: "classifier input",
                expected: vec![model.embedding_dim()],
                actual: vec![set.features().dim()],
            });
        }

        if model.num_classes() != set.num_classes() {
            return Err(PokedexError::ShapeMismatch {
                stage: "classifier output",
                expected: vec![model.num_classes()],
                actual: vec![set.num_classes()],
            });
        }

        let dataset = EmbeddingDataset::from_training_set(set);
        let batcher = EmbeddingBatcher::new(dataset.embedding_dim(), dataset.num_classes());
        let mut optimizer = AdamConfig::new().init();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let mut state = TrainingState::default();
        let mut logger = TrainingLogger::new(self.config.epochs);

        for epoch in 0..self.config.epochs {
            logger.start_epoch(epoch);

            let order = epoch_order(dataset.len(), self.config.shuffle, &mut rng);
            let mut loss_sum = 0.0f64;
            let mut correct = 0usize;
            let mut batches = 0usize;

            for chunk in order.chunks(self.config.batch_size) {
                let items: Vec<_> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
                let batch: EmbeddingBatch<B> = batcher.batch(items, &self.device);

                let logits = model.forward(batch.embeddings);
                let loss = categorical_cross_entropy(logits.clone(), batch.targets.clone());

                let loss_value: f64 = loss.clone().into_scalar().elem();
                loss_sum += loss_value;
                correct += count_correct(logits, batch.targets);

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(self.config.learning_rate, model, grads);

                batches += 1;
                state.iterations += 1;
                state.samples_seen += chunk.len();
                debug!("Epoch {} batch {}: loss {:.4}", epoch + 1, batches, loss_value);
            }

            let metrics = EpochMetrics {
                epoch,
                loss: loss_sum / batches.max(1) as f64,
                accuracy: correct as f64 / dataset.len() as f64,
            };
            logger.end_epoch(metrics.loss, metrics.accuracy);
            state.record_epoch(metrics);
        }

        logger.log_complete(state.final_accuracy().unwrap_or(0.0));

        Ok(FitOutput {
            model: model.valid(),
            state,
        })
    }
}
