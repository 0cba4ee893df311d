//! Inference Predictor Module
//!
//! Mirrors the training path for single images: load, preprocess, embed,
//! classify, then decode the argmax with the saved label index.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor, TensorData},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dataset::LabelIndex;
use crate::model::{CreatureClassifier, FeatureExtractor, TrainedModel};
use crate::preprocess::{load_image, preprocess};
use crate::utils::error::{PokedexError, Result};

/// Number of ranked classes kept in a result
pub const DEFAULT_TOP_K: usize = 5;

/// Index of the largest value; the first one wins on ties
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if v <= b || v.is_nan() => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Path to the input image (if applicable)
    pub image_path: Option<PathBuf>,

    /// Predicted class index
    pub predicted_class: usize,

    /// Predicted class label
    pub label: String,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Full probability distribution over all classes
    pub probabilities: Vec<f32>,

    /// Top-k predictions with their probabilities
    pub top_k: Vec<(usize, String, f32)>,

    /// Inference time in milliseconds
    pub inference_time_ms: f64,
}

impl PredictionResult {
    /// Decode a probability vector with `labels`
    ///
    /// Fails with `UnknownIndex` when the argmax has no label, which means the
    /// label index and the classifier disagree.
    pub fn from_probabilities(
        probabilities: Vec<f32>,
        labels: &LabelIndex,
        top_k: usize,
        inference_time: Duration,
        image_path: Option<PathBuf>,
    ) -> Result<Self> {
        let unknown = |index| PokedexError::UnknownIndex {
            index,
            num_labels: labels.len(),
        };

        let predicted_class = argmax(&probabilities).ok_or_else(|| unknown(0))?;
        let label = labels
            .label_of(predicted_class)
            .ok_or_else(|| unknown(predicted_class))?
            .to_string();

        let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let top_k = ranked
            .into_iter()
            .take(top_k)
            .filter_map(|(idx, prob)| labels.label_of(idx).map(|name| (idx, name.to_string(), prob)))
            .collect();

        Ok(Self {
            image_path,
            predicted_class,
            label,
            confidence: probabilities[predicted_class],
            probabilities,
            top_k,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        })
    }
}

/// Predict the label of the image at `image_path`
pub fn predict<B, E>(
    extractor: &E,
    classifier: &CreatureClassifier<B>,
    image_path: &Path,
    labels: &LabelIndex,
) -> Result<PredictionResult>
where
    B: Backend,
    E: FeatureExtractor + ?Sized,
{
    predict_top_k(extractor, classifier, image_path, labels, DEFAULT_TOP_K)
}

fn predict_top_k<B, E>(
    extractor: &E,
    classifier: &CreatureClassifier<B>,
    image_path: &Path,
    labels: &LabelIndex,
    top_k: usize,
) -> Result<PredictionResult>
where
    B: Backend,
    E: FeatureExtractor + ?Sized,
{
    let start = Instant::now();

    let embedding = {
        let image = load_image(image_path)?;
        let batch = preprocess(image, extractor.input_size())?;
        extractor.embed(&batch)?
    };

    let dim = classifier.embedding_dim();
    if embedding.len() != dim {
        return Err(PokedexError::ShapeMismatch {
            stage: "classifier input",
            expected: vec![dim],
            actual: vec![embedding.len()],
        });
    }

    let device = classifier.devices().into_iter().next().unwrap_or_default();
    let input = Tensor::<B, 2>::from_data(TensorData::new(embedding, [1, dim]), &device);
    let probabilities = classifier
        .forward_softmax(input)
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| PokedexError::Tensor(format!("{:?}", e)))?;

    let result = PredictionResult::from_probabilities(
        probabilities,
        labels,
        top_k,
        start.elapsed(),
        Some(image_path.to_path_buf()),
    )?;
    debug!("{:?} -> {} ({:.3})", image_path, result.label, result.confidence);
    Ok(result)
}

/// A loaded model paired with the extractor it was trained against
pub struct Predictor<B: Backend, E: FeatureExtractor> {
    extractor: E,
    model: TrainedModel<B>,
    top_k: usize,
}

impl<B: Backend, E: FeatureExtractor> Predictor<B, E> {
    /// Fails with `ShapeMismatch` if the extractor's embedding length is not
    /// what the classifier was trained on
    pub fn new(extractor: E, model: TrainedModel<B>) -> Result<Self> {
        if extractor.embedding_dim() != model.config.embedding_dim {
            return Err(PokedexError::ShapeMismatch {
                stage: "extractor/classifier embedding",
                expected: vec![model.config.embedding_dim],
                actual: vec![extractor.embedding_dim()],
            });
        }

        if extractor.layer() != model.metadata.extractor_layer {
            warn!(
                "Extractor layer {} differs from training layer {}",
                extractor.layer(),
                model.metadata.extractor_layer
            );
        }

        Ok(Self {
            extractor,
            model,
            top_k: DEFAULT_TOP_K,
        })
    }

    /// Configure how many ranked classes each result keeps
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn labels(&self) -> &LabelIndex {
        &self.model.labels
    }

    /// Predict on an image from a file path
    pub fn predict_file(&self, path: &Path) -> Result<PredictionResult> {
        predict_top_k(
            &self.extractor,
            &self.model.classifier,
            path,
            &self.model.labels,
            self.top_k,
        )
    }

    /// Predict on multiple images, one at a time, pairing each result with
    /// the label its file name implies (see [`Predictor::expected_label`])
    pub fn predict_batch(&self, paths: &[PathBuf]) -> Result<Vec<(PredictionResult, Option<String>)>> {
        paths
            .iter()
            .map(|path| Ok((self.predict_file(path)?, self.expected_label(path))))
            .collect()
    }

    /// The known class named by a file's stem, e.g. `squirtle.jpg`
    pub fn expected_label(&self, path: &Path) -> Option<String> {
        let stem = path.file_stem()?.to_string_lossy().to_lowercase();
        self.model
            .labels
            .index_of(&stem)
            .map(|_| stem)
    }
}

/// Batch prediction statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchPredictionStats {
    /// Total number of images processed
    pub total_images: usize,

    /// Total inference time
    pub total_time_ms: f64,

    /// Average inference time per image
    pub avg_time_per_image_ms: f64,

    /// Images whose expected label is known
    pub labelled: usize,

    /// Labelled images predicted correctly
    pub correct: usize,
}

impl BatchPredictionStats {
    /// Calculate statistics from predictions paired with optional expected labels
    pub fn from_predictions(predictions: &[(PredictionResult, Option<String>)]) -> Self {
        if predictions.is_empty() {
            return Self::default();
        }

        let total_time_ms: f64 = predictions.iter().map(|(p, _)| p.inference_time_ms).sum();
        let labelled = predictions.iter().filter(|(_, e)| e.is_some()).count();
        let correct = predictions
            .iter()
            .filter(|(p, e)| e.as_deref() == Some(p.label.as_str()))
            .count();

        Self {
            total_images: predictions.len(),
            total_time_ms,
            avg_time_per_image_ms: total_time_ms / predictions.len() as f64,
            labelled,
            correct,
        }
    }

    /// Accuracy over the labelled images
    pub fn accuracy(&self) -> Option<f64> {
        (self.labelled > 0).then(|| self.correct as f64 / self.labelled as f64)
    }
}

impl std::fmt::Display for BatchPredictionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Batch Prediction Statistics:")?;
        writeln!(f, "  Total images: {}", self.total_images)?;
        writeln!(f, "  Total time: {:.2} ms", self.total_time_ms)?;
        writeln!(f, "  Average time/image: {:.2} ms", self.avg_time_per_image_ms)?;
        if let Some(accuracy) = self.accuracy() {
            writeln!(
                f,
                "  Correct: {}/{} ({:.1}%)",
                self.correct,
                self.labelled,
                accuracy * 100.0
            )?;
        }
        Ok(())
    }
}
