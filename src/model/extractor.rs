//! Frozen Feature Extractor
//!
//! The pipeline only needs one capability from the pretrained network: map a
//! normalized batch to a flat embedding. [`FeatureExtractor`] is that seam;
//! [`MobileNetExtractor`] backs it with the Burn MobileNet body, truncated at
//! a named layer.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor, TensorData},
};
use tracing::{info, warn};

use super::config::ExtractorConfig;
use super::mobilenet::{MobileNetBody, MobileNetConfig, TruncationPoint};
use super::tfjs::KerasWeights;
use crate::preprocess::transform::CHANNELS;
use crate::preprocess::NormalizedBatch;
use crate::utils::error::{PokedexError, Result};

/// One flattened feature map
pub type Embedding = Vec<f32>;

/// A frozen network mapping one normalized image batch to an embedding
pub trait FeatureExtractor {
    /// Side length of the square input the network expects
    fn input_size(&self) -> usize;

    /// Length of every embedding this extractor produces
    fn embedding_dim(&self) -> usize;

    /// Name of the layer whose output is the embedding
    fn layer(&self) -> &str;

    /// Embed a `[1, input_size, input_size, 3]` batch
    fn embed(&self, batch: &NormalizedBatch) -> Result<Embedding>;
}

/// MobileNet v1 truncated at a named layer
///
/// Weights are never updated; the body runs on a plain (non-autodiff)
/// backend so no gradient graph is built.
#[derive(Debug)]
pub struct MobileNetExtractor<B: Backend> {
    body: MobileNetBody<B>,
    layer: String,
    input_size: usize,
    output_shape: [usize; 3],
    device: B::Device,
}

impl<B: Backend> MobileNetExtractor<B> {
    /// Build the backbone, load pretrained weights and truncate it
    ///
    /// Fails with a configuration error when no weights are configured,
    /// unless `random_init` is set.
    pub fn new(config: &ExtractorConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;
        config.require_weights()?;
        let point = TruncationPoint::parse(&config.layer)?;

        let body = MobileNetConfig::new()
            .with_alpha(config.alpha)
            .init::<B>(device);

        let body = match &config.weights {
            Some(path) => load_weights(body, path, device)?,
            None => {
                warn!(
                    "Random init requested; MobileNet (alpha {}) has no pretrained features",
                    config.alpha
                );
                body
            }
        };

        let output_shape = point.output_shape(config.alpha, config.input_size);
        info!(
            "Feature extractor truncated at {} -> {}x{}x{}",
            config.layer, output_shape[0], output_shape[1], output_shape[2]
        );

        Ok(Self {
            body: body.truncate(point),
            layer: point.name(),
            input_size: config.input_size,
            output_shape,
            device: device.clone(),
        })
    }

    /// `[height, width, channels]` of the truncated output
    pub fn output_shape(&self) -> [usize; 3] {
        self.output_shape
    }
}

/// Save a full MobileNet body as a burn record [`MobileNetExtractor::new`] loads
pub fn save_weights<B: Backend>(body: MobileNetBody<B>, path: &Path) -> Result<()> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    body.save_file(path, &recorder)
        .map_err(|e| PokedexError::PersistenceFailure {
            path: path.to_path_buf(),
            reason: format!("{:?}", e),
        })
}

/// Convert TensorFlow.js MobileNet weights into a burn record
///
/// Returns the path of the written `.mpk` file.
pub fn import_keras_weights<B: Backend>(
    model_json: &Path,
    alpha: f64,
    output: &Path,
    device: &B::Device,
) -> Result<PathBuf> {
    let weights = KerasWeights::load(model_json)?;
    let body = MobileNetConfig::new()
        .with_alpha(alpha)
        .init::<B>(device)
        .load_keras(&weights, device)?;

    save_weights(body, output)?;
    let file = output.with_extension("mpk");
    info!("Wrote extractor weights to {:?}", file);
    Ok(file)
}

/// Load weights into the full body
///
/// `*.json` is read as a TensorFlow.js layers model; anything else as the
/// burn record written by [`save_weights`].
fn load_weights<B: Backend>(
    body: MobileNetBody<B>,
    path: &Path,
    device: &B::Device,
) -> Result<MobileNetBody<B>> {
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
        info!("Loading TensorFlow.js extractor weights from {:?}", path);
        let weights = KerasWeights::load(path)?;
        return body.load_keras(&weights, device);
    }

    let file = path.with_extension("mpk");
    if !file.is_file() {
        return Err(PokedexError::ModelNotFound(file));
    }

    info!("Loading extractor weights from {:?}", file);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    body.load_file(&file, &recorder, device)
        .map_err(|e| PokedexError::CorruptModel {
            path: file,
            reason: format!("{:?}", e),
        })
}

impl<B: Backend> FeatureExtractor for MobileNetExtractor<B> {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn embedding_dim(&self) -> usize {
        self.output_shape.iter().product()
    }

    fn layer(&self) -> &str {
        &self.layer
    }

    fn embed(&self, batch: &NormalizedBatch) -> Result<Embedding> {
        let expected = [1, self.input_size, self.input_size, CHANNELS];
        if batch.shape() != expected {
            return Err(PokedexError::ShapeMismatch {
                stage: "feature extractor input",
                expected: expected.to_vec(),
                actual: batch.shape().to_vec(),
            });
        }

        // NHWC -> NCHW for the convolutions, then back so the flattened
        // embedding is laid out height x width x channels
        let input = Tensor::<B, 4>::from_data(
            TensorData::new(batch.as_slice().to_vec(), batch.shape()),
            &self.device,
        )
        .permute([0, 3, 1, 2]);
        let output = self.body.forward(input).permute([0, 2, 3, 1]);

        let [_, height, width, channels] = output.dims();
        if [height, width, channels] != self.output_shape {
            return Err(PokedexError::ShapeMismatch {
                stage: "feature extractor output",
                expected: self.output_shape.to_vec(),
                actual: vec![height, width, channels],
            });
        }

        output
            .flatten::<1>(0, 3)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PokedexError::Tensor(format!("{:?}", e)))
    }
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use crate::model::mobilenet::keras_test_weights;
    use crate::model::tfjs::write_model_json;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn small_config() -> ExtractorConfig {
        ExtractorConfig {
            input_size: 32,
            random_init: true,
            ..ExtractorConfig::default()
        }
    }

    fn batch(size: usize, value: f32) -> NormalizedBatch {
        NormalizedBatch::new(vec![value; size * size * 3], [1, size, size, 3]).unwrap()
    }

    #[test]
    fn test_embedding_dim_reference_model() {
        let device = Default::default();
        let config = ExtractorConfig {
            random_init: true,
            ..ExtractorConfig::default()
        };
        let extractor = MobileNetExtractor::<TestBackend>::new(&config, &device).unwrap();
        assert_eq!(extractor.output_shape(), [7, 7, 256]);
        assert_eq!(extractor.embedding_dim(), 12544);
        assert_eq!(extractor.layer(), "conv_pw_13_relu");
    }

    #[test]
    fn test_embed_length() {
        let device = Default::default();
        let extractor = MobileNetExtractor::<TestBackend>::new(&small_config(), &device).unwrap();

        let embedding = extractor.embed(&batch(32, 0.5)).unwrap();
        assert_eq!(embedding.len(), extractor.embedding_dim());
        assert_eq!(embedding.len(), 256);
    }

    #[test]
    fn test_embed_rejects_wrong_shape() {
        let device = Default::default();
        let extractor = MobileNetExtractor::<TestBackend>::new(&small_config(), &device).unwrap();

        let err = extractor.embed(&batch(31, 0.0)).unwrap_err();
        assert!(matches!(err, PokedexError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_unknown_layer() {
        let device = Default::default();
        let config = ExtractorConfig {
            layer: "predictions".to_string(),
            ..small_config()
        };
        let err = MobileNetExtractor::<TestBackend>::new(&config, &device).unwrap_err();
        assert!(matches!(err, PokedexError::UnknownLayer(_)));
    }

    #[test]
    fn test_pretrained_weights_are_reused() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let weights = dir.path().join("mobilenet_v1");

        let body = MobileNetConfig::new().init::<TestBackend>(&device);
        save_weights(body, &weights).unwrap();

        let config = ExtractorConfig {
            weights: Some(weights),
            random_init: false,
            ..small_config()
        };
        let first = MobileNetExtractor::<TestBackend>::new(&config, &device).unwrap();
        let second = MobileNetExtractor::<TestBackend>::new(&config, &device).unwrap();

        let input = batch(32, 0.25);
        assert_eq!(first.embed(&input).unwrap(), second.embed(&input).unwrap());
    }

    #[test]
    fn test_missing_weights_file() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let config = ExtractorConfig {
            weights: Some(dir.path().join("absent")),
            ..small_config()
        };
        let err = MobileNetExtractor::<TestBackend>::new(&config, &device).unwrap_err();
        assert!(matches!(err, PokedexError::ModelNotFound(_)));
    }

    #[test]
    fn test_weights_required_without_opt_in() {
        let device = Default::default();
        let config = ExtractorConfig {
            random_init: false,
            ..small_config()
        };
        let err = MobileNetExtractor::<TestBackend>::new(&config, &device).unwrap_err();
        assert!(matches!(err, PokedexError::Config(_)));
    }

    #[test]
    fn test_input_below_minimum_rejected() {
        let device = Default::default();
        let config = ExtractorConfig {
            input_size: 16,
            ..small_config()
        };
        let err = MobileNetExtractor::<TestBackend>::new(&config, &device).unwrap_err();
        assert!(matches!(err, PokedexError::Config(_)));
    }

    #[test]
    fn test_tfjs_weights_load_directly_and_through_import() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let model_json = write_model_json(dir.path(), &keras_test_weights(0.25, 0.02));

        let from_json = MobileNetExtractor::<TestBackend>::new(
            &ExtractorConfig {
                weights: Some(model_json.clone()),
                random_init: false,
                ..small_config()
            },
            &device,
        )
        .unwrap();

        let record = import_keras_weights::<TestBackend>(
            &model_json,
            0.25,
            &dir.path().join("mobilenet_v1"),
            &device,
        )
        .unwrap();
        assert!(record.is_file());

        let from_record = MobileNetExtractor::<TestBackend>::new(
            &ExtractorConfig {
                weights: Some(record),
                random_init: false,
                ..small_config()
            },
            &device,
        )
        .unwrap();

        let input = batch(32, 0.5);
        let embedding = from_json.embed(&input).unwrap();
        assert_eq!(embedding, from_record.embed(&input).unwrap());
        assert!(embedding.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn test_tfjs_weights_of_other_width_rejected() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let model_json = write_model_json(dir.path(), &keras_test_weights(0.5, 0.02));

        let err = MobileNetExtractor::<TestBackend>::new(
            &ExtractorConfig {
                weights: Some(model_json),
                random_init: false,
                ..small_config()
            },
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, PokedexError::CorruptModel { .. }));
    }
}
