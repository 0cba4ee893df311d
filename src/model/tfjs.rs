//! TensorFlow.js Layers Weights
//!
//! Reads the published MobileNet weights in TensorFlow.js layers format: a
//! `model.json` whose `weightsManifest` lists binary shard files and, in
//! order, the name, shape and dtype of every tensor packed into them.
//!
//! Shards of one manifest group are concatenated and decoded as little-endian
//! values. Tensors stored with `uint8`/`uint16` affine quantization are
//! dequantized to `value * scale + min`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::{backend::Backend, Tensor, TensorData};
use serde::Deserialize;
use tracing::{debug, info};

use crate::utils::error::{PokedexError, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelJson {
    weights_manifest: Vec<ManifestGroup>,
}

#[derive(Debug, Deserialize)]
struct ManifestGroup {
    paths: Vec<String>,
    weights: Vec<WeightSpec>,
}

#[derive(Debug, Deserialize)]
struct WeightSpec {
    name: String,
    shape: Vec<usize>,
    dtype: String,
    #[serde(default)]
    quantization: Option<Quantization>,
}

#[derive(Debug, Deserialize)]
struct Quantization {
    dtype: String,
    #[serde(default)]
    scale: Option<f32>,
    #[serde(default)]
    min: Option<f32>,
}

/// How a tensor's values are laid out in the shard bytes
#[derive(Debug, Clone, Copy)]
enum Encoding {
    Float32,
    Uint8 { scale: f32, min: f32 },
    Uint16 { scale: f32, min: f32 },
}

impl Encoding {
    fn bytes_per_value(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Uint8 { .. } => 1,
            Self::Uint16 { .. } => 2,
        }
    }

    fn decode(self, bytes: &[u8]) -> Vec<f32> {
        match self {
            Self::Float32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            Self::Uint8 { scale, min } => bytes.iter().map(|&q| q as f32 * scale + min).collect(),
            Self::Uint16 { scale, min } => bytes
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]) as f32 * scale + min)
                .collect(),
        }
    }
}

/// A decoded tensor: shape plus row-major values
#[derive(Debug, Clone, PartialEq)]
pub struct NamedWeight {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// All tensors of a Keras model, keyed by weight name (`conv1/kernel`, ...)
#[derive(Debug, Clone, Default)]
pub struct KerasWeights {
    source: PathBuf,
    tensors: HashMap<String, NamedWeight>,
}

impl KerasWeights {
    /// Build from already decoded tensors
    pub fn from_tensors(
        source: impl Into<PathBuf>,
        tensors: impl IntoIterator<Item = (String, NamedWeight)>,
    ) -> Self {
        Self {
            source: source.into(),
            tensors: tensors.into_iter().collect(),
        }
    }

    /// Read `model.json` and every shard it references
    pub fn load(model_json: &Path) -> Result<Self> {
        if !model_json.is_file() {
            return Err(PokedexError::ModelNotFound(model_json.to_path_buf()));
        }

        let corrupt = |reason: String| PokedexError::CorruptModel {
            path: model_json.to_path_buf(),
            reason,
        };

        let manifest: ModelJson = serde_json::from_str(&fs::read_to_string(model_json)?)
            .map_err(|e| corrupt(format!("invalid model.json: {}", e)))?;
        let dir = model_json.parent().unwrap_or_else(|| Path::new("."));

        let mut tensors = HashMap::new();
        for group in manifest.weights_manifest {
            let mut buffer = Vec::new();
            for shard in &group.paths {
                let path = dir.join(shard);
                let bytes = fs::read(&path).map_err(|e| PokedexError::CorruptModel {
                    path: path.clone(),
                    reason: format!("cannot read weight shard: {}", e),
                })?;
                buffer.extend_from_slice(&bytes);
            }
            debug!("Weight group of {} shard(s), {} bytes", group.paths.len(), buffer.len());

            let mut offset = 0;
            for entry in group.weights {
                let encoding = entry.encoding().map_err(&corrupt)?;
                let count: usize = entry.shape.iter().product();
                let end = offset + count * encoding.bytes_per_value();
                let bytes = buffer.get(offset..end).ok_or_else(|| {
                    corrupt(format!(
                        "shards end before '{}' ({} bytes needed, {} available)",
                        entry.name,
                        end,
                        buffer.len()
                    ))
                })?;
                tensors.insert(
                    entry.name,
                    NamedWeight {
                        shape: entry.shape,
                        values: encoding.decode(bytes),
                    },
                );
                offset = end;
            }
        }

        info!("Read {} tensors from {:?}", tensors.len(), model_json);
        Ok(Self::from_tensors(model_json, tensors))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Look up a tensor and check its shape
    pub fn get(&self, name: &str, shape: &[usize]) -> Result<&NamedWeight> {
        let weight = self.tensors.get(name).ok_or_else(|| PokedexError::CorruptModel {
            path: self.source.clone(),
            reason: format!("missing weight '{}'", name),
        })?;

        if weight.shape != shape {
            return Err(PokedexError::CorruptModel {
                path: self.source.clone(),
                reason: format!(
                    "weight '{}' has shape {:?}, expected {:?}",
                    name, weight.shape, shape
                ),
            });
        }

        Ok(weight)
    }

    /// Look up a tensor and upload it to `device`
    pub fn tensor<B: Backend, const D: usize>(
        &self,
        name: &str,
        shape: [usize; D],
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        let weight = self.get(name, &shape)?;
        Ok(Tensor::from_data(
            TensorData::new(weight.values.clone(), shape),
            device,
        ))
    }
}

impl WeightSpec {
    fn encoding(&self) -> std::result::Result<Encoding, String> {
        match &self.quantization {
            None if self.dtype == "float32" => Ok(Encoding::Float32),
            None => Err(format!("weight '{}' has unsupported dtype {}", self.name, self.dtype)),
            Some(q) => {
                let affine = |q: &Quantization| match (q.scale, q.min) {
                    (Some(scale), Some(min)) => Ok((scale, min)),
                    _ => Err(format!("weight '{}' lacks quantization scale/min", self.name)),
                };
                match q.dtype.as_str() {
                    "uint8" => affine(q).map(|(scale, min)| Encoding::Uint8 { scale, min }),
                    "uint16" => affine(q).map(|(scale, min)| Encoding::Uint16 { scale, min }),
                    other => Err(format!(
                        "weight '{}' uses unsupported quantization {}",
                        self.name, other
                    )),
                }
            }
        }
    }
}

/// Write a float32 `model.json` plus a single shard, for tests
#[cfg(test)]
pub(crate) fn write_model_json(dir: &Path, weights: &[(String, Vec<usize>, Vec<f32>)]) -> PathBuf {
    let mut shard = Vec::new();
    let mut specs = Vec::new();
    for (name, shape, values) in weights {
        for v in values {
            shard.extend_from_slice(&v.to_le_bytes());
        }
        specs.push(serde_json::json!({ "name": name, "shape": shape, "dtype": "float32" }));
    }

    fs::write(dir.join("group1-shard1of1"), shard).unwrap();
    let model = serde_json::json!({
        "format": "layers-model",
        "weightsManifest": [{ "paths": ["group1-shard1of1"], "weights": specs }],
    });
    let path = dir.join("model.json");
    fs::write(&path, model.to_string()).unwrap();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_float32_manifest() {
        let dir = TempDir::new().unwrap();
        let path = write_model_json(
            dir.path(),
            &[
                ("conv1/kernel".to_string(), vec![1, 1, 2, 2], vec![0.5, -1.0, 2.0, 4.0]),
                ("conv1_bn/gamma".to_string(), vec![2], vec![1.0, 3.0]),
            ],
        );

        let weights = KerasWeights::load(&path).unwrap();
        assert_eq!(weights.len(), 2);
        assert_eq!(
            weights.get("conv1/kernel", &[1, 1, 2, 2]).unwrap().values,
            vec![0.5, -1.0, 2.0, 4.0]
        );
        assert_eq!(weights.get("conv1_bn/gamma", &[2]).unwrap().values, vec![1.0, 3.0]);
    }

    #[test]
    fn test_shards_are_concatenated_in_order() {
        let dir = TempDir::new().unwrap();
        let values: Vec<u8> = [1.0f32, 2.0, 3.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(dir.path().join("a"), &values[..6]).unwrap();
        fs::write(dir.path().join("b"), &values[6..]).unwrap();
        let model = serde_json::json!({
            "weightsManifest": [{
                "paths": ["a", "b"],
                "weights": [{ "name": "w", "shape": [3], "dtype": "float32" }],
            }],
        });
        let path = dir.path().join("model.json");
        fs::write(&path, model.to_string()).unwrap();

        let weights = KerasWeights::load(&path).unwrap();
        assert_eq!(weights.get("w", &[3]).unwrap().values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_uint8_quantized_weights() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("shard"), [0u8, 2, 255]).unwrap();
        let model = serde_json::json!({
            "weightsManifest": [{
                "paths": ["shard"],
                "weights": [{
                    "name": "w",
                    "shape": [3],
                    "dtype": "float32",
                    "quantization": { "dtype": "uint8", "scale": 0.5, "min": -1.0 },
                }],
            }],
        });
        let path = dir.path().join("model.json");
        fs::write(&path, model.to_string()).unwrap();

        let weights = KerasWeights::load(&path).unwrap();
        assert_eq!(weights.get("w", &[3]).unwrap().values, vec![-1.0, 0.0, 126.5]);
    }

    #[test]
    fn test_truncated_shard_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = write_model_json(dir.path(), &[("w".to_string(), vec![2], vec![1.0, 2.0])]);
        fs::write(dir.path().join("group1-shard1of1"), [0u8; 5]).unwrap();

        let err = KerasWeights::load(&path).unwrap_err();
        assert!(matches!(err, PokedexError::CorruptModel { .. }));
    }

    #[test]
    fn test_missing_model_json() {
        let dir = TempDir::new().unwrap();
        let err = KerasWeights::load(&dir.path().join("model.json")).unwrap_err();
        assert!(matches!(err, PokedexError::ModelNotFound(_)));
    }

    #[test]
    fn test_get_checks_name_and_shape() {
        let weights = KerasWeights::from_tensors(
            "memory",
            [(
                "w".to_string(),
                NamedWeight {
                    shape: vec![2, 2],
                    values: vec![0.0; 4],
                },
            )],
        );

        assert!(weights.get("w", &[2, 2]).is_ok());
        assert!(matches!(weights.get("w", &[4]), Err(PokedexError::CorruptModel { .. })));
        assert!(matches!(weights.get("v", &[2, 2]), Err(PokedexError::CorruptModel { .. })));
    }
}
