//! Image loading and preprocessing
//!
//! Decoding lives in `loader`, the crop/resize/normalise chain in `transform`.
//! Training and prediction both go through [`preprocess`], so the two paths
//! cannot drift apart.

pub mod loader;
pub mod transform;

pub use loader::{load_image, DecodedImage};
pub use transform::{center_crop, normalize_batch, preprocess, resize, NormalizedBatch, ResizedImage};
