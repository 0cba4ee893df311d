//! Image Preprocessing Transforms
//!
//! Turns one decoded image into the batch the feature extractor consumes:
//!
//! 1. center crop to the largest square (`s = min(w, h)`, floor offsets)
//! 2. bilinear resize to the extractor resolution, sampled the way
//!    TensorFlow's `resize_bilinear` does it (no corner alignment, no
//!    half-pixel offset) and kept as float
//! 3. `x / 127 - 1` normalisation into an NHWC batch of one
//!
//! Each intermediate buffer is dropped as soon as the next one exists.

use image::{imageops, Rgb, Rgb32FImage};

use super::loader::DecodedImage;
use crate::utils::error::{PokedexError, Result};

/// Number of colour channels fed to the extractor
pub const CHANNELS: usize = 3;

/// Divisor of the `x / 127 - 1` normalisation
pub const PIXEL_SCALE: f32 = 127.0;

/// A float image batch in `[batch, height, width, channels]` layout
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    data: Vec<f32>,
    shape: [usize; 4],
}

impl NormalizedBatch {
    /// Wrap row-major NHWC data, checking it fills `shape`
    pub fn new(data: Vec<f32>, shape: [usize; 4]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(PokedexError::ShapeMismatch {
                stage: "normalized batch",
                expected: vec![expected],
                actual: vec![data.len()],
            });
        }
        Ok(Self { data, shape })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn height(&self) -> usize {
        self.shape[1]
    }

    pub fn width(&self) -> usize {
        self.shape[2]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Crop the centered `s x s` square, `s = min(width, height)`
///
/// The start offset on the longer axis is `(dim - s) / 2`, rounded down, so
/// an odd surplus leaves the extra column or row on the right or bottom.
pub fn center_crop(image: DecodedImage) -> DecodedImage {
    let (width, height) = image.dimensions();
    if width == height {
        return image;
    }

    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;

    imageops::crop_imm(&image, x, y, side, side).to_image()
}

/// Float RGB image produced by [`resize`], values still on the 0..=255 scale
pub type ResizedImage = Rgb32FImage;

/// Source taps for one output coordinate: lower index, upper index, upper weight
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tap {
    lo: u32,
    hi: u32,
    frac: f32,
}

/// Output coordinate `i` samples source position `i * input / output`
fn taps(input: u32, output: u32) -> Vec<Tap> {
    let scale = input as f64 / output as f64;
    let last = input.saturating_sub(1);
    (0..output)
        .map(|i| {
            let src = i as f64 * scale;
            let lo = (src.floor() as u32).min(last);
            Tap {
                lo,
                hi: (lo + 1).min(last),
                frac: (src - lo as f64) as f32,
            }
        })
        .collect()
}

/// Bilinear resize to `size x size`
///
/// Matches TensorFlow's default `resize_bilinear`: no corner alignment and
/// no half-pixel centres, so shrinking by an integer factor picks source
/// pixels rather than averaging them. The result is not rounded.
pub fn resize(image: &DecodedImage, size: u32) -> Result<ResizedImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PokedexError::ShapeMismatch {
            stage: "resize",
            expected: vec![size as usize, size as usize, CHANNELS],
            actual: vec![height as usize, width as usize, CHANNELS],
        });
    }

    let columns = taps(width, size);
    let rows = taps(height, size);

    Ok(ResizedImage::from_fn(size, size, |x, y| {
        let Tap { lo: x0, hi: x1, frac: dx } = columns[x as usize];
        let Tap { lo: y0, hi: y1, frac: dy } = rows[y as usize];
        let (tl, tr) = (image.get_pixel(x0, y0).0, image.get_pixel(x1, y0).0);
        let (bl, br) = (image.get_pixel(x0, y1).0, image.get_pixel(x1, y1).0);

        let mut pixel = [0.0f32; CHANNELS];
        for c in 0..CHANNELS {
            let top = tl[c] as f32 + (tr[c] as f32 - tl[c] as f32) * dx;
            let bottom = bl[c] as f32 + (br[c] as f32 - bl[c] as f32) * dx;
            pixel[c] = top + (bottom - top) * dy;
        }
        Rgb(pixel)
    }))
}

/// Map 0..=255 pixels onto `[-1, 1]` and add a batch dimension of one
pub fn normalize_batch(image: &ResizedImage) -> NormalizedBatch {
    let (width, height) = image.dimensions();
    let data: Vec<f32> = image
        .as_raw()
        .iter()
        .map(|&v| v / PIXEL_SCALE - 1.0)
        .collect();

    NormalizedBatch {
        data,
        shape: [1, height as usize, width as usize, CHANNELS],
    }
}

/// Run crop, resize and normalisation for an extractor expecting `size x size`
pub fn preprocess(image: DecodedImage, size: usize) -> Result<NormalizedBatch> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PokedexError::ShapeMismatch {
            stage: "center crop",
            expected: vec![size, size, CHANNELS],
            actual: vec![height as usize, width as usize, CHANNELS],
        });
    }

    let square = center_crop(image);
    let resized = resize(&square, size as u32)?;
    drop(square);
    let batch = normalize_batch(&resized);

    if batch.shape() != [1, size, size, CHANNELS] {
        return Err(PokedexError::ShapeMismatch {
            stage: "resize",
            expected: vec![1, size, size, CHANNELS],
            actual: batch.shape().to_vec(),
        });
    }

    Ok(batch)
}
