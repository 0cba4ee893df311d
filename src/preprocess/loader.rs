//! Image loading

use std::path::Path;

use image::{ImageReader, RgbImage};

use crate::utils::error::{PokedexError, Result};

/// Decoded height x width x RGB pixel buffer with 8-bit channels
pub type DecodedImage = RgbImage;

/// Read and decode the image at `path`
///
/// The format is sniffed from the file contents, so a mislabelled extension
/// still decodes. Missing files, unreadable files and undecodable content all
/// map to `UnreadableImage`.
pub fn load_image(path: &Path) -> Result<DecodedImage> {
    let reader = ImageReader::open(path)
        .map_err(|e| PokedexError::unreadable(path, e))?
        .with_guessed_format()
        .map_err(|e| PokedexError::unreadable(path, e))?;

    let image = reader
        .decode()
        .map_err(|e| PokedexError::unreadable(path, e))?;

    Ok(image.to_rgb8())
}
