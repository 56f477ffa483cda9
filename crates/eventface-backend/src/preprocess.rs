//! Reference image normalization before upload.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use thiserror::Error;

// --- Named constants ---
pub const DEFAULT_MAX_DIMENSION: u32 = 1920;
const JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("unsupported or corrupt image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode JPEG: {0}")]
    Encode(#[source] image::ImageError),
}

/// Decode any supported image, convert to RGB, shrink so the longest side is
/// at most `max_dimension`, and re-encode as JPEG.
pub fn preprocess_image(content: &[u8], max_dimension: u32) -> Result<Vec<u8>, PreprocessError> {
    let decoded = image::load_from_memory(content).map_err(PreprocessError::Decode)?;
    let mut rgb = decoded.to_rgb8();

    let (width, height) = rgb.dimensions();
    if let Some((new_w, new_h)) = fit_within(width, height, max_dimension) {
        tracing::debug!(width, height, new_w, new_h, "downscaling reference image");
        rgb = image::imageops::resize(&rgb, new_w, new_h, FilterType::CatmullRom);
    }

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(PreprocessError::Encode)?;
    Ok(out)
}

/// Target size preserving aspect ratio, or `None` if the image already fits.
fn fit_within(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if longest <= max_dimension || max_dimension == 0 {
        return None;
    }
    // Integer scaling keeps the long side exact.
    let scale = |side: u32| ((side as u64 * max_dimension as u64) / longest as u64).max(1) as u32;
    Some((scale(width), scale(height)))
}
