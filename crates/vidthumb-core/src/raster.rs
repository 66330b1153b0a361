//! Frame rasterization and JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::PayloadError;
use crate::payload::{ImageData, JPEG_MIME};

/// Size a raster target for a frame of `width` x `height`.
///
/// The target is never wider than the native frame; when `max_width` is
/// smaller the height follows the native aspect ratio (at least one pixel).
#[must_use]
pub fn target_size(width: u32, height: u32, max_width: Option<u32>) -> (u32, u32) {
    let target_width = max_width.map_or(width, |max| max.min(width));
    if target_width == width || width == 0 {
        return (width, height);
    }

    let scaled = (f64::from(height) * f64::from(target_width) / f64::from(width)).round();
    (target_width, (scaled as u32).max(1))
}

/// Map a `0.0..=1.0` quality to the encoder's `1..=100` scale.
fn encoder_quality(quality: f32) -> u8 {
    let quality = if quality.is_nan() { 0.0 } else { quality.clamp(0.0, 1.0) };
    ((quality * 100.0).round() as u8).max(1)
}

/// Scale `frame` into `target` and compress it to a JPEG payload.
pub fn render(frame: &RgbImage, target: (u32, u32), quality: f32) -> Result<ImageData, PayloadError> {
    let (width, height) = target;
    if width == 0 || height == 0 || frame.width() == 0 || frame.height() == 0 {
        return Err(PayloadError::Encode("empty frame".to_string()));
    }

    let mut buffer = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, encoder_quality(quality));
        let encoded = if frame.dimensions() == target {
            encoder.encode_image(frame)
        } else {
            let resized = imageops::resize(frame, width, height, FilterType::Triangle);
            encoder.encode_image(&resized)
        };
        encoded.map_err(|e| PayloadError::Encode(e.to_string()))?;
    }

    Ok(ImageData::from_bytes(JPEG_MIME, &buffer))
}

/// Decode a payload just far enough to read its pixel dimensions.
pub fn image_dimensions(image: &ImageData) -> Result<(u32, u32), PayloadError> {
    let bytes = image.to_bytes()?;
    let decoded =
        image::load_from_memory(&bytes).map_err(|e| PayloadError::Decode(e.to_string()))?;
    Ok((decoded.width(), decoded.height()))
}
