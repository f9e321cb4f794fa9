//! Decoding base64 images from the service into RGBA pixels for the
//! document, and encoding document pixels back into base64 PNG.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::error::CoreError;
use crate::types::Size;

/// Decoded RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixels {
    pub size: Size,
    /// Tightly packed, row-major RGBA8.
    pub rgba: Vec<u8>,
}

/// Decode a base64 image (PNG, JPEG or WebP), tolerating a `data:` URI
/// prefix and surrounding whitespace.
pub fn decode_base64(encoded: &str) -> Result<DynamicImage, CoreError> {
    let data = strip_data_uri(encoded.trim());
    let bytes = BASE64
        .decode(data)
        .map_err(|e| CoreError::Image(format!("Invalid base64 image: {e}")))?;
    image::load_from_memory(&bytes).map_err(|e| CoreError::Image(format!("Cannot decode image: {e}")))
}

/// Decode and scale to exactly `size` (when given), returning RGBA8.
///
/// Grayscale inputs (common for preprocessor previews) are expanded to
/// full colour.
pub fn decode_to_rgba(encoded: &str, size: Option<Size>) -> Result<Pixels, CoreError> {
    let decoded = decode_base64(encoded)?;
    let scaled = match size {
        Some(target) if target.width > 0 && target.height > 0 => {
            if decoded.width() == target.width && decoded.height() == target.height {
                decoded
            } else {
                decoded.resize_exact(target.width, target.height, FilterType::Lanczos3)
            }
        }
        _ => decoded,
    };
    let rgba = scaled.into_rgba8();
    Ok(Pixels {
        size: Size::new(rgba.width(), rgba.height()),
        rgba: rgba.into_raw(),
    })
}

/// Encode RGBA8 pixels as a base64 PNG.
pub fn encode_png_base64(pixels: &Pixels) -> Result<String, CoreError> {
    Ok(BASE64.encode(encode_png(pixels)?))
}

/// Encode RGBA8 pixels as PNG bytes.
pub fn encode_png(pixels: &Pixels) -> Result<Vec<u8>, CoreError> {
    let image = RgbaImage::from_raw(pixels.size.width, pixels.size.height, pixels.rgba.clone())
        .ok_or_else(|| {
            CoreError::Image(format!(
                "{} bytes do not fill a {}x{} RGBA image",
                pixels.rgba.len(),
                pixels.size.width,
                pixels.size.height
            ))
        })?;
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| CoreError::Image(format!("Cannot encode PNG: {e}")))?;
    Ok(out.into_inner())
}

fn strip_data_uri(data: &str) -> &str {
    match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    }
}
