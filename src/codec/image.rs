//! Image encoding: rendered pages to PNG/JPEG bytes and VLM payloads.
//!
//! Pages sent to a vision model are PNG (lossless; JPEG artefacts on
//! rendered text degrade transcription) with `detail: "high"` so fine print
//! survives the provider's tiling. Pages returned to the caller use the
//! format they asked for.

use crate::error::RoutineError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG ready for the VLM API.
pub fn encode_for_vision(img: &DynamicImage) -> Result<ImageData, RoutineError> {
    let buf = encode_png(img)?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, RoutineError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| RoutineError::processing(format!("PNG encoding failed: {e}")))?;
    Ok(buf)
}

/// Encode as baseline JPEG. Greyscale stays single-channel, anything else
/// becomes RGB with alpha dropped; `quality` is clamped to 1–100.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, RoutineError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    let result = match img {
        DynamicImage::ImageLuma8(_) => img.write_with_encoder(encoder),
        _ => DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder),
    };
    result.map_err(|e| RoutineError::processing(format!("JPEG encoding failed: {e}")))?;
    Ok(buf)
}

/// Shrink `img` so its longest edge is at most `max_edge`, keeping the
/// aspect ratio. Smaller images are returned unchanged.
pub fn fit_within(img: DynamicImage, max_edge: u32) -> DynamicImage {
    if img.width().max(img.height()) <= max_edge {
        return img;
    }
    img.resize(max_edge, max_edge, FilterType::Triangle)
}

/// Solid white image used as a placeholder page.
pub fn blank_page(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn vision_payload_is_base64_png() {
        let data = encode_for_vision(&red()).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(decoded.starts_with(b"\x89PNG"));
    }

    #[test]
    fn jpeg_drops_alpha() {
        let bytes = encode_jpeg(&red(), 80).unwrap();
        assert_eq!(&bytes[..3], &[0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn fit_within_keeps_aspect_ratio() {
        let img = blank_page(3200, 1600);
        let small = fit_within(img, 1600);
        assert_eq!((small.width(), small.height()), (1600, 800));
        let untouched = fit_within(blank_page(100, 50), 1600);
        assert_eq!(untouched.width(), 100);
    }
}
