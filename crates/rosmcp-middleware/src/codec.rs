//! Image payload pipeline.
//!
//! Decodes `sensor_msgs/Image` bodies into [`DynamicImage`] values and
//! re-encodes them as size-bounded base64 JPEG artifacts.
//!
//! # Compression search
//!
//! [`compress_to_budget`] walks a fixed grid, width-major and
//! quality-minor:
//!
//! | Axis | Candidates |
//! |---|---|
//! | width | original, then 1280, 960, 640, 480, 320 (only those below the original) |
//! | quality | requested, then 70, 50, 30 (only those below the requested) |
//!
//! The **first** candidate whose base64 text is within the budget wins, even
//! if a later one would be smaller.  When nothing fits the result is `None`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use rosmcp_types::{BridgeError, CompressedArtifact, ImageEncoding, ImageMessage, Resolution};
use tracing::debug;

/// Downscale targets tried after the original width.
pub const WIDTH_LADDER: [u32; 5] = [1280, 960, 640, 480, 320];

/// JPEG qualities tried after the requested one.
pub const QUALITY_LADDER: [u8; 3] = [70, 50, 30];

pub const JPEG_MIME: &str = "image/jpeg";

/// Decode an image message body into pixels in RGB (or luma) order.
///
/// # Errors
///
/// * [`BridgeError::UnsupportedEncoding`] for any tag outside
///   `rgb8`/`bgr8`/`mono8`.
/// * [`BridgeError::ImageDecode`] for bad base64 or a buffer whose length
///   is not `height × width × channels`.
pub fn decode_image(msg: &ImageMessage) -> Result<DynamicImage, BridgeError> {
    let encoding: ImageEncoding = msg.encoding.parse()?;
    let bytes = BASE64
        .decode(msg.data.as_bytes())
        .map_err(|e| BridgeError::ImageDecode(format!("invalid base64 payload: {e}")))?;

    let expected = (msg.height as usize)
        .checked_mul(msg.width as usize)
        .and_then(|pixels| pixels.checked_mul(encoding.channels()))
        .ok_or_else(|| {
            BridgeError::ImageDecode(format!("{}x{} frame is too large", msg.width, msg.height))
        })?;
    if bytes.len() != expected {
        return Err(BridgeError::ImageDecode(format!(
            "{} bytes for a {}x{} {} frame, expected {}",
            bytes.len(),
            msg.width,
            msg.height,
            encoding,
            expected
        )));
    }

    let shape_err = || BridgeError::ImageDecode(format!("{}x{} frame rejected", msg.width, msg.height));
    let image = match encoding {
        ImageEncoding::Rgb8 => {
            DynamicImage::ImageRgb8(RgbImage::from_raw(msg.width, msg.height, bytes).ok_or_else(shape_err)?)
        }
        ImageEncoding::Bgr8 => {
            let mut rgb = RgbImage::from_raw(msg.width, msg.height, bytes).ok_or_else(shape_err)?;
            for px in rgb.pixels_mut() {
                px.0.swap(0, 2);
            }
            DynamicImage::ImageRgb8(rgb)
        }
        ImageEncoding::Mono8 => {
            DynamicImage::ImageLuma8(GrayImage::from_raw(msg.width, msg.height, bytes).ok_or_else(shape_err)?)
        }
    };
    Ok(image)
}

/// Encode `image` as JPEG at `quality` and return the base64 text.
pub fn encode_jpeg_base64(image: &DynamicImage, quality: u8) -> Result<String, BridgeError> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    let encoded = match image {
        DynamicImage::ImageLuma8(gray) => encoder.encode_image(gray),
        other => encoder.encode_image(&other.to_rgb8()),
    };
    encoded.map_err(|e| BridgeError::ImageEncode(e.to_string()))?;
    Ok(BASE64.encode(bytes))
}

/// Size of base64 text in kilobytes.
pub fn size_kb(text: &str) -> f64 {
    text.len() as f64 / 1024.0
}

/// Widths to try for an image `original` pixels wide.
pub fn width_candidates(original: u32) -> Vec<u32> {
    std::iter::once(original)
        .chain(WIDTH_LADDER.into_iter().filter(|w| *w < original))
        .collect()
}

/// Qualities to try when the caller asked for `requested` (clamped to 1-100).
pub fn quality_candidates(requested: u8) -> Vec<u8> {
    let requested = requested.clamp(1, 100);
    std::iter::once(requested)
        .chain(QUALITY_LADDER.into_iter().filter(|q| *q < requested))
        .collect()
}

/// Resize `image` to `target_width`, preserving aspect ratio.  Never upscales.
fn scale_to_width(image: &DynamicImage, target_width: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if target_width >= width {
        return image.clone();
    }
    let scale = f64::from(target_width) / f64::from(width);
    let new_height = ((f64::from(height) * scale) as u32).max(1);
    image.resize_exact(target_width, new_height, FilterType::Triangle)
}

/// Find the first (width, quality) candidate whose base64 JPEG fits in
/// `max_size_kb`.
///
/// # Errors
///
/// Only encoder failures are errors; an unsatisfiable budget is `Ok(None)`.
pub fn compress_to_budget(
    image: &DynamicImage,
    max_size_kb: f64,
    quality: u8,
) -> Result<Option<CompressedArtifact>, BridgeError> {
    let original = Resolution::new(image.width(), image.height());
    let qualities = quality_candidates(quality);

    for target_width in width_candidates(original.width) {
        let scaled = scale_to_width(image, target_width);
        let compressed = Resolution::new(scaled.width(), scaled.height());

        for &q in &qualities {
            let encoded = encode_jpeg_base64(&scaled, q)?;
            let kb = size_kb(&encoded);
            debug!(size = %compressed, quality = q, size_kb = kb, budget_kb = max_size_kb, "compression candidate");
            if kb <= max_size_kb {
                return Ok(Some(CompressedArtifact {
                    image_base64: encoded,
                    mime_type: JPEG_MIME.to_string(),
                    original_size: original,
                    compressed_size: compressed,
                    quality: q,
                    size_kb: (kb * 100.0).round() / 100.0,
                }));
            }
        }
    }
    Ok(None)
}
