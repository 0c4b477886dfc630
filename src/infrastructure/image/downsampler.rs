//! Decoding encoded images straight to display size.
//!
//! JPEG sources are decoded at 1/2, 1/4 or 1/8 scale in the DCT domain so the
//! full-resolution bitmap never exists. Other formats have no reduced-size
//! decode path and fall back to a full decode bounded by [`DecodeLimits`].

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, Limits, RgbImage};
use jpeg_decoder::PixelFormat;
use tracing::trace;

/// Largest source edge the decoder will accept.
pub const DEFAULT_MAX_SOURCE_DIMENSION: u32 = 16_384;

/// Decoder allocation ceiling (16 MB).
pub const DEFAULT_MAX_DECODE_ALLOC: u64 = 16 * 1024 * 1024;

/// Resource limits applied while decoding untrusted bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Maximum source width or height in pixels.
    pub max_source_dimension: u32,
    /// Maximum bytes the decoded bitmap may occupy. For JPEG this bounds the
    /// reduced-scale output; for other formats the full source.
    pub max_alloc: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_source_dimension: DEFAULT_MAX_SOURCE_DIMENSION,
            max_alloc: DEFAULT_MAX_DECODE_ALLOC,
        }
    }
}

impl DecodeLimits {
    fn to_image_limits(self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_source_dimension);
        limits.max_image_height = Some(self.max_source_dimension);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }
}

/// Converts a point size at a display scale into a pixel bound.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn target_pixel_size(points: f32, scale: f32) -> u32 {
    let pixels = (points * scale).ceil();
    if pixels.is_finite() && pixels > 0.0 {
        pixels.min(u32::MAX as f32) as u32
    } else {
        0
    }
}

/// Decoded memory footprint of a bitmap: bytes per row times rows.
#[must_use]
pub fn decoded_cost(image: &DynamicImage) -> usize {
    let bytes_per_pixel = usize::from(image.color().bytes_per_pixel());
    let row_bytes = (image.width() as usize).saturating_mul(bytes_per_pixel);
    row_bytes.saturating_mul(image.height() as usize)
}

/// Decodes `bytes` into a bitmap whose largest edge is at most
/// `target_pixel_size`, using [`DecodeLimits::default`].
///
/// Returns `None` for empty or corrupt input, a zero target, or sources that
/// exceed the decode limits.
#[must_use]
pub fn downsample(bytes: &[u8], target_pixel_size: u32) -> Option<DynamicImage> {
    downsample_with_limits(bytes, target_pixel_size, DecodeLimits::default())
}

/// Same as [`downsample`] with explicit decode limits.
#[must_use]
pub fn downsample_with_limits(
    bytes: &[u8],
    target_pixel_size: u32,
    limits: DecodeLimits,
) -> Option<DynamicImage> {
    if bytes.is_empty() || target_pixel_size == 0 {
        return None;
    }

    let source = if image::guess_format(bytes).ok() == Some(ImageFormat::Jpeg) {
        match decode_jpeg_scaled(bytes, target_pixel_size, limits) {
            JpegDecode::Decoded(image) => image,
            JpegDecode::Rejected => return None,
            JpegDecode::Unsupported => decode_full(bytes, limits)?,
        }
    } else {
        decode_full(bytes, limits)?
    };

    let (width, height) = (source.width(), source.height());
    if width == 0 || height == 0 {
        return None;
    }
    if width.max(height) <= target_pixel_size {
        return Some(source);
    }

    // `thumbnail` keeps the aspect ratio and fits within the box.
    let thumb = source.thumbnail(target_pixel_size, target_pixel_size);
    drop(source);

    trace!(
        from_w = width,
        from_h = height,
        to_w = thumb.width(),
        to_h = thumb.height(),
        "Downsampled image"
    );
    Some(thumb)
}

enum JpegDecode {
    Decoded(DynamicImage),
    Rejected,
    /// Pixel format with no reduced-scale path (CMYK, 16-bit).
    Unsupported,
}

/// Decodes a JPEG at the smallest DCT scale whose long edge still covers
/// `target_pixel_size`.
fn decode_jpeg_scaled(bytes: &[u8], target_pixel_size: u32, limits: DecodeLimits) -> JpegDecode {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    if let Err(e) = decoder.read_info() {
        trace!(error = %e, len = bytes.len(), "JPEG header rejected");
        return JpegDecode::Rejected;
    }
    let Some(info) = decoder.info() else {
        return JpegDecode::Rejected;
    };

    let (full_w, full_h) = (u32::from(info.width), u32::from(info.height));
    if full_w.max(full_h) > limits.max_source_dimension {
        trace!(width = full_w, height = full_h, "JPEG exceeds dimension limit");
        return JpegDecode::Rejected;
    }

    let channels: u64 = match info.pixel_format {
        PixelFormat::L8 => 1,
        PixelFormat::RGB24 => 3,
        _ => return JpegDecode::Unsupported,
    };

    // The decoder keeps both edges at or above the request, so ask for the
    // target scaled to the source aspect ratio.
    let long_edge = u64::from(full_w.max(full_h).max(1));
    let request = |edge: u32| {
        let edge = u64::from(edge);
        let scaled = (edge * u64::from(target_pixel_size)).div_ceil(long_edge);
        u16::try_from(scaled.clamp(1, edge.max(1))).unwrap_or(u16::MAX)
    };
    let (out_w, out_h) = match decoder.scale(request(full_w), request(full_h)) {
        Ok(size) => size,
        Err(e) => {
            trace!(error = %e, "JPEG scale rejected");
            return JpegDecode::Rejected;
        }
    };

    let output_bytes = u64::from(out_w) * u64::from(out_h) * channels;
    if output_bytes > limits.max_alloc {
        trace!(out_w, out_h, output_bytes, "Scaled JPEG exceeds allocation limit");
        return JpegDecode::Rejected;
    }

    let pixels = match decoder.decode() {
        Ok(pixels) => pixels,
        Err(e) => {
            trace!(error = %e, len = bytes.len(), "JPEG decode rejected");
            return JpegDecode::Rejected;
        }
    };

    let (w, h) = (u32::from(out_w), u32::from(out_h));
    let image = match info.pixel_format {
        PixelFormat::L8 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
        _ => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
    };

    trace!(full_w, full_h, out_w, out_h, "Decoded JPEG at reduced scale");
    image.map_or(JpegDecode::Rejected, JpegDecode::Decoded)
}

fn decode_full(bytes: &[u8], limits: DecodeLimits) -> Option<DynamicImage> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    reader.limits(limits.to_image_limits());

    match reader.decode() {
        Ok(image) => Some(image),
        Err(e) => {
            trace!(error = %e, len = bytes.len(), "Image decode rejected");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::png;
    use test_case::test_case;

    #[test_case(2000, 1500, 80 ; "landscape_photo_to_avatar")]
    #[test_case(600, 2400, 160 ; "tall_portrait")]
    #[test_case(301, 300, 300 ; "one_pixel_over")]
    fn test_output_fits_target(width: u32, height: u32, target: u32) {
        let bytes = png(width, height);
        let image = downsample(&bytes, target).expect("should decode");

        assert!(image.width().max(image.height()) <= target);
        assert!(image.width() > 0 && image.height() > 0);
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut out, ImageFormat::Jpeg)
            .expect("encoding an in-memory JPEG cannot fail");
        out.into_inner()
    }

    #[test]
    fn test_large_jpeg_decodes_without_full_buffer() {
        let bytes = jpeg(4000, 3000);
        let limits = DecodeLimits {
            max_alloc: 4 * 1024 * 1024,
            ..DecodeLimits::default()
        };

        let image = downsample_with_limits(&bytes, 80, limits).expect("should decode");
        assert_eq!((image.width(), image.height()), (80, 60));

        // The same cap leaves no room for a full-resolution decode.
        assert!(decode_full(&bytes, limits).is_none());
    }

    #[test]
    fn test_jpeg_scale_keeps_enough_pixels() {
        let image = downsample(&jpeg(1600, 400), 300).expect("should decode");
        assert_eq!((image.width(), image.height()), (300, 75));
    }

    #[test]
    fn test_small_jpeg_is_not_upscaled() {
        let image = downsample(&jpeg(40, 30), 80).expect("should decode");
        assert_eq!((image.width(), image.height()), (40, 30));
    }

    #[test]
    fn test_keeps_aspect_ratio() {
        let image = downsample(&png(1000, 500), 100).expect("should decode");
        assert_eq!(image.width(), 100);
        assert_eq!(image.height(), 50);
    }

    #[test]
    fn test_small_source_is_not_upscaled() {
        let image = downsample(&png(32, 24), 80).expect("should decode");
        assert_eq!((image.width(), image.height()), (32, 24));
    }

    #[test]
    fn test_empty_and_corrupt_bytes() {
        assert!(downsample(&[], 80).is_none());
        assert!(downsample(b"definitely not an image", 80).is_none());

        let mut truncated = png(64, 64).to_vec();
        truncated.truncate(truncated.len() / 2);
        assert!(downsample(&truncated, 80).is_none());
    }

    #[test]
    fn test_zero_target() {
        assert!(downsample(&png(10, 10), 0).is_none());
    }

    #[test]
    fn test_source_over_limits_is_rejected() {
        let limits = DecodeLimits {
            max_source_dimension: 100,
            ..DecodeLimits::default()
        };
        assert!(downsample_with_limits(&png(200, 50), 40, limits).is_none());
        assert!(downsample_with_limits(&png(100, 50), 40, limits).is_some());
    }

    #[test_case(40.0, 2.0, 80 ; "retina_avatar")]
    #[test_case(40.0, 3.0, 120 ; "three_x")]
    #[test_case(33.3, 1.0, 34 ; "rounds_up")]
    #[test_case(0.0, 2.0, 0 ; "zero")]
    #[test_case(-5.0, 2.0, 0 ; "negative")]
    fn test_target_pixel_size(points: f32, scale: f32, expected: u32) {
        assert_eq!(target_pixel_size(points, scale), expected);
    }

    #[test]
    fn test_decoded_cost() {
        let rgb = DynamicImage::new_rgb8(10, 20);
        let rgba = DynamicImage::new_rgba8(10, 20);
        assert_eq!(decoded_cost(&rgb), 10 * 3 * 20);
        assert_eq!(decoded_cost(&rgba), 10 * 4 * 20);
    }
}
