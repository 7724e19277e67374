//! Stitcher: composite captured segments into one page image.
//!
//! Segments arrive at device-pixel resolution. Each is scaled by
//! `1 / device_pixel_ratio` and pasted at its page offset on a canvas of
//! `total_width x total_height` CSS pixels. Segments are drawn in order and
//! later ones overwrite the overlap band of earlier ones; there is no
//! blending and no seam detection.

use crate::{Error, PageMetrics, Result, Segment};
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use log::debug;
use std::io::Cursor;

/// Stitch `segments` into a `total_width x total_height` image.
pub fn stitch(segments: &[Segment], metrics: &PageMetrics) -> Result<RgbaImage> {
    let dpr = metrics.device_pixel_ratio;
    if !(dpr.is_finite() && dpr > 0.0) {
        return Err(Error::Render(format!("Invalid device pixel ratio {}", dpr)));
    }

    let mut canvas = RgbaImage::new(metrics.total_width, metrics.total_height);
    for segment in segments {
        let decoded = image::load_from_memory(&segment.image)
            .map_err(|e| Error::Render(format!("Failed to decode segment at {}: {}", segment.y_offset, e)))?
            .to_rgba8();
        let scaled = scale_to_css(decoded, dpr);
        debug!(
            "stitching {}x{} segment at y={}",
            scaled.width(),
            scaled.height(),
            segment.y_offset
        );
        imageops::replace(&mut canvas, &scaled, 0, i64::from(segment.y_offset));
    }
    Ok(canvas)
}

/// Scale a device-pixel bitmap down to CSS pixels
fn scale_to_css(image: RgbaImage, dpr: f64) -> RgbaImage {
    let width = css_length(image.width(), dpr);
    let height = css_length(image.height(), dpr);
    if (width, height) == image.dimensions() {
        return image;
    }
    imageops::resize(&image, width, height, FilterType::Triangle)
}

fn css_length(device: u32, dpr: f64) -> u32 {
    ((f64::from(device) / dpr).round() as u32).max(1)
}

/// Encode an image as PNG bytes
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| Error::Render(format!("Failed to encode PNG: {}", e)))?;
    Ok(out.into_inner())
}
