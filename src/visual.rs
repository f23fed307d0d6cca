//! Pixel-level screenshot comparison
//!
//! Both images are laid on a canvas as large as the bigger of the two, so a
//! few pixels of size drift show up as differences instead of failing the
//! comparison outright. Pixels outside an image count as transparent black.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

use crate::config::VisualConfig;
use crate::errors::ReplayError;
use crate::types::BoundingBox;

const DATA_URL_PREFIX: &str = "data:image/png;base64,";
const DIFF_COLOR: Rgba<u8> = Rgba([255, 0, 0, 128]);
/// Roughly 30% opacity for unchanged pixels in the diff image
const UNCHANGED_ALPHA: u8 = 77;

/// Outcome of comparing a baseline with a fresh capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualDiff {
    /// Baseline as a PNG data URL
    pub baseline: String,
    /// Current capture as a PNG data URL
    pub current: String,
    /// Diff visualization as a PNG data URL
    pub diff: String,
    pub difference_percentage: f64,
    pub diff_pixels: u64,
    pub total_pixels: u64,
}

impl VisualDiff {
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.difference_percentage > threshold
    }
}

/// Compare two PNG images.
///
/// Decoding runs on the blocking pool under `config.decode_timeout()`. A
/// failed or timed-out decode is an error; whether that blocks a run is up to
/// the caller.
pub async fn compare(
    baseline: &[u8],
    current: &[u8],
    config: &VisualConfig,
) -> Result<VisualDiff, ReplayError> {
    let baseline = baseline.to_vec();
    let current = current.to_vec();
    let pixel_threshold = config.pixel_threshold;

    let task = tokio::task::spawn_blocking(move || compare_blocking(&baseline, &current, pixel_threshold));

    match tokio::time::timeout(config.decode_timeout(), task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ReplayError::VisualComparison(format!(
            "comparison task failed: {}",
            e
        ))),
        Err(_) => Err(ReplayError::VisualComparison(format!(
            "image decode timed out after {}ms",
            config.decode_timeout_ms
        ))),
    }
}

fn compare_blocking(
    baseline: &[u8],
    current: &[u8],
    pixel_threshold: f64,
) -> Result<VisualDiff, ReplayError> {
    let baseline_img = decode_png(baseline, "baseline")?;
    let current_img = decode_png(current, "current")?;

    let (diff, diff_pixels, total_pixels) = diff_images(&baseline_img, &current_img, pixel_threshold);
    let difference_percentage = if total_pixels == 0 {
        0.0
    } else {
        diff_pixels as f64 / total_pixels as f64 * 100.0
    };

    debug!(
        "Compared {}x{} with {}x{}: {} of {} pixels differ ({:.2}%)",
        baseline_img.width(),
        baseline_img.height(),
        current_img.width(),
        current_img.height(),
        diff_pixels,
        total_pixels,
        difference_percentage
    );

    let diff_png =
        encode_png(&diff).map_err(|e| ReplayError::VisualComparison(e.to_string()))?;

    Ok(VisualDiff {
        baseline: encode_data_url(baseline),
        current: encode_data_url(current),
        diff: encode_data_url(&diff_png),
        difference_percentage,
        diff_pixels,
        total_pixels,
    })
}

fn decode_png(bytes: &[u8], which: &str) -> Result<RgbaImage, ReplayError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| ReplayError::VisualComparison(format!("cannot decode {} image: {}", which, e)))
}

/// Per-pixel comparison on a shared canvas; returns the diff image, differing and total pixel counts
pub fn diff_images(baseline: &RgbaImage, current: &RgbaImage, pixel_threshold: f64) -> (RgbaImage, u64, u64) {
    let width = baseline.width().max(current.width());
    let height = baseline.height().max(current.height());
    let empty = Rgba([0, 0, 0, 0]);
    let at = |img: &RgbaImage, x: u32, y: u32| {
        if x < img.width() && y < img.height() {
            *img.get_pixel(x, y)
        } else {
            empty
        }
    };

    let mut diff = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let b = at(baseline, x, y);
            let c = at(current, x, y);
            let delta: u32 = (0..3).map(|i| u32::from(b[i].abs_diff(c[i]))).sum();

            if f64::from(delta) / 3.0 > pixel_threshold {
                diff_pixels += 1;
                diff.put_pixel(x, y, DIFF_COLOR);
            } else {
                diff.put_pixel(x, y, Rgba([c[0], c[1], c[2], UNCHANGED_ALPHA]));
            }
        }
    }

    (diff, diff_pixels, u64::from(width) * u64::from(height))
}

/// Crop a viewport PNG to an element's box given in CSS pixels
pub fn crop(png: &[u8], rect: &BoundingBox, device_pixel_ratio: f64) -> Result<Vec<u8>, ReplayError> {
    let img = decode_png(png, "viewport")?;
    let scale = if device_pixel_ratio > 0.0 {
        device_pixel_ratio
    } else {
        1.0
    };

    let clamp = |v: f64, max: u32| (v * scale).round().clamp(0.0, f64::from(max)) as u32;
    let x0 = clamp(rect.x, img.width());
    let y0 = clamp(rect.y, img.height());
    let x1 = clamp(rect.x + rect.width, img.width());
    let y1 = clamp(rect.y + rect.height, img.height());

    if x1 <= x0 || y1 <= y0 {
        return Err(ReplayError::VisualComparison(format!(
            "element box {:?} lies outside the {}x{} capture",
            rect,
            img.width(),
            img.height()
        )));
    }

    let cropped = image::imageops::crop_imm(&img, x0, y0, x1 - x0, y1 - y0).to_image();
    encode_png(&cropped).map_err(|e| ReplayError::VisualComparison(e.to_string()))
}

pub fn encode_png(img: &RgbaImage) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img.clone()).write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
    Ok(buf)
}

pub fn encode_data_url(png: &[u8]) -> String {
    format!("{}{}", DATA_URL_PREFIX, STANDARD.encode(png))
}

/// Accepts a `data:` URL with a base64 payload, or bare base64
pub fn decode_data_url(data_url: &str) -> anyhow::Result<Vec<u8>> {
    let payload = match data_url.split_once(";base64,") {
        Some((scheme, payload)) if scheme.starts_with("data:") => payload,
        _ => data_url,
    };
    Ok(STANDARD.decode(payload.trim())?)
}

#[cfg(test)]
#[path = "visual_test.rs"]
mod visual_test;
