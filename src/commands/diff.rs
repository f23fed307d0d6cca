use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::commands::utils;
use crate::config::Config;
use crate::errors::ReplayError;
use crate::types::OutputFormat;
use crate::visual;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiffReport {
    difference_percentage: f64,
    diff_pixels: u64,
    total_pixels: u64,
    threshold: f64,
    diff_image: Option<PathBuf>,
}

/// Compare two PNG files offline, optionally writing the diff visualization
pub async fn handle_diff(
    baseline: PathBuf,
    current: PathBuf,
    output: Option<PathBuf>,
    threshold: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    let mut config = Config::load_default()?.visual;
    if let Some(threshold) = threshold {
        config.threshold = threshold;
    }

    let baseline_png = std::fs::read(&baseline)
        .with_context(|| format!("Failed to read {}", baseline.display()))?;
    let current_png =
        std::fs::read(&current).with_context(|| format!("Failed to read {}", current.display()))?;

    let diff = visual::compare(&baseline_png, &current_png, &config).await?;

    if let Some(path) = &output {
        let png = visual::decode_data_url(&diff.diff)?;
        std::fs::write(path, png).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let report = DiffReport {
        difference_percentage: diff.difference_percentage,
        diff_pixels: diff.diff_pixels,
        total_pixels: diff.total_pixels,
        threshold: config.threshold,
        diff_image: output,
    };
    utils::print_output(&report, format, |r| {
        format!(
            "{:.2}% different ({} of {} pixels)",
            r.difference_percentage, r.diff_pixels, r.total_pixels
        )
    })?;

    if diff.exceeds(config.threshold) {
        return Err(ReplayError::VisualRegression {
            step_index: 0,
            difference_percentage: diff.difference_percentage,
        }
        .into());
    }
    Ok(())
}
