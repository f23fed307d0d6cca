use anyhow::Result;

use crate::commands::utils;
use crate::daemon::{DaemonRequest, DaemonResponse};
use crate::store::Settings;
use crate::types::OutputFormat;

/// Show the settings, updating any value given
pub async fn handle_settings(
    recording_delay: Option<u64>,
    replay_delay: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    utils::require_daemon()?;

    let request = if recording_delay.is_none() && replay_delay.is_none() {
        DaemonRequest::GetSettings
    } else {
        DaemonRequest::UpdateSettings {
            recording_delay,
            replay_delay,
        }
    };

    match utils::send(request)? {
        DaemonResponse::Settings(settings) => utils::print_output(&settings, format, |s: &Settings| {
            format!(
                "recordingDelay: {} ms\nreplayDelay: {} ms",
                s.recording_delay, s.replay_delay
            )
        }),
        other => Err(utils::unexpected(other)),
    }
}
