use anyhow::Result;
use clap::Subcommand;
use tracing::info;

use crate::commands::utils::{self, DEFAULT_TAB};
use crate::daemon::{DaemonRequest, DaemonResponse};
use crate::types::OutputFormat;

#[derive(Subcommand)]
pub enum RecordCommands {
    /// Start recording a test in a tab
    Start {
        /// Name the finished test is saved under
        name: String,

        /// Open this URL before recording starts
        #[arg(long)]
        url: Option<String>,

        #[arg(long, default_value = DEFAULT_TAB)]
        tab: String,
    },

    /// Stop recording and save the test
    Stop {
        #[arg(long, default_value = DEFAULT_TAB)]
        tab: String,

        #[arg(short, long, default_value = "simple")]
        format: OutputFormat,
    },

    /// Add a visual checkpoint of the current viewport to the recording
    Screenshot {
        #[arg(long, default_value = DEFAULT_TAB)]
        tab: String,
    },
}

pub async fn handle_record(command: RecordCommands) -> Result<()> {
    utils::require_daemon()?;

    match command {
        RecordCommands::Start { name, url, tab } => {
            info!("Recording '{}' in tab '{}'", name, tab);
            match utils::send(DaemonRequest::StartRecording {
                test_name: name,
                tab,
                url,
            })? {
                DaemonResponse::Success(msg) => println!("{}", msg),
                other => return Err(utils::unexpected(other)),
            }
        }
        RecordCommands::Stop { tab, format } => {
            match utils::send(DaemonRequest::StopRecording { tab })? {
                DaemonResponse::Recorded(test) => {
                    utils::print_output(&*test, format, |test| {
                        format!("Saved test '{}' with {} steps", test.name, test.len())
                    })?;
                }
                other => return Err(utils::unexpected(other)),
            }
        }
        RecordCommands::Screenshot { tab } => {
            match utils::send(DaemonRequest::CaptureScreenshot { tab })? {
                DaemonResponse::StepCaptured(step) => {
                    println!("Captured screenshot checkpoint at {}", step.url);
                }
                other => return Err(utils::unexpected(other)),
            }
        }
    }
    Ok(())
}
