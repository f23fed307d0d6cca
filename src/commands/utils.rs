use anyhow::Result;
use serde::Serialize;

use crate::daemon::{DaemonClient, DaemonRequest, DaemonResponse};
use crate::errors::ReplayError;
use crate::types::OutputFormat;

/// Tab used when a command does not name one
pub const DEFAULT_TAB: &str = "main";

/// Require daemon to be running; every browser-facing command goes through it
pub fn require_daemon() -> Result<()> {
    if !DaemonClient::is_daemon_running() {
        eprintln!("Error: The daemon is not running.");
        eprintln!("Start the daemon with: retrace daemon start --browser chrome");
        return Err(ReplayError::Transport("Daemon not running".to_string()).into());
    }
    Ok(())
}

/// Send a request and turn an error response into an error carrying its exit code
pub fn send(request: DaemonRequest) -> Result<DaemonResponse> {
    match DaemonClient::send_request(request)? {
        DaemonResponse::Error {
            kind,
            message,
            exit_code,
        } => Err(ReplayError::Daemon {
            kind,
            message,
            exit_code,
        }
        .into()),
        response => Ok(response),
    }
}

pub fn unexpected(response: DaemonResponse) -> anyhow::Error {
    anyhow::anyhow!("Unexpected response from daemon: {:?}", response)
}

/// Print `value` as pretty JSON, or with `simple` for human-readable output
pub fn print_output<T: Serialize>(
    value: &T,
    format: OutputFormat,
    simple: impl FnOnce(&T) -> String,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Simple => println!("{}", simple(value)),
    }
    Ok(())
}
