use anyhow::Result;

use crate::commands::utils;
use crate::daemon::{DaemonRequest, DaemonResponse};

/// Ask a running execution to stop before its next step
pub async fn handle_stop(execution_id: String) -> Result<()> {
    utils::require_daemon()?;

    match utils::send(DaemonRequest::ForceStopTest { execution_id })? {
        DaemonResponse::Success(msg) => println!("{}", msg),
        other => return Err(utils::unexpected(other)),
    }
    Ok(())
}

/// Forget every run and persisted execution state
pub async fn handle_reset() -> Result<()> {
    utils::require_daemon()?;

    match utils::send(DaemonRequest::ForceReset)? {
        DaemonResponse::Success(msg) => println!("{}", msg),
        other => return Err(utils::unexpected(other)),
    }
    Ok(())
}
