use anyhow::Result;

use crate::commands::utils;
use crate::daemon::{DaemonRequest, DaemonResponse};

/// Print the notifications buffered for an execution since the last call
pub async fn handle_events(execution_id: String) -> Result<()> {
    utils::require_daemon()?;

    match utils::send(DaemonRequest::Events { execution_id })? {
        DaemonResponse::Events(events) => {
            println!("{}", serde_json::to_string_pretty(&events)?);
            Ok(())
        }
        other => Err(utils::unexpected(other)),
    }
}
