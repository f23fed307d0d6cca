use anyhow::Result;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::commands::utils;
use crate::config::Config;
use crate::daemon::{DaemonRequest, DaemonResponse};
use crate::errors::ReplayError;
use crate::replay::{ReplayEvent, ReplaySummary};
use crate::types::OutputFormat;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub async fn handle_replay(
    name: String,
    tab: String,
    execution_id: Option<String>,
    no_wait: bool,
    format: OutputFormat,
) -> Result<()> {
    utils::require_daemon()?;

    let execution_id = match utils::send(DaemonRequest::ReplayTest {
        test_name: name.clone(),
        tab: tab.clone(),
        execution_id,
    })? {
        DaemonResponse::Started { execution_id } => execution_id,
        other => return Err(utils::unexpected(other)),
    };
    info!("Replaying '{}' in tab '{}' as {}", name, tab, execution_id);

    if no_wait {
        println!("{}", execution_id);
        return Ok(());
    }

    let summary = wait_for_summary(&execution_id).await?;
    utils::print_output(&summary, format, ReplaySummary::to_string)?;
    Ok(())
}

/// Follow an execution's events until it reports a terminal summary
async fn wait_for_summary(execution_id: &str) -> Result<ReplaySummary> {
    // The daemon's watchdog ends a run that stalls this long; allow it time to report
    let quiet_limit = Config::load_default()?.replay.watchdog() * 2;
    follow_events(execution_id, quiet_limit, EVENT_POLL_INTERVAL, || {
        match utils::send(DaemonRequest::Events {
            execution_id: execution_id.to_string(),
        })? {
            DaemonResponse::Events(events) => Ok(events),
            other => Err(utils::unexpected(other)),
        }
    })
    .await
}

/// Poll `fetch` until a terminal event, giving up once `quiet_limit` passes without any event
async fn follow_events<F>(
    execution_id: &str,
    quiet_limit: Duration,
    poll_interval: Duration,
    mut fetch: F,
) -> Result<ReplaySummary>
where
    F: FnMut() -> Result<Vec<ReplayEvent>>,
{
    let mut deadline = Instant::now() + quiet_limit;
    loop {
        let events = fetch()?;
        if !events.is_empty() {
            deadline = Instant::now() + quiet_limit;
        }

        for event in events {
            match event {
                ReplayEvent::Progress {
                    step_index,
                    total_steps,
                    kind,
                    ..
                } => info!("Step {}/{}: {}", step_index + 1, total_steps, kind),
                ReplayEvent::Completed { summary, .. } | ReplayEvent::Interrupted { summary, .. } => {
                    return Ok(summary);
                }
                ReplayEvent::Failed { summary, failure, .. } => {
                    eprintln!("{}", summary);
                    return Err(ReplayError::Daemon {
                        kind: failure.error.clone(),
                        message: failure.to_string(),
                        exit_code: failure.exit_code,
                    }
                    .into());
                }
            }
        }

        if Instant::now() >= deadline {
            return Err(ReplayError::Timeout(format!(
                "Execution {} reported nothing for {}s",
                execution_id,
                quiet_limit.as_secs()
            ))
            .into());
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
#[path = "replay_test.rs"]
mod replay_test;
