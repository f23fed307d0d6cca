use anyhow::Result;

use crate::daemon::DaemonClient;

pub async fn handle_ping() -> Result<()> {
    let latency = DaemonClient::ping().await?;
    println!("pong ({} ms)", latency.as_millis());
    Ok(())
}
