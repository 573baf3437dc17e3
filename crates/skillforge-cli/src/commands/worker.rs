//! The `skillforge worker` command.

use std::time::Duration;

use anyhow::Result;
use tracing::info;

use super::Session;
use crate::GlobalArgs;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub async fn execute(global: &GlobalArgs, follow: bool) -> Result<()> {
    let mut session = Session::open(global).await?;
    info!(
        parallelism = session.config.parallelism,
        follow, "worker started"
    );

    let mut processed = 0;
    let mut failed = 0;
    loop {
        let queued = session.pipeline.recover().await?;
        if queued > 0 {
            let report = session.settle().await;
            processed += report.processed;
            failed += report.failed;
        }
        if !follow {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    println!("Processed {processed} stage(s), {failed} failed.");
    Ok(())
}
