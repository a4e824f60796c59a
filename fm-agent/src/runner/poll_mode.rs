//! Polling mode runner.
//!
//! Runs one monitoring cycle every `agent.poll_interval_secs` until Ctrl+C. A cycle that
//! panics is logged and counted, and the loop carries on after the normal sleep.

use crate::config::Config;
use crate::runner::build_agent;
use anyhow::Result;
use chrono::Local;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run the agent in polling mode.
pub async fn run(config: &Config) -> Result<()> {
    info!("fm-agent starting in polling mode");

    let cancel_token = CancellationToken::new();
    let poll_interval = config.poll_interval();
    let mut agent = build_agent(config, cancel_token.clone()).await?;

    tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed while waiting for shutdown signal");
            }
            info!("shutdown signal received");
            cancel_token.cancel();
        }
    });

    info!(
        poll_interval_secs = poll_interval.as_secs(),
        buckets = config.buckets.len(),
        "fm-agent started; polling storage"
    );

    while !cancel_token.is_cancelled() {
        agent.run_cycle_isolated(Local::now().naive_local()).await;

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = sleep(poll_interval) => {}
        }
    }

    info!(
        tracked = agent.reconciler().tracked_len(),
        "fm-agent shutdown complete"
    );
    Ok(())
}
