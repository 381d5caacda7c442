//! Periodic purge of finished jobs.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::application::services::orchestrator::JobOrchestrator;

/// Purge terminal jobs older than `max_age` every `interval`, starting
/// immediately. The task runs until aborted.
#[must_use]
pub fn spawn_sweeper(
    orchestrator: JobOrchestrator,
    max_age: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match orchestrator.purge_older_than(max_age).await {
                Ok(removed) => debug!(removed, "retention sweep finished"),
                Err(e) => warn!(error = %format!("{e:#}"), "retention sweep failed"),
            }
        }
    })
}
