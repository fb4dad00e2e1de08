//! Periodic background refresh.

use super::AggregationCache;
use crate::error::RefreshError;
use std::sync::Arc;
use std::time::Duration;

/// Spawn a task that refreshes `cache` every `interval` until the cache is
/// shut down. The first refresh runs immediately.
///
/// Builds run on the blocking pool; a tick that lands while a refresh is
/// still building is skipped.
pub fn spawn_refresh_loop(
    cache: Arc<AggregationCache>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if cache.is_shut_down() {
                break;
            }

            let worker = Arc::clone(&cache);
            match tokio::task::spawn_blocking(move || worker.refresh()).await {
                Ok(Ok(outcome)) => {
                    tracing::debug!(generation = %outcome.generation_id, "Scheduled refresh complete");
                }
                Ok(Err(RefreshError::ShuttingDown)) => break,
                Ok(Err(RefreshError::InProgress)) => {
                    tracing::debug!("Scheduled refresh skipped, another refresh is running");
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Scheduled refresh failed");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Refresh task panicked");
                }
            }
        }

        tracing::info!("Refresh loop stopped");
    })
}
