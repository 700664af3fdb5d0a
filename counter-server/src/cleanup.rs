//! Background sweeper.
//!
//! Runs periodically to forget rate-limiter keys of departed connections and
//! to drop registry entries whose session has already ended.

use crate::config::CleanupConfig;
use crate::service::CounterService;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Spawn the sweeper task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_sweep_task(
    service: Arc<CounterService>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Sweeper disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Sweeper started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        timer.tick().await;

        loop {
            timer.tick().await;
            sweep(&service);
        }
    })
}

/// One sweep pass. Returns how many stale registry entries were removed.
pub fn sweep(service: &CounterService) -> usize {
    let keys_before = service.rate_limits().tracked_keys();
    service.rate_limits().shrink();
    let keys_after = service.rate_limits().tracked_keys();

    let pruned = service.registry().prune_closed();
    if pruned > 0 {
        tracing::info!("Sweep: pruned {} closed connections", pruned);
    } else {
        tracing::debug!(
            "Sweep: rate limiter keys {} -> {}",
            keys_before,
            keys_after
        );
    }
    pruned
}
