//! Background expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::TieredCache;

/// Periodically drop expired entries until `shutdown` is cancelled.
///
/// Reads already treat expired entries as misses; sweeping only returns
/// their memory sooner.
pub async fn run_cache_sweeper(cache: Arc<TieredCache>, interval: Duration, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!(?interval, "Starting cache sweeper");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Cache sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                let removed = cache.clear_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        }
    }

    Ok(())
}
