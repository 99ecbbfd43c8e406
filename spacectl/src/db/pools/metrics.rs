//! Connection pool gauges.
//!
//! A background task samples every [`PoolClass`] pool of a [`TenantPools`] on
//! an interval until cancelled. Gauges carry a `pool` label with the class name:
//!
//! - `spacectl_db_pool_connections_total`
//! - `spacectl_db_pool_connections_idle`
//! - `spacectl_db_pool_connections_in_use`
//! - `spacectl_db_pool_connections_max`

use std::time::Duration;

use metrics::gauge;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use super::TenantPools;
use crate::types::PoolClass;

/// Point-in-time occupancy of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSample {
    pub class: PoolClass,
    pub open: u32,
    pub idle: usize,
    pub max: u32,
}

impl PoolSample {
    pub fn of(class: PoolClass, pool: &PgPool) -> Self {
        Self {
            class,
            open: pool.size(),
            idle: pool.num_idle(),
            max: pool.options().get_max_connections(),
        }
    }

    /// Connections currently borrowed by sessions
    pub fn in_use(&self) -> usize {
        (self.open as usize).saturating_sub(self.idle)
    }

    fn record(&self) {
        let pool = self.class.as_str();
        gauge!("spacectl_db_pool_connections_total", "pool" => pool).set(self.open as f64);
        gauge!("spacectl_db_pool_connections_idle", "pool" => pool).set(self.idle as f64);
        gauge!("spacectl_db_pool_connections_in_use", "pool" => pool).set(self.in_use() as f64);
        gauge!("spacectl_db_pool_connections_max", "pool" => pool).set(self.max as f64);
    }
}

/// Sample all pools every `sample_interval` until `shutdown` is cancelled
pub async fn run_pool_metrics_sampler(pools: TenantPools, sample_interval: Duration, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!(interval = ?sample_interval, "Starting pool metrics sampler");

    let mut ticker = tokio::time::interval(sample_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for (class, pool) in pools.labeled() {
                    let sample = PoolSample::of(class, pool);
                    sample.record();
                    trace!(?sample, "Sampled pool");
                }
            }
        }
    }

    info!("Pool metrics sampler stopped");
    Ok(())
}
