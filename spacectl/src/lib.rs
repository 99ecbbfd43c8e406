//! # spacectl: Scheduling Core for Multi-Tenant Space Booking
//!
//! `spacectl` is the data layer behind a space-as-a-service backend. Many tenants
//! (identified by subdomain) share one PostgreSQL database and one process; each
//! tenant books its own resources against weekly availability schedules.
//!
//! ## Architecture
//!
//! The crate has three layers that compose through [`Application`]:
//!
//! - [`db::pools::TenantPools`]: three process-wide connection pools split by
//!   workload ([`PoolClass`]). Every borrowed connection carries the tenant
//!   context that row-level security policies read, and loses it again when it
//!   goes back to the pool.
//! - [`availability::AvailabilityEngine`]: overlap and schedule checks plus
//!   reservation lifecycle (hold, confirm, cancel). Admission is atomic per
//!   resource so two overlapping reservations can never both be committed.
//! - [`cache::TieredCache`]: a three-tier in-process cache (L1 hot, L2 warm, L3
//!   cold) with smallest-fit placement, LRU eviction, access-count promotion and
//!   tag-based invalidation. The engine uses it for availability answers and
//!   drops affected entries whenever a reservation or schedule changes.
//!
//! [`tenants::TenantDirectory`] resolves subdomains to tenants, and is the only
//! path that reads from the database without a tenant context.
//!
//! ## Background tasks
//!
//! [`Application::run`] starts the cache sweeper and, when metrics are enabled,
//! the pool gauge sampler. Both stop on the shutdown signal before the pools
//! are closed.
//!
//! ## Testing
//!
//! Database tests use `#[sqlx::test]`, which provisions an isolated database
//! per test and runs the migrations in `migrations/`. Set `DATABASE_URL` to a
//! server where the test user may create databases.

pub mod availability;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod telemetry;
pub mod tenants;
pub mod types;

#[cfg(test)]
mod test;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::availability::AvailabilityEngine;
use crate::availability::store::postgres::PostgresReservationStore;
use crate::cache::TieredCache;
use crate::db::pools::{TenantPools, run_pool_metrics_sampler};
use crate::tenants::TenantDirectory;

pub use config::Config;
pub use types::{PoolClass, ReservationId, ResourceId, TenantId};

/// Get the spacectl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Owns the pools, cache, engine and tenant directory for one process.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects the pools and optionally runs migrations
/// 2. **Run**: [`Application::run`] starts background tasks and waits for the shutdown future
/// 3. **Shutdown**: background tasks are cancelled and awaited, then the pools are closed
pub struct Application {
    config: Config,
    pools: TenantPools,
    cache: Arc<TieredCache>,
    engine: AvailabilityEngine,
    tenants: TenantDirectory,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting spacectl with configuration: {:#?}", config);

        let pools = TenantPools::connect(&config.database, config.slow_threshold()).await?;
        if config.database.run_migrations {
            info!("Running database migrations");
            pools.migrate().await?;
        }

        let cache = Arc::new(TieredCache::new(&config.cache));
        let store = Arc::new(PostgresReservationStore::new(pools.clone()));
        let engine = AvailabilityEngine::new(store, Arc::clone(&cache));
        let tenants = TenantDirectory::new(pools.clone(), &config.tenants);

        Ok(Self {
            config,
            pools,
            cache,
            engine,
            tenants,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pools(&self) -> &TenantPools {
        &self.pools
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn engine(&self) -> &AvailabilityEngine {
        &self.engine
    }

    pub fn tenants(&self) -> &TenantDirectory {
        &self.tenants
    }

    /// Run background tasks until `shutdown` resolves, then close everything down
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let shutdown_token = CancellationToken::new();
        let mut background_tasks = Vec::new();

        background_tasks.push(tokio::spawn(cache::run_cache_sweeper(
            Arc::clone(&self.cache),
            self.config.cache.sweep_interval,
            shutdown_token.clone(),
        )));

        if self.config.metrics.enabled {
            background_tasks.push(tokio::spawn(run_pool_metrics_sampler(
                self.pools.clone(),
                self.config.metrics.pool_sample_interval,
                shutdown_token.clone(),
            )));
        }

        info!(tasks = background_tasks.len(), "spacectl running");
        shutdown.await;

        info!("Shutdown signal received, stopping background tasks...");
        shutdown_token.cancel();
        for result in futures::future::join_all(background_tasks).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Background task exited with an error"),
                Err(e) => warn!(error = %e, "Background task panicked"),
            }
        }

        info!("Closing database connections...");
        self.pools.close().await;
        Ok(())
    }
}
