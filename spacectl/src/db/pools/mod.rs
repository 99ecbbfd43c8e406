//! Tenant-scoped connection pools.
//!
//! [`TenantPools`] owns three process-wide PostgreSQL pools, one per
//! [`PoolClass`]. Pools are sized for a workload, never for a tenant: tenant
//! isolation is applied to each borrowed connection instead.
//!
//! ```text
//!               ┌─────────────┐
//!               │ TenantPools │
//!               └──────┬──────┘
//!        ┌─────────────┼─────────────┐
//!        ↓             ↓             ↓
//! ┌─────────────┐ ┌──────────┐ ┌────────────┐
//! │ interactive │ │ reporting│ │ background │
//! └─────────────┘ └──────────┘ └────────────┘
//! ```
//!
//! # Tenant context
//!
//! [`TenantPools::acquire`] runs `set_config('app.current_tenant', <id>, false)`
//! on the connection before handing out a [`TenantSession`]. Row-level
//! security policies on tenant-owned tables read that setting. When the
//! session is dropped, on any exit path including future cancellation, the
//! connection goes back to its pool and the pool's `after_release` hook
//! clears the setting. A connection whose setting cannot be cleared is
//! closed rather than reused.
//!
//! Tenant-owned repositories can only be obtained from a [`TenantSession`]
//! (or a [`TenantTransaction`] begun on one). [`UntenantedSession`] exposes
//! only the tenant directory.
//!
//! # Example
//!
//! ```ignore
//! let mut session = pools.acquire(PoolClass::Interactive, tenant_id).await?;
//! let upcoming = session.reservations().list(&ReservationFilter::new(resource_id)).await?;
//! ```

pub mod metrics;

use std::str::FromStr;
use std::time::{Duration, Instant};

use ::metrics::{counter, histogram};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, instrument, warn};

use crate::config::{DatabaseConfig, PoolSettings, PoolsConfig};
use crate::db::handlers::{AvailabilityRules, Reservations, Tenants};
use crate::errors::{Error, Result};
use crate::types::{PoolClass, TenantId, abbrev_uuid};

pub use metrics::{PoolSample, run_pool_metrics_sampler};

const SET_TENANT_CONTEXT: &str = "SELECT set_config('app.current_tenant', $1, false)";
const CLEAR_TENANT_CONTEXT: &str = "SELECT set_config('app.current_tenant', '', false)";
const CURRENT_TENANT_CONTEXT: &str = "SELECT NULLIF(current_setting('app.current_tenant', true), '')";

/// The three process-wide pools plus scoped acquisition.
#[derive(Clone, Debug)]
pub struct TenantPools {
    interactive: PgPool,
    reporting: PgPool,
    background: PgPool,
    slow_acquire: Duration,
}

impl TenantPools {
    /// Connect all three pools from the database section of the configuration.
    ///
    /// `slow_threshold` is used both for slow-acquire warnings and for sqlx's
    /// slow statement logging.
    pub async fn connect(config: &DatabaseConfig, slow_threshold: Duration) -> Result<Self> {
        let options = PgConnectOptions::from_str(&config.url).map_err(|e| Error::Connection {
            message: format!("invalid database url: {e}"),
        })?;
        Self::connect_with_options(options, &config.pools, slow_threshold).await
    }

    pub async fn connect_with_options(options: PgConnectOptions, pools: &PoolsConfig, slow_threshold: Duration) -> Result<Self> {
        let options = options.log_slow_statements(log::LevelFilter::Warn, slow_threshold);

        let interactive = Self::connect_class(PoolClass::Interactive, &pools.interactive, options.clone()).await?;
        let reporting = Self::connect_class(PoolClass::Reporting, &pools.reporting, options.clone()).await?;
        let background = Self::connect_class(PoolClass::Background, &pools.background, options).await?;

        Ok(Self {
            interactive,
            reporting,
            background,
            slow_acquire: slow_threshold,
        })
    }

    async fn connect_class(class: PoolClass, settings: &PoolSettings, options: PgConnectOptions) -> Result<PgPool> {
        debug!(
            pool = %class,
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            acquire_timeout_secs = settings.acquire_timeout_secs,
            "Connecting pool"
        );

        PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout())
            .idle_timeout(settings.idle_timeout())
            .max_lifetime(settings.max_lifetime())
            .after_release(move |conn, _meta| {
                Box::pin(async move {
                    match sqlx::query(CLEAR_TENANT_CONTEXT).execute(&mut *conn).await {
                        Ok(_) => Ok(true),
                        Err(e) => {
                            // Returning false makes the pool close the connection
                            warn!(pool = %class, error = %e, "Failed to clear tenant context, discarding connection");
                            Ok(false)
                        }
                    }
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| Error::from_acquire(class, e))
    }

    pub fn pool(&self, class: PoolClass) -> &PgPool {
        match class {
            PoolClass::Interactive => &self.interactive,
            PoolClass::Reporting => &self.reporting,
            PoolClass::Background => &self.background,
        }
    }

    /// Every pool with its class, in [`PoolClass::ALL`] order
    pub fn labeled(&self) -> impl Iterator<Item = (PoolClass, &PgPool)> + '_ {
        PoolClass::ALL.into_iter().map(|class| (class, self.pool(class)))
    }

    async fn acquire_raw(&self, class: PoolClass) -> Result<PoolConnection<Postgres>> {
        let started = Instant::now();
        let conn = self.pool(class).acquire().await.map_err(|e| {
            counter!("spacectl_db_pool_acquire_failures_total", "pool" => class.as_str()).increment(1);
            Error::from_acquire(class, e)
        })?;

        let waited = started.elapsed();
        histogram!("spacectl_db_pool_acquire_seconds", "pool" => class.as_str()).record(waited.as_secs_f64());
        if waited > self.slow_acquire {
            warn!(pool = %class, waited_ms = waited.as_millis() as u64, "Slow connection acquire");
        }
        Ok(conn)
    }

    /// Borrow a connection from `class` with its tenant context set to `tenant_id`.
    ///
    /// Pool timeouts surface as [`Error::PoolExhausted`] and are not retried here.
    #[instrument(skip(self), fields(pool = %class, tenant_id = %abbrev_uuid(&tenant_id)), err)]
    pub async fn acquire(&self, class: PoolClass, tenant_id: TenantId) -> Result<TenantSession> {
        let mut conn = self.acquire_raw(class).await?;

        if let Err(e) = sqlx::query(SET_TENANT_CONTEXT)
            .bind(tenant_id.to_string())
            .execute(&mut *conn)
            .await
        {
            conn.close_on_drop();
            return Err(Error::Connection {
                message: format!("failed to set tenant context: {e}"),
            });
        }

        Ok(TenantSession { conn, tenant_id, class })
    }

    /// Borrow a connection with no tenant context, for tenant-agnostic tables.
    #[instrument(skip(self), fields(pool = %class), err)]
    pub async fn acquire_untenanted(&self, class: PoolClass) -> Result<UntenantedSession> {
        let conn = self.acquire_raw(class).await?;
        Ok(UntenantedSession { conn, class })
    }

    /// Apply pending migrations through the background pool
    pub async fn migrate(&self) -> Result<()> {
        crate::migrator()
            .run(&self.background)
            .await
            .map_err(|e| Error::Other(anyhow::Error::from(e).context("failed to run migrations")))
    }

    /// Close all three pools, waiting for borrowed connections to come back
    pub async fn close(&self) {
        for class in PoolClass::ALL {
            self.pool(class).close().await;
        }
    }
}

async fn current_context(conn: &mut PgConnection) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, Option<String>>(CURRENT_TENANT_CONTEXT)
        .fetch_one(conn)
        .await?;
    Ok(value)
}

/// A pooled connection bound to one tenant.
///
/// Dropping the session returns the connection to its pool.
#[derive(Debug)]
pub struct TenantSession {
    conn: PoolConnection<Postgres>,
    tenant_id: TenantId,
    class: PoolClass,
}

impl TenantSession {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn class(&self) -> PoolClass {
        self.class
    }

    pub fn reservations(&mut self) -> Reservations<'_> {
        Reservations::new(&mut self.conn, self.tenant_id)
    }

    pub fn availability_rules(&mut self) -> AvailabilityRules<'_> {
        AvailabilityRules::new(&mut self.conn, self.tenant_id)
    }

    /// Start a transaction that inherits the session's tenant context
    pub async fn begin(&mut self) -> Result<TenantTransaction<'_>> {
        let tenant_id = self.tenant_id;
        let tx = self.conn.begin().await?;
        Ok(TenantTransaction { tx, tenant_id })
    }

    /// The tenant context currently set on the connection
    pub async fn current_context(&mut self) -> Result<Option<String>> {
        current_context(&mut self.conn).await
    }
}

/// A transaction on a [`TenantSession`]. Rolled back on drop unless committed.
pub struct TenantTransaction<'s> {
    tx: Transaction<'s, Postgres>,
    tenant_id: TenantId,
}

impl TenantTransaction<'_> {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn reservations(&mut self) -> Reservations<'_> {
        Reservations::new(&mut self.tx, self.tenant_id)
    }

    pub fn availability_rules(&mut self) -> AvailabilityRules<'_> {
        AvailabilityRules::new(&mut self.tx, self.tenant_id)
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// A pooled connection with no tenant context
#[derive(Debug)]
pub struct UntenantedSession {
    conn: PoolConnection<Postgres>,
    class: PoolClass,
}

impl UntenantedSession {
    pub fn class(&self) -> PoolClass {
        self.class
    }

    pub fn tenants(&mut self) -> Tenants<'_> {
        Tenants::new(&mut self.conn)
    }

    pub async fn current_context(&mut self) -> Result<Option<String>> {
        current_context(&mut self.conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::reservations::ReservationFilter;
    use crate::test::utils::{create_test_tenant, test_pools, test_pools_config};
    use sqlx::postgres::PgPoolOptions;
    use uuid::Uuid;

    #[sqlx::test]
    #[test_log::test]
    async fn test_acquire_sets_tenant_context(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
        let pools = test_pools(connect_opts).await;
        let tenant_id = Uuid::new_v4();

        let mut session = pools.acquire(PoolClass::Interactive, tenant_id).await.unwrap();
        assert_eq!(session.tenant_id(), tenant_id);
        assert_eq!(session.current_context().await.unwrap(), Some(tenant_id.to_string()));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_context_cleared_after_release(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
        let mut config = test_pools_config();
        config.interactive.max_connections = 1;
        let pools = TenantPools::connect_with_options(connect_opts, &config, Duration::from_secs(1))
            .await
            .unwrap();

        let tenant_id = Uuid::new_v4();
        {
            let mut session = pools.acquire(PoolClass::Interactive, tenant_id).await.unwrap();
            assert!(session.current_context().await.unwrap().is_some());
        }

        // Single-connection pool, so this is the connection that was just released
        let mut untenanted = pools.acquire_untenanted(PoolClass::Interactive).await.unwrap();
        assert_eq!(untenanted.current_context().await.unwrap(), None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_context_cleared_after_early_return(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
        let mut config = test_pools_config();
        config.interactive.max_connections = 1;
        let pools = TenantPools::connect_with_options(connect_opts, &config, Duration::from_secs(1))
            .await
            .unwrap();

        async fn failing_operation(pools: &TenantPools) -> Result<()> {
            let mut session = pools.acquire(PoolClass::Interactive, Uuid::new_v4()).await?;
            sqlx::query("SELECT * FROM no_such_table").execute(&mut *session.conn).await?;
            Ok(())
        }
        assert!(failing_operation(&pools).await.is_err());

        let mut untenanted = pools.acquire_untenanted(PoolClass::Interactive).await.unwrap();
        assert_eq!(untenanted.current_context().await.unwrap(), None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exhaustion_surfaces_as_pool_exhausted(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
        let mut config = test_pools_config();
        config.reporting.max_connections = 1;
        config.reporting.acquire_timeout_secs = 1;
        let pools = TenantPools::connect_with_options(connect_opts, &config, Duration::from_secs(1))
            .await
            .unwrap();

        let _held = pools.acquire(PoolClass::Reporting, Uuid::new_v4()).await.unwrap();
        let err = pools.acquire(PoolClass::Reporting, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { class: PoolClass::Reporting }));
        assert!(err.is_retryable());

        // Other classes are unaffected
        pools.acquire(PoolClass::Interactive, Uuid::new_v4()).await.unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_transaction_rolls_back_on_drop(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
        let pools = test_pools(connect_opts).await;
        let tenant = create_test_tenant(pools.pool(PoolClass::Background), "acme").await;
        let resource = Uuid::new_v4();

        let mut session = pools.acquire(PoolClass::Interactive, tenant.id).await.unwrap();
        {
            let mut tx = session.begin().await.unwrap();
            assert_eq!(tx.tenant_id(), tenant.id);
            tx.availability_rules()
                .replace_for_resource(
                    resource,
                    &[crate::db::models::availability_rules::RuleWindow::new(
                        0,
                        chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                        chrono::NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                    )],
                )
                .await
                .unwrap();
        }

        assert!(session.availability_rules().list_for_resource(resource).await.unwrap().is_empty());
        assert!(session.reservations().list(&ReservationFilter::new(resource)).await.unwrap().is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_labeled_covers_every_class(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
        let pools = test_pools(connect_opts).await;
        let classes: Vec<_> = pools.labeled().map(|(class, _)| class).collect();
        assert_eq!(classes, PoolClass::ALL.to_vec());
        pools.close().await;
        assert!(pools.pool(PoolClass::Interactive).is_closed());
    }
}
