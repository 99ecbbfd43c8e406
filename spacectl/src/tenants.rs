//! Tenant directory: map subdomains to tenants.
//!
//! Lookups go through an untenanted session, since the `tenants` table is the
//! one table that is not owned by a tenant. Positive results are memoised for
//! the configured TTL; unknown subdomains are always looked up again so a
//! freshly registered tenant resolves immediately.

use moka::future::Cache;
use tracing::{debug, instrument};

use crate::config::TenantDirectoryConfig;
use crate::db::models::tenants::{Tenant, TenantCreateDBRequest};
use crate::db::pools::TenantPools;
use crate::errors::{Error, Result};
use crate::types::{PoolClass, TenantId, abbrev_uuid};

#[derive(Clone)]
pub struct TenantDirectory {
    pools: TenantPools,
    by_subdomain: Cache<String, Tenant>,
}

impl TenantDirectory {
    pub fn new(pools: TenantPools, config: &TenantDirectoryConfig) -> Self {
        Self {
            pools,
            by_subdomain: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(config.cache_ttl)
                .build(),
        }
    }

    /// Resolve a (case-insensitive) subdomain to its tenant
    #[instrument(skip(self), err)]
    pub async fn resolve_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>> {
        let subdomain = subdomain.trim().to_lowercase();
        if let Some(tenant) = self.by_subdomain.get(&subdomain).await {
            debug!("Tenant directory cache hit");
            return Ok(Some(tenant));
        }

        let mut session = self.pools.acquire_untenanted(PoolClass::Interactive).await?;
        let tenant = session.tenants().get_by_subdomain(&subdomain).await?;
        if let Some(tenant) = &tenant {
            self.by_subdomain.insert(subdomain, tenant.clone()).await;
        }
        Ok(tenant)
    }

    /// Look a tenant up by id, bypassing the subdomain cache
    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&tenant_id)), err)]
    pub async fn get(&self, tenant_id: TenantId) -> Result<Option<Tenant>> {
        let mut session = self.pools.acquire_untenanted(PoolClass::Interactive).await?;
        let tenant = session.tenants().get_by_id(tenant_id).await?;
        Ok(tenant)
    }

    /// Register a new tenant. Fails with a unique violation if the subdomain is taken.
    #[instrument(skip(self, name), err)]
    pub async fn register(&self, subdomain: &str, name: &str) -> Result<Tenant> {
        let subdomain = subdomain.trim().to_lowercase();
        if subdomain.is_empty() {
            return Err(Error::Other(anyhow::anyhow!("subdomain must not be empty")));
        }

        let mut session = self.pools.acquire_untenanted(PoolClass::Background).await?;
        let tenant = session
            .tenants()
            .create(&TenantCreateDBRequest {
                subdomain,
                name: name.to_string(),
            })
            .await?;
        Ok(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use crate::test::utils::test_pools;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_and_resolve(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
        let directory = TenantDirectory::new(test_pools(connect_opts).await, &TenantDirectoryConfig::default());

        assert!(directory.resolve_subdomain("acme").await.unwrap().is_none());

        let tenant = directory.register("Acme", "Acme Spaces").await.unwrap();
        assert_eq!(tenant.subdomain, "acme");

        // The earlier miss was not memoised
        let resolved = directory.resolve_subdomain(" ACME ").await.unwrap().unwrap();
        assert_eq!(resolved.id, tenant.id);
        assert_eq!(directory.resolve_subdomain("acme").await.unwrap(), Some(tenant));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_by_id(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
        let directory = TenantDirectory::new(test_pools(connect_opts).await, &TenantDirectoryConfig::default());

        let tenant = directory.register("initech", "Initech").await.unwrap();
        assert_eq!(directory.get(tenant.id).await.unwrap(), Some(tenant));
        assert_eq!(directory.get(uuid::Uuid::new_v4()).await.unwrap(), None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_subdomain(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
        let directory = TenantDirectory::new(test_pools(connect_opts).await, &TenantDirectoryConfig::default());

        directory.register("acme", "Acme").await.unwrap();
        let err = directory.register("ACME", "Other Acme").await.unwrap_err();
        assert!(matches!(err, Error::Database(DbError::UniqueViolation { .. })));
        assert_eq!(err.user_message(), "Subdomain 'acme' is already taken");
    }
}
