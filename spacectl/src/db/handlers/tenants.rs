use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::errors::Result;
use crate::db::models::tenants::{Tenant, TenantCreateDBRequest};
use crate::types::TenantId;

/// Tenant accounts. The table is tenant-agnostic, so this repository is
/// reachable from untenanted sessions only.
pub struct Tenants<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Tenants<'c> {
    pub(crate) fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(subdomain = %request.subdomain), err)]
    pub async fn create(&mut self, request: &TenantCreateDBRequest) -> Result<Tenant> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (id, subdomain, name)
            VALUES ($1, lower($2), $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.subdomain)
        .bind(&request.name)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(tenant)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: TenantId) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(tenant)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_subdomain(&mut self, subdomain: &str) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE subdomain = lower($1)")
            .bind(subdomain)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use sqlx::PgPool;

    fn request(subdomain: &str) -> TenantCreateDBRequest {
        TenantCreateDBRequest {
            subdomain: subdomain.to_string(),
            name: format!("{subdomain} Ltd"),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_lowercases_subdomain(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Tenants::new(&mut conn);

        let tenant = repo.create(&request("Acme")).await.unwrap();
        assert_eq!(tenant.subdomain, "acme");

        let found = repo.get_by_subdomain("ACME").await.unwrap().unwrap();
        assert_eq!(found.id, tenant.id);
        assert_eq!(repo.get_by_id(tenant.id).await.unwrap(), Some(tenant));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_subdomain_is_unique_violation(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Tenants::new(&mut conn);

        repo.create(&request("acme")).await.unwrap();
        let err = repo.create(&request("acme")).await.unwrap_err();
        match err {
            DbError::UniqueViolation { conflicting_value, .. } => assert_eq!(conflicting_value.as_deref(), Some("acme")),
            other => panic!("expected unique violation, got {other:?}"),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_subdomain(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        assert!(Tenants::new(&mut conn).get_by_subdomain("nobody").await.unwrap().is_none());
    }
}
