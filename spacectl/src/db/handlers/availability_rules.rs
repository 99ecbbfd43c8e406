use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::errors::Result;
use crate::db::models::availability_rules::{AvailabilityRule, RuleWindow};
use crate::types::{ResourceId, TenantId, abbrev_uuid};

/// Weekly availability windows owned by one tenant
pub struct AvailabilityRules<'c> {
    db: &'c mut PgConnection,
    tenant_id: TenantId,
}

impl<'c> AvailabilityRules<'c> {
    pub(crate) fn new(db: &'c mut PgConnection, tenant_id: TenantId) -> Self {
        Self { db, tenant_id }
    }

    /// All rules (active or not) for a resource, ordered by day and start time
    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&self.tenant_id), resource_id = %abbrev_uuid(&resource_id)), err)]
    pub async fn list_for_resource(&mut self, resource_id: ResourceId) -> Result<Vec<AvailabilityRule>> {
        let rules = sqlx::query_as::<_, AvailabilityRule>(
            r#"
            SELECT * FROM availability_rules
            WHERE tenant_id = $1 AND resource_id = $2
            ORDER BY day_of_week, start_time
            "#,
        )
        .bind(self.tenant_id)
        .bind(resource_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rules)
    }

    /// Delete the resource's rules and insert `windows` in their place.
    ///
    /// Must run inside a transaction for readers never to see a partial set.
    #[instrument(skip(self, windows), fields(tenant_id = %abbrev_uuid(&self.tenant_id), resource_id = %abbrev_uuid(&resource_id), count = windows.len()), err)]
    pub async fn replace_for_resource(&mut self, resource_id: ResourceId, windows: &[RuleWindow]) -> Result<Vec<AvailabilityRule>> {
        sqlx::query("DELETE FROM availability_rules WHERE tenant_id = $1 AND resource_id = $2")
            .bind(self.tenant_id)
            .bind(resource_id)
            .execute(&mut *self.db)
            .await?;

        let mut inserted = Vec::with_capacity(windows.len());
        for window in windows {
            let rule = sqlx::query_as::<_, AvailabilityRule>(
                r#"
                INSERT INTO availability_rules (id, tenant_id, resource_id, day_of_week, start_time, end_time, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(self.tenant_id)
            .bind(resource_id)
            .bind(window.day_of_week as i16)
            .bind(window.start)
            .bind(window.end)
            .bind(window.active)
            .fetch_one(&mut *self.db)
            .await?;
            inserted.push(rule);
        }
        Ok(inserted)
    }
}
