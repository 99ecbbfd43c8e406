use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::errors::{DbError, Result};
use crate::db::models::reservations::{NewReservation, Reservation, ReservationStatus};
use crate::types::{ReservationId, ResourceId, TenantId, abbrev_uuid};

/// Filter for listing a resource's reservations
#[derive(Debug, Clone)]
pub struct ReservationFilter {
    pub resource_id: ResourceId,
    /// Only reservations ending after this instant
    pub from: Option<DateTime<Utc>>,
    /// Only reservations starting before this instant
    pub to: Option<DateTime<Utc>>,
    pub include_cancelled: bool,
}

impl ReservationFilter {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            from: None,
            to: None,
            include_cancelled: false,
        }
    }
}

/// Reservations owned by one tenant.
///
/// Every query also filters on `tenant_id`, so isolation does not depend on
/// the connection role being subject to row-level security.
pub struct Reservations<'c> {
    db: &'c mut PgConnection,
    tenant_id: TenantId,
}

impl<'c> Reservations<'c> {
    pub(crate) fn new(db: &'c mut PgConnection, tenant_id: TenantId) -> Self {
        Self { db, tenant_id }
    }

    /// Serialise admission for one resource until the surrounding transaction ends.
    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&self.tenant_id), resource_id = %abbrev_uuid(&resource_id)), err)]
    pub async fn lock_resource(&mut self, resource_id: ResourceId) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("reservations:{}:{}", self.tenant_id, resource_id))
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(tenant_id = %abbrev_uuid(&self.tenant_id), resource_id = %abbrev_uuid(&request.resource_id)), err)]
    pub async fn create(&mut self, request: &NewReservation) -> Result<Reservation> {
        if request.tenant_id != self.tenant_id {
            return Err(DbError::Other(anyhow::anyhow!(
                "reservation for tenant {} written through a session for tenant {}",
                request.tenant_id,
                self.tenant_id
            )));
        }

        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations (id, tenant_id, resource_id, starts_at, ends_at, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(self.tenant_id)
        .bind(request.resource_id)
        .bind(request.starts_at)
        .bind(request.ends_at)
        .bind(request.status.as_str())
        .bind(&request.notes)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(reservation)
    }

    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&self.tenant_id)), err)]
    pub async fn get_by_id(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE tenant_id = $1 AND id = $2")
            .bind(self.tenant_id)
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(reservation)
    }

    /// Fetch a reservation and hold its row lock until the transaction ends
    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&self.tenant_id)), err)]
    pub async fn get_for_update(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE tenant_id = $1 AND id = $2 FOR UPDATE")
            .bind(self.tenant_id)
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(reservation)
    }

    /// Active (pending or confirmed) reservations overlapping `[starts_at, ends_at)`
    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&self.tenant_id), resource_id = %abbrev_uuid(&resource_id)), err)]
    pub async fn active_overlapping(
        &mut self,
        resource_id: ResourceId,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE tenant_id = $1
              AND resource_id = $2
              AND status IN ('pending', 'confirmed')
              AND starts_at < $4
              AND ends_at > $3
            ORDER BY starts_at
            "#,
        )
        .bind(self.tenant_id)
        .bind(resource_id)
        .bind(starts_at)
        .bind(ends_at)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(reservations)
    }

    #[instrument(skip(self, filter), fields(tenant_id = %abbrev_uuid(&self.tenant_id), resource_id = %abbrev_uuid(&filter.resource_id)), err)]
    pub async fn list(&mut self, filter: &ReservationFilter) -> Result<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE tenant_id = $1
              AND resource_id = $2
              AND ($3::timestamptz IS NULL OR ends_at > $3)
              AND ($4::timestamptz IS NULL OR starts_at < $4)
              AND ($5 OR status <> 'cancelled')
            ORDER BY starts_at, created_at
            "#,
        )
        .bind(self.tenant_id)
        .bind(filter.resource_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.include_cancelled)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(reservations)
    }

    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&self.tenant_id), status = %status), err)]
    pub async fn update_status(&mut self, id: ReservationId, status: ReservationStatus) -> Result<Reservation> {
        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            UPDATE reservations
            SET status = $3, updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(self.tenant_id)
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(reservation)
    }
}
