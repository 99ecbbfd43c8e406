//! PostgreSQL-backed reservation store.
//!
//! Admission runs in one transaction on a tenant-scoped session: a
//! transaction-level advisory lock on the resource serialises concurrent
//! admissions, then the schedule and overlaps are re-read before the insert.
//! The `reservations_no_overlap` exclusion constraint backs this up; a
//! violation (SQLSTATE `23P01`) is reported as [`RejectionReason::SlotTaken`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{AdmitOutcome, AvailabilitySnapshot, RejectionReason, ReservationStore};
use crate::availability::interval::TimeInterval;
use crate::db::handlers::reservations::ReservationFilter;
use crate::db::models::availability_rules::{AvailabilityRule, RuleWindow};
use crate::db::models::reservations::{NewReservation, Reservation, ReservationStatus};
use crate::db::pools::TenantPools;
use crate::errors::{Error, Result};
use crate::types::{PoolClass, ReservationId, ResourceId, TenantId, abbrev_uuid};

#[derive(Debug, Clone)]
pub struct PostgresReservationStore {
    pools: TenantPools,
}

impl PostgresReservationStore {
    pub fn new(pools: TenantPools) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl ReservationStore for PostgresReservationStore {
    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&tenant_id), resource_id = %abbrev_uuid(&resource_id)), err)]
    async fn snapshot(&self, tenant_id: TenantId, resource_id: ResourceId, interval: TimeInterval) -> Result<AvailabilitySnapshot> {
        let mut session = self.pools.acquire(PoolClass::Interactive, tenant_id).await?;
        let rules = session.availability_rules().list_for_resource(resource_id).await?;
        let conflicts = session
            .reservations()
            .active_overlapping(resource_id, interval.start(), interval.end())
            .await?;

        Ok(AvailabilitySnapshot {
            rules: rules.iter().map(AvailabilityRule::window).collect(),
            conflicts,
        })
    }

    #[instrument(skip(self, request), fields(tenant_id = %abbrev_uuid(&request.tenant_id), resource_id = %abbrev_uuid(&request.resource_id)), err)]
    async fn admit(&self, request: NewReservation) -> Result<AdmitOutcome> {
        let interval = TimeInterval::new(request.starts_at, request.ends_at)?;

        let mut session = self.pools.acquire(PoolClass::Interactive, request.tenant_id).await?;
        let mut tx = session.begin().await?;
        tx.reservations().lock_resource(request.resource_id).await?;

        let rules = tx.availability_rules().list_for_resource(request.resource_id).await?;
        let conflicts = tx
            .reservations()
            .active_overlapping(request.resource_id, interval.start(), interval.end())
            .await?;
        let snapshot = AvailabilitySnapshot {
            rules: rules.iter().map(AvailabilityRule::window).collect(),
            conflicts,
        };

        if let Some(reason) = snapshot.rejection(&interval) {
            tx.rollback().await?;
            return Ok(AdmitOutcome::Rejected(reason));
        }

        match tx.reservations().create(&request).await {
            Ok(reservation) => {
                tx.commit().await?;
                Ok(AdmitOutcome::Admitted(reservation))
            }
            Err(e) if e.is_exclusion_violation() => {
                debug!("Overlap caught by exclusion constraint");
                Ok(AdmitOutcome::Rejected(RejectionReason::SlotTaken))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&tenant_id)), err)]
    async fn get(&self, tenant_id: TenantId, id: ReservationId) -> Result<Option<Reservation>> {
        let mut session = self.pools.acquire(PoolClass::Interactive, tenant_id).await?;
        Ok(session.reservations().get_by_id(id).await?)
    }

    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&tenant_id), resource_id = %abbrev_uuid(&resource_id)), err)]
    async fn list(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reservation>> {
        let filter = ReservationFilter {
            from,
            to,
            ..ReservationFilter::new(resource_id)
        };
        let mut session = self.pools.acquire(PoolClass::Reporting, tenant_id).await?;
        Ok(session.reservations().list(&filter).await?)
    }

    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&tenant_id), to = %to), err)]
    async fn set_status(&self, tenant_id: TenantId, id: ReservationId, to: ReservationStatus) -> Result<Option<Reservation>> {
        let mut session = self.pools.acquire(PoolClass::Interactive, tenant_id).await?;
        let mut tx = session.begin().await?;

        let Some(current) = tx.reservations().get_for_update(id).await? else {
            return Ok(None);
        };
        if current.status == to {
            return Ok(Some(current));
        }
        if !current.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                reservation_id: id,
                from: current.status,
                to,
            });
        }

        let updated = tx.reservations().update_status(id, to).await?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    #[instrument(skip(self, windows), fields(tenant_id = %abbrev_uuid(&tenant_id), resource_id = %abbrev_uuid(&resource_id), count = windows.len()), err)]
    async fn replace_rules(&self, tenant_id: TenantId, resource_id: ResourceId, windows: &[RuleWindow]) -> Result<Vec<AvailabilityRule>> {
        let mut session = self.pools.acquire(PoolClass::Interactive, tenant_id).await?;
        let mut tx = session.begin().await?;
        let rules = tx.availability_rules().replace_for_resource(resource_id, windows).await?;
        tx.commit().await?;
        Ok(rules)
    }

    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&tenant_id), resource_id = %abbrev_uuid(&resource_id)), err)]
    async fn rules(&self, tenant_id: TenantId, resource_id: ResourceId) -> Result<Vec<AvailabilityRule>> {
        let mut session = self.pools.acquire(PoolClass::Interactive, tenant_id).await?;
        Ok(session.availability_rules().list_for_resource(resource_id).await?)
    }
}
