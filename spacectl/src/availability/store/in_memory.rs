//! In-memory reservation store.
//!
//! Admissions for one `(tenant, resource)` pair are serialised by an async
//! mutex held across the check and the insert. A pair's mutex is dropped from
//! the lock table once no admission holds or waits on it. Suitable for single-process
//! deployments and tests; nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{AdmitOutcome, AvailabilitySnapshot, ReservationStore};
use crate::availability::interval::{TimeInterval, overlaps};
use crate::db::models::availability_rules::{AvailabilityRule, RuleWindow};
use crate::db::models::reservations::{NewReservation, Reservation, ReservationStatus};
use crate::errors::{Error, Result};
use crate::types::{ReservationId, ResourceId, TenantId};

type ResourceKey = (TenantId, ResourceId);

#[derive(Debug, Default)]
pub struct InMemoryReservationStore {
    locks: DashMap<ResourceKey, Arc<tokio::sync::Mutex<()>>>,
    reservations: RwLock<HashMap<ReservationId, Reservation>>,
    rules: RwLock<HashMap<ResourceKey, Vec<AvailabilityRule>>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn resource_lock(&self, key: ResourceKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(key).or_default().clone()
    }

    /// Drop the pair's mutex if the table holds the last reference.
    ///
    /// Cloning a lock out of the table takes the same shard lock as this
    /// check, so nobody can pick the mutex up while it is being removed.
    fn release_lock(&self, key: &ResourceKey) {
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn admit_locked(&self, key: &ResourceKey, interval: &TimeInterval, request: NewReservation) -> AdmitOutcome {
        let snapshot = AvailabilitySnapshot {
            rules: self.windows(key),
            conflicts: self.active_overlapping(key, interval),
        };
        if let Some(reason) = snapshot.rejection(interval) {
            return AdmitOutcome::Rejected(reason);
        }

        let now = Utc::now();
        let reservation = Reservation {
            id: Uuid::new_v4(),
            tenant_id: request.tenant_id,
            resource_id: request.resource_id,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            status: request.status,
            notes: request.notes,
            created_at: now,
            updated_at: now,
        };
        self.reservations.write().insert(reservation.id, reservation.clone());
        AdmitOutcome::Admitted(reservation)
    }

    fn windows(&self, key: &ResourceKey) -> Vec<RuleWindow> {
        self.rules
            .read()
            .get(key)
            .map(|rules| rules.iter().map(AvailabilityRule::window).collect())
            .unwrap_or_default()
    }

    fn active_overlapping(&self, key: &ResourceKey, interval: &TimeInterval) -> Vec<Reservation> {
        let mut conflicts: Vec<Reservation> = self
            .reservations
            .read()
            .values()
            .filter(|r| (r.tenant_id, r.resource_id) == *key)
            .filter(|r| r.status.is_active() && overlaps(r.starts_at, r.ends_at, interval.start(), interval.end()))
            .cloned()
            .collect();
        conflicts.sort_by_key(|r| r.starts_at);
        conflicts
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn snapshot(&self, tenant_id: TenantId, resource_id: ResourceId, interval: TimeInterval) -> Result<AvailabilitySnapshot> {
        let key = (tenant_id, resource_id);
        Ok(AvailabilitySnapshot {
            rules: self.windows(&key),
            conflicts: self.active_overlapping(&key, &interval),
        })
    }

    async fn admit(&self, request: NewReservation) -> Result<AdmitOutcome> {
        let interval = TimeInterval::new(request.starts_at, request.ends_at)?;
        let key = (request.tenant_id, request.resource_id);

        let lock = self.resource_lock(key);
        let outcome = {
            let _guard = lock.lock().await;
            self.admit_locked(&key, &interval, request)
        };
        drop(lock);
        self.release_lock(&key);
        Ok(outcome)
    }

    async fn get(&self, tenant_id: TenantId, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.reservations.read().get(&id).filter(|r| r.tenant_id == tenant_id).cloned())
    }

    async fn list(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reservation>> {
        let mut listed: Vec<Reservation> = self
            .reservations
            .read()
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.resource_id == resource_id)
            .filter(|r| r.status != ReservationStatus::Cancelled)
            .filter(|r| from.is_none_or(|from| r.ends_at > from) && to.is_none_or(|to| r.starts_at < to))
            .cloned()
            .collect();
        listed.sort_by_key(|r| (r.starts_at, r.created_at));
        Ok(listed)
    }

    async fn set_status(&self, tenant_id: TenantId, id: ReservationId, to: ReservationStatus) -> Result<Option<Reservation>> {
        let mut reservations = self.reservations.write();
        let Some(reservation) = reservations.get_mut(&id).filter(|r| r.tenant_id == tenant_id) else {
            return Ok(None);
        };
        if reservation.status == to {
            return Ok(Some(reservation.clone()));
        }
        if !reservation.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                reservation_id: id,
                from: reservation.status,
                to,
            });
        }

        reservation.status = to;
        reservation.updated_at = Utc::now();
        Ok(Some(reservation.clone()))
    }

    async fn replace_rules(&self, tenant_id: TenantId, resource_id: ResourceId, windows: &[RuleWindow]) -> Result<Vec<AvailabilityRule>> {
        let now = Utc::now();
        let rules: Vec<AvailabilityRule> = windows
            .iter()
            .map(|window| AvailabilityRule {
                id: Uuid::new_v4(),
                tenant_id,
                resource_id,
                day_of_week: window.day_of_week as i16,
                start_time: window.start,
                end_time: window.end,
                is_active: window.active,
                created_at: now,
            })
            .collect();

        // One write-lock swap, so readers see the old set or the new one
        self.rules.write().insert((tenant_id, resource_id), rules.clone());
        Ok(rules)
    }

    async fn rules(&self, tenant_id: TenantId, resource_id: ResourceId) -> Result<Vec<AvailabilityRule>> {
        let mut rules = self.rules.read().get(&(tenant_id, resource_id)).cloned().unwrap_or_default();
        rules.sort_by_key(|rule| (rule.day_of_week, rule.start_time));
        Ok(rules)
    }
}
