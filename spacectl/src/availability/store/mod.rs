//! Persistence for reservations and availability rules.
//!
//! [`ReservationStore`] is the seam between the availability engine and its
//! backing store. Every mutating operation is atomic with respect to the
//! no-double-booking invariant: two concurrent [`admit`](ReservationStore::admit)
//! calls for overlapping intervals on the same resource can never both succeed.
//!
//! - [`PostgresReservationStore`]: production store over tenant-scoped sessions
//! - [`InMemoryReservationStore`]: single-process store with per-resource locks

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::interval::TimeInterval;
use super::schedule;
use crate::db::models::availability_rules::{AvailabilityRule, RuleWindow};
use crate::db::models::reservations::{NewReservation, Reservation, ReservationStatus};
use crate::errors::Result;
use crate::types::{ReservationId, ResourceId, TenantId};

pub use in_memory::InMemoryReservationStore;
pub use postgres::PostgresReservationStore;

/// Why a reservation request was turned down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// An active reservation already overlaps the interval
    SlotTaken,
    /// Part of the interval falls outside the resource's weekly schedule
    OutsideAvailability,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::SlotTaken => "slot_taken",
            RejectionReason::OutsideAvailability => "outside_availability",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the store knows about one interval of one resource
#[derive(Debug, Clone, Default)]
pub struct AvailabilitySnapshot {
    /// Every rule for the resource, active or not
    pub rules: Vec<RuleWindow>,
    /// Active reservations overlapping the interval
    pub conflicts: Vec<Reservation>,
}

impl AvailabilitySnapshot {
    /// The reason `interval` cannot be booked, if any.
    ///
    /// Overlaps are reported before schedule gaps.
    pub fn rejection(&self, interval: &TimeInterval) -> Option<RejectionReason> {
        let taken = self.conflicts.iter().any(|reservation| {
            reservation.status.is_active()
                && super::interval::overlaps(reservation.starts_at, reservation.ends_at, interval.start(), interval.end())
        });
        if taken {
            return Some(RejectionReason::SlotTaken);
        }
        if !schedule::covers(&self.rules, interval) {
            return Some(RejectionReason::OutsideAvailability);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted(Reservation),
    Rejected(RejectionReason),
}

#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    /// Rules and overlapping active reservations for `interval`
    async fn snapshot(&self, tenant_id: TenantId, resource_id: ResourceId, interval: TimeInterval) -> Result<AvailabilitySnapshot>;

    /// Atomically re-check the schedule and overlaps, then insert.
    async fn admit(&self, request: NewReservation) -> Result<AdmitOutcome>;

    async fn get(&self, tenant_id: TenantId, id: ReservationId) -> Result<Option<Reservation>>;

    /// Reservations of a resource touching `[from, to)`, cancelled ones excluded
    async fn list(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        from: Option<chrono::DateTime<chrono::Utc>>,
        to: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<Reservation>>;

    /// Move a reservation to `to`. `Ok(None)` when the id is unknown for the tenant.
    ///
    /// Transitions to the current status succeed without writing; disallowed
    /// transitions fail with [`Error::InvalidTransition`](crate::errors::Error::InvalidTransition).
    async fn set_status(&self, tenant_id: TenantId, id: ReservationId, to: ReservationStatus) -> Result<Option<Reservation>>;

    /// Replace every rule of a resource in one atomic step
    async fn replace_rules(&self, tenant_id: TenantId, resource_id: ResourceId, windows: &[RuleWindow]) -> Result<Vec<AvailabilityRule>>;

    async fn rules(&self, tenant_id: TenantId, resource_id: ResourceId) -> Result<Vec<AvailabilityRule>>;
}
