//! Availability engine: admit or reject reservation requests.
//!
//! A request is admitted when no active (pending or confirmed) reservation of
//! the same resource overlaps it and the resource's weekly schedule covers all
//! of it. The check and the insert happen atomically inside the
//! [`ReservationStore`], so concurrent requests cannot double-book.
//!
//! Store commits run on spawned tasks. Dropping the caller's future (for
//! example when an upstream request times out) therefore never leaves a commit
//! half applied; the caller only loses the answer.
//!
//! Successful mutations invalidate the tenant's and the resource's cached
//! reads in the [`TieredCache`]. The invalidation runs on the same spawned task
//! as the commit, so a dropped caller cannot leave a stale answer cached.
//!
//! # Example
//!
//! ```ignore
//! let engine = AvailabilityEngine::new(Arc::new(store), cache);
//! match engine.reserve(tenant_id, resource_id, start, end, None).await? {
//!     ReserveOutcome::Confirmed(reservation) => println!("booked {}", reservation.id),
//!     ReserveOutcome::Rejected { reason } => println!("rejected: {reason}"),
//!     ReserveOutcome::Held(_) => unreachable!(),
//! }
//! ```

pub mod interval;
pub mod schedule;
pub mod store;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::cache::{CacheKey, TieredCache, resource_tag, tenant_tag};
use crate::db::models::availability_rules::{AvailabilityRule, RuleWindow};
use crate::db::models::reservations::{NewReservation, Reservation, ReservationStatus};
use crate::errors::{Error, Result};
use crate::types::{ReservationId, ResourceId, TenantId, abbrev_uuid};

pub use interval::{TimeInterval, overlaps};
pub use store::{AdmitOutcome, AvailabilitySnapshot, InMemoryReservationStore, PostgresReservationStore, RejectionReason, ReservationStore};

/// Result of a reservation request. A rejection is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReserveOutcome {
    /// Admitted with status `confirmed`
    Confirmed(Reservation),
    /// Admitted with status `pending`, awaiting [`AvailabilityEngine::confirm`]
    Held(Reservation),
    Rejected { reason: RejectionReason },
}

impl ReserveOutcome {
    pub fn reservation(&self) -> Option<&Reservation> {
        match self {
            ReserveOutcome::Confirmed(reservation) | ReserveOutcome::Held(reservation) => Some(reservation),
            ReserveOutcome::Rejected { .. } => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ReserveOutcome::Rejected { .. })
    }
}

pub struct AvailabilityEngine {
    store: Arc<dyn ReservationStore>,
    cache: Arc<TieredCache>,
}

impl AvailabilityEngine {
    pub fn new(store: Arc<dyn ReservationStore>, cache: Arc<TieredCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Whether `[start, end)` could be reserved right now. Reads the store directly.
    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&tenant_id), resource_id = %abbrev_uuid(&resource_id)), err)]
    pub async fn check_available(&self, tenant_id: TenantId, resource_id: ResourceId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        let interval = TimeInterval::new(start, end)?;
        let snapshot = self.store.snapshot(tenant_id, resource_id, interval).await?;
        Ok(snapshot.rejection(&interval).is_none())
    }

    /// [`check_available`](Self::check_available) through the cache.
    ///
    /// Cached under the tenant with tags `tenant:<id>`, `resource:<id>` and
    /// `availability`, so any mutation of the resource drops it.
    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&tenant_id), resource_id = %abbrev_uuid(&resource_id)), err)]
    pub async fn check_available_cached(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool> {
        let interval = TimeInterval::new(start, end)?;
        let key = match CacheKey::new(tenant_id, "check_available", &(resource_id, interval)) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Could not build cache key, reading through");
                return self.check_available(tenant_id, resource_id, start, end).await;
            }
        };

        let tags = [tenant_tag(tenant_id), resource_tag(resource_id), "availability".to_string()];
        self.cache
            .get_or_compute(&key, None, &tags, || self.check_available(tenant_id, resource_id, start, end))
            .await
    }

    /// Admit `[start, end)` as a confirmed reservation if it is free and inside the schedule.
    #[instrument(skip(self, notes), fields(tenant_id = %abbrev_uuid(&tenant_id), resource_id = %abbrev_uuid(&resource_id)), err)]
    pub async fn reserve(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<ReserveOutcome> {
        self.admit(tenant_id, resource_id, start, end, notes, ReservationStatus::Confirmed).await
    }

    /// Like [`reserve`](Self::reserve) but the reservation starts `pending`.
    ///
    /// A pending reservation blocks the interval exactly like a confirmed one.
    #[instrument(skip(self, notes), fields(tenant_id = %abbrev_uuid(&tenant_id), resource_id = %abbrev_uuid(&resource_id)), err)]
    pub async fn hold(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<ReserveOutcome> {
        self.admit(tenant_id, resource_id, start, end, notes, ReservationStatus::Pending).await
    }

    async fn admit(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        notes: Option<String>,
        status: ReservationStatus,
    ) -> Result<ReserveOutcome> {
        let interval = TimeInterval::new(start, end)?;

        let request = NewReservation::builder()
            .tenant_id(tenant_id)
            .resource_id(resource_id)
            .starts_at(start)
            .ends_at(end)
            .status(status)
            .maybe_notes(notes)
            .build();

        let (store, cache) = (Arc::clone(&self.store), Arc::clone(&self.cache));
        let outcome = detached("admit reservation", async move {
            let outcome = store.admit(request).await?;
            if matches!(outcome, AdmitOutcome::Admitted(_)) {
                invalidate_resource(&cache, tenant_id, resource_id);
            }
            Ok(outcome)
        })
        .await?;

        let outcome = match outcome {
            AdmitOutcome::Admitted(reservation) => {
                histogram!("spacectl_reservation_minutes").record(interval.duration().num_minutes() as f64);
                info!(reservation_id = %abbrev_uuid(&reservation.id), status = %reservation.status, "Reservation admitted");
                match reservation.status {
                    ReservationStatus::Pending => ReserveOutcome::Held(reservation),
                    _ => ReserveOutcome::Confirmed(reservation),
                }
            }
            AdmitOutcome::Rejected(reason) => {
                info!(%reason, "Reservation rejected");
                ReserveOutcome::Rejected { reason }
            }
        };

        let label = match &outcome {
            ReserveOutcome::Confirmed(_) => "confirmed",
            ReserveOutcome::Held(_) => "held",
            ReserveOutcome::Rejected { reason } => reason.as_str(),
        };
        counter!("spacectl_reservations_total", "outcome" => label).increment(1);
        Ok(outcome)
    }

    /// Move a held reservation to `confirmed`. Confirming twice is a no-op;
    /// confirming a cancelled reservation fails.
    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&tenant_id), reservation_id = %abbrev_uuid(&reservation_id)), err)]
    pub async fn confirm(&self, tenant_id: TenantId, reservation_id: ReservationId) -> Result<Reservation> {
        let reservation = self
            .transition(tenant_id, reservation_id, ReservationStatus::Confirmed)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: "Reservation".to_string(),
                id: reservation_id.to_string(),
            })?;
        Ok(reservation)
    }

    /// Cancel a reservation, freeing its interval.
    ///
    /// Returns `false` for an id unknown to the tenant. Cancelling twice returns `true`.
    #[instrument(skip(self), fields(tenant_id = %abbrev_uuid(&tenant_id), reservation_id = %abbrev_uuid(&reservation_id)), err)]
    pub async fn cancel(&self, tenant_id: TenantId, reservation_id: ReservationId) -> Result<bool> {
        let cancelled = self
            .transition(tenant_id, reservation_id, ReservationStatus::Cancelled)
            .await?
            .is_some();
        Ok(cancelled)
    }

    async fn transition(&self, tenant_id: TenantId, reservation_id: ReservationId, to: ReservationStatus) -> Result<Option<Reservation>> {
        let (store, cache) = (Arc::clone(&self.store), Arc::clone(&self.cache));
        let updated = detached("update reservation status", async move {
            let updated = store.set_status(tenant_id, reservation_id, to).await?;
            if let Some(reservation) = &updated {
                invalidate_resource(&cache, tenant_id, reservation.resource_id);
            }
            Ok(updated)
        })
        .await?;

        if updated.is_some() {
            counter!("spacectl_reservation_transitions_total", "to" => to.as_str()).increment(1);
        }
        Ok(updated)
    }

    /// Replace the resource's weekly schedule with `rules`.
    ///
    /// Every window is validated before anything is written, and the
    /// replacement is atomic.
    #[instrument(skip(self, rules), fields(tenant_id = %abbrev_uuid(&tenant_id), resource_id = %abbrev_uuid(&resource_id), count = rules.len()), err)]
    pub async fn bulk_create_slots(&self, tenant_id: TenantId, resource_id: ResourceId, rules: &[RuleWindow]) -> Result<Vec<AvailabilityRule>> {
        schedule::validate_windows(rules)?;

        let (store, cache) = (Arc::clone(&self.store), Arc::clone(&self.cache));
        let windows = rules.to_vec();
        detached("replace availability rules", async move {
            let created = store.replace_rules(tenant_id, resource_id, &windows).await?;
            invalidate_resource(&cache, tenant_id, resource_id);
            Ok(created)
        })
        .await
    }

    pub async fn rules(&self, tenant_id: TenantId, resource_id: ResourceId) -> Result<Vec<AvailabilityRule>> {
        self.store.rules(tenant_id, resource_id).await
    }

    pub async fn get_reservation(&self, tenant_id: TenantId, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        self.store.get(tenant_id, reservation_id).await
    }

    /// Active reservations of a resource touching `[from, to)`, ordered by start
    pub async fn list_reservations(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reservation>> {
        self.store.list(tenant_id, resource_id, from, to).await
    }
}

fn invalidate_resource(cache: &TieredCache, tenant_id: TenantId, resource_id: ResourceId) {
    cache.invalidate(None, &[tenant_tag(tenant_id), resource_tag(resource_id)]);
}

/// Run a store mutation on its own task so it completes even if the caller goes away
async fn detached<T, F>(operation: &str, commit: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(commit).await.map_err(|e| {
        warn!(error = %e, operation, "Store task failed");
        Error::Internal {
            operation: operation.to_string(),
        }
    })?
}
