use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::types::{ReservationId, ResourceId, TenantId};

/// Lifecycle of a reservation. Reservations are never deleted; cancellation is a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the reservation still occupies its interval
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    /// Allowed moves: pending -> confirmed, pending|confirmed -> cancelled.
    /// Staying in the same status is always allowed (idempotent transitions).
    pub fn can_transition_to(&self, to: ReservationStatus) -> bool {
        match (self, to) {
            (from, to) if *from == to => true,
            (ReservationStatus::Pending, ReservationStatus::Confirmed) => true,
            (ReservationStatus::Pending | ReservationStatus::Confirmed, ReservationStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ReservationStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(format!("unknown reservation status '{other}'")),
        }
    }
}

/// A claim on one resource for the half-open interval `[starts_at, ends_at)`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub tenant_id: TenantId,
    pub resource_id: ResourceId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: ReservationStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database request for creating a reservation
#[derive(Debug, Clone, Builder)]
pub struct NewReservation {
    pub tenant_id: TenantId,
    pub resource_id: ResourceId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[builder(default = ReservationStatus::Confirmed)]
    pub status: ReservationStatus,
    pub notes: Option<String>,
}
