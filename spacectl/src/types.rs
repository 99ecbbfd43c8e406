//! Common type definitions shared by the pools, the availability engine and the cache.
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases for readability:
//!
//! - [`TenantId`]: Isolated customer account
//! - [`ResourceId`]: Bookable entity (room, desk, staff slot) scoped to a tenant
//! - [`ReservationId`]: A single reservation record
//! - [`AvailabilityRuleId`]: A recurring weekly availability window
//!
//! # Pool classes
//!
//! [`PoolClass`] selects one of the three process-wide connection pools.
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// Type aliases for IDs
pub type TenantId = Uuid;
pub type ResourceId = Uuid;
pub type ReservationId = Uuid;
pub type AvailabilityRuleId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Connection pool selector.
///
/// Pools are sized and timed for their workload, never per tenant: tenant
/// isolation is applied per acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolClass {
    /// Request-path operations: short timeout, small-to-medium pool
    Interactive,
    /// Aggregate/analytics reads: longer timeout, smaller pool
    Reporting,
    /// Maintenance and batch jobs: longest timeout, smallest pool
    Background,
}

impl PoolClass {
    pub const ALL: [PoolClass; 3] = [PoolClass::Interactive, PoolClass::Reporting, PoolClass::Background];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolClass::Interactive => "interactive",
            PoolClass::Reporting => "reporting",
            PoolClass::Background => "background",
        }
    }
}

impl fmt::Display for PoolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }

    #[test]
    fn test_pool_class_serde_names() {
        let class: PoolClass = serde_json::from_str("\"reporting\"").unwrap();
        assert_eq!(class, PoolClass::Reporting);
        assert_eq!(serde_json::to_string(&PoolClass::Background).unwrap(), "\"background\"");
        assert_eq!(PoolClass::Interactive.to_string(), "interactive");
    }
}
