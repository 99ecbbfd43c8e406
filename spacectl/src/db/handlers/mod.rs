//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection` and exposes strongly-typed
//! operations returning models from [`crate::db::models`].
//!
//! - [`Reservations`]: tenant-owned reservations
//! - [`AvailabilityRules`]: tenant-owned weekly availability windows
//! - [`Tenants`]: the tenant directory table
//!
//! Tenant-owned repositories are constructed by
//! [`TenantSession`](crate::db::pools::TenantSession) and
//! [`TenantTransaction`](crate::db::pools::TenantTransaction), which bind
//! them to the session's tenant:
//!
//! ```ignore
//! let mut session = pools.acquire(PoolClass::Interactive, tenant_id).await?;
//! let mut tx = session.begin().await?;
//! let rules = tx.availability_rules().list_for_resource(resource_id).await?;
//! tx.commit().await?;
//! ```

pub mod availability_rules;
pub mod reservations;
pub mod tenants;

pub use availability_rules::AvailabilityRules;
pub use reservations::Reservations;
pub use tenants::Tenants;
