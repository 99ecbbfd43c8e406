//! Database record models matching table schemas.
//!
//! - [`reservations`]: Reservations and their status lifecycle
//! - [`availability_rules`]: Recurring weekly availability windows
//! - [`tenants`]: Tenant accounts (tenant-agnostic table)
//!
//! Models derive `sqlx::FromRow` and are read with runtime-checked queries.

pub mod availability_rules;
pub mod reservations;
pub mod tenants;
