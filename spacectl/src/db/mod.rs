//! Database layer: tenant-scoped connection pools, repositories and models.
//!
//! ```text
//! ┌──────────────────┐
//! │ AvailabilityEngine│  (availability)
//! └────────┬─────────┘
//!          ↓
//! ┌──────────────────┐
//! │   TenantPools    │  (db::pools - sessions stamped with app.current_tenant)
//! └────────┬─────────┘
//!          ↓
//! ┌──────────────────┐
//! │   Repositories   │  (db::handlers)
//! └────────┬─────────┘
//!          ↓
//! ┌──────────────────┐
//! │    PostgreSQL    │  (row-level security on tenant-owned tables)
//! └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`pools`]: the three process-wide pools and scoped acquisition
//! - [`handlers`]: repositories for reservations, availability rules and tenants
//! - [`models`]: database records
//! - [`errors`]: database-specific error types
//!
//! # Migrations
//!
//! Migrations live in `migrations/` and are embedded through [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
pub mod pools;
