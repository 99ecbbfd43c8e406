//! Database models for tenants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::TenantId;

/// An isolated customer account, addressed by its subdomain
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub subdomain: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Database request for registering a tenant
#[derive(Debug, Clone)]
pub struct TenantCreateDBRequest {
    pub subdomain: String,
    pub name: String,
}
