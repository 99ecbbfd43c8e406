//! Test utilities shared by the Postgres-backed tests
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgConnectOptions;

use crate::config::{PoolSettings, PoolsConfig};
use crate::db::handlers::Tenants;
use crate::db::models::tenants::{Tenant, TenantCreateDBRequest};
use crate::db::pools::TenantPools;

/// Small pools with short timeouts so exhaustion tests finish quickly
pub fn test_pools_config() -> PoolsConfig {
    let settings = |max_connections| PoolSettings {
        max_connections,
        min_connections: 0,
        acquire_timeout_secs: 5,
        idle_timeout_secs: 60,
        max_lifetime_secs: 300,
    };
    PoolsConfig {
        interactive: settings(4),
        reporting: settings(2),
        background: settings(2),
    }
}

pub async fn test_pools(connect_opts: PgConnectOptions) -> TenantPools {
    TenantPools::connect_with_options(connect_opts, &test_pools_config(), Duration::from_secs(1))
        .await
        .expect("Failed to create test pools")
}

pub async fn create_test_tenant(pool: &PgPool, subdomain: &str) -> Tenant {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Tenants::new(&mut conn)
        .create(&TenantCreateDBRequest {
            subdomain: subdomain.to_string(),
            name: format!("{subdomain} test tenant"),
        })
        .await
        .expect("Failed to create test tenant")
}

/// Parse an RFC 3339 timestamp
pub fn at(timestamp: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(timestamp)
        .expect("Invalid test timestamp")
        .with_timezone(&Utc)
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("Invalid test time")
}
