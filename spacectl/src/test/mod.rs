pub mod utils;

use std::sync::Arc;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection};
use uuid::Uuid;

use crate::availability::{AvailabilityEngine, PostgresReservationStore, RejectionReason, ReserveOutcome};
use crate::cache::TieredCache;
use crate::config::{CacheConfig, TenantDirectoryConfig};
use crate::db::models::availability_rules::RuleWindow;
use crate::tenants::TenantDirectory;
use crate::types::PoolClass;
use utils::{at, hm, test_pools};

/// Full journey across the layers: register a tenant, resolve it by subdomain,
/// publish a schedule, then book against it with the cached availability check
/// staying consistent with every mutation.
#[sqlx::test]
#[test_log::test]
async fn test_e2e_tenant_booking_journey(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
    let pools = test_pools(connect_opts).await;
    let directory = TenantDirectory::new(pools.clone(), &TenantDirectoryConfig::default());
    let cache = Arc::new(TieredCache::new(&CacheConfig::default()));
    let engine = AvailabilityEngine::new(Arc::new(PostgresReservationStore::new(pools.clone())), Arc::clone(&cache));

    directory.register("harbour-studios", "Harbour Studios").await.unwrap();
    let tenant = directory.resolve_subdomain("Harbour-Studios").await.unwrap().unwrap();
    let room = Uuid::new_v4();

    // Weekdays 09:00-17:00, Saturday until midnight
    let mut windows: Vec<RuleWindow> = (0..5).map(|day| RuleWindow::new(day, hm(9, 0), hm(17, 0))).collect();
    windows.push(RuleWindow::new(5, hm(18, 0), hm(0, 0)));
    engine.bulk_create_slots(tenant.id, room, &windows).await.unwrap();

    let (start, end) = (at("2024-01-03T14:00:00Z"), at("2024-01-03T15:00:00Z"));
    assert!(engine.check_available_cached(tenant.id, room, start, end).await.unwrap());
    assert!(cache.stats().tiers.iter().any(|tier| tier.entries > 0));

    let held = engine.hold(tenant.id, room, start, end, Some("offsite".to_string())).await.unwrap();
    let ReserveOutcome::Held(reservation) = held else {
        panic!("expected a hold, got {held:?}");
    };
    // The hold dropped the cached "available" answer
    assert!(!engine.check_available_cached(tenant.id, room, start, end).await.unwrap());

    let rival = engine
        .reserve(tenant.id, room, at("2024-01-03T14:30:00Z"), at("2024-01-03T16:00:00Z"), None)
        .await
        .unwrap();
    assert_eq!(
        rival,
        ReserveOutcome::Rejected {
            reason: RejectionReason::SlotTaken
        }
    );

    let confirmed = engine.confirm(tenant.id, reservation.id).await.unwrap();
    assert_eq!(confirmed.notes.as_deref(), Some("offsite"));
    assert!(engine.cancel(tenant.id, reservation.id).await.unwrap());
    assert!(engine.check_available_cached(tenant.id, room, start, end).await.unwrap());

    // Saturday evening runs to midnight
    let late = engine
        .reserve(tenant.id, room, at("2024-01-06T22:00:00Z"), at("2024-01-07T00:00:00Z"), None)
        .await
        .unwrap();
    assert!(matches!(late, ReserveOutcome::Confirmed(_)));
    let past_midnight = engine
        .reserve(tenant.id, room, at("2024-01-06T23:00:00Z"), at("2024-01-07T01:00:00Z"), None)
        .await
        .unwrap();
    assert!(late.reservation().is_some());
    assert!(past_midnight.is_rejected());

    pools.close().await;
}

/// Row-level security is checked as an unprivileged role, since the test
/// user is normally a superuser and bypasses policies.
#[sqlx::test]
#[test_log::test]
async fn test_row_level_security_hides_other_tenants(_pool_opts: PgPoolOptions, connect_opts: PgConnectOptions) {
    let pools = test_pools(connect_opts.clone()).await;
    let directory = TenantDirectory::new(pools.clone(), &TenantDirectoryConfig::default());
    let cache = Arc::new(TieredCache::new(&CacheConfig::default()));
    let engine = AvailabilityEngine::new(Arc::new(PostgresReservationStore::new(pools.clone())), cache);

    let acme = directory.register("acme", "Acme").await.unwrap();
    let globex = directory.register("globex", "Globex").await.unwrap();
    let resource = Uuid::new_v4();
    for tenant in [&acme, &globex] {
        engine
            .bulk_create_slots(tenant.id, resource, &[RuleWindow::new(0, hm(9, 0), hm(17, 0))])
            .await
            .unwrap();
        let outcome = engine
            .reserve(tenant.id, resource, at("2024-01-01T10:00:00Z"), at("2024-01-01T11:00:00Z"), None)
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Confirmed(_)));
    }

    let mut conn = PgConnection::connect_with(&connect_opts).await.unwrap();
    sqlx::query(
        "DO $$ BEGIN CREATE ROLE spacectl_rls_probe NOLOGIN; EXCEPTION WHEN duplicate_object OR unique_violation THEN NULL; END $$",
    )
    .execute(&mut conn)
    .await
    .unwrap();
    sqlx::query("GRANT SELECT ON reservations, availability_rules TO spacectl_rls_probe")
        .execute(&mut conn)
        .await
        .unwrap();

    let mut tx = conn.begin().await.unwrap();
    sqlx::query("SET LOCAL ROLE spacectl_rls_probe").execute(&mut *tx).await.unwrap();

    let count_visible = "SELECT COUNT(*) FROM reservations";
    let unscoped: i64 = sqlx::query_scalar(count_visible).fetch_one(&mut *tx).await.unwrap();
    assert_eq!(unscoped, 0, "no tenant context must see nothing");

    sqlx::query("SELECT set_config('app.current_tenant', $1, true)")
        .bind(acme.id.to_string())
        .execute(&mut *tx)
        .await
        .unwrap();
    let tenant_ids: Vec<Uuid> = sqlx::query_scalar("SELECT tenant_id FROM reservations")
        .fetch_all(&mut *tx)
        .await
        .unwrap();
    assert_eq!(tenant_ids, vec![acme.id]);

    let rules: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM availability_rules")
        .fetch_one(&mut *tx)
        .await
        .unwrap();
    assert_eq!(rules, 1);
    tx.rollback().await.unwrap();

    // Pooled connections come back without a tenant context
    let mut session = pools.acquire_untenanted(PoolClass::Interactive).await.unwrap();
    assert_eq!(session.current_context().await.unwrap(), None);
}
