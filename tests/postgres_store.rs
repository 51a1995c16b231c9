//! `PgStore` against a live database. Run with
//! `DATABASE_URL=postgres://... cargo test --test postgres_store -- --ignored`.

#![cfg(feature = "postgres")]

mod common;

use std::sync::Arc;

use common::*;
use navette_core::config::DatabaseConfig;
use navette_core::events::EventPublisher;
use navette_core::jobs::JobState;
use navette_core::models::{ItemStatus, NewServiceRequestItem};
use navette_core::service::FicheNavetteService;
use navette_core::store::{PgStore, Store, StoreTransaction};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS fiche_navettes (
  fiche_navette_id BIGSERIAL PRIMARY KEY,
  patient_id BIGINT NOT NULL,
  total_amount NUMERIC(12, 2) NOT NULL DEFAULT 0,
  created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS fiche_navette_items (
  item_id BIGSERIAL PRIMARY KEY,
  fiche_navette_id BIGINT NOT NULL REFERENCES fiche_navettes,
  prestation_id BIGINT,
  package_id BIGINT,
  doctor_id BIGINT,
  final_price NUMERIC(12, 2) NOT NULL,
  status TEXT NOT NULL DEFAULT 'pending',
  created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
  deleted_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS prestation_packages (
  package_id BIGSERIAL PRIMARY KEY,
  name TEXT NOT NULL,
  price NUMERIC(12, 2) NOT NULL,
  is_active BOOLEAN NOT NULL DEFAULT true
);
CREATE TABLE IF NOT EXISTS prestation_package_items (
  package_id BIGINT NOT NULL REFERENCES prestation_packages,
  prestation_id BIGINT NOT NULL
);
"#;

async fn connect() -> PgStore {
    let config = DatabaseConfig {
        url: Some("${DATABASE_URL}".to_string()),
        ..DatabaseConfig::default()
    };
    let store = PgStore::connect(&config).await.expect("connect to DATABASE_URL");
    sqlx::raw_sql(SCHEMA)
        .execute(store.pool())
        .await
        .expect("create schema");
    store
}

/// Leave a single active package requiring `prestation_ids`
async fn only_package(store: &PgStore, prestation_ids: &[i64], cents: i64) -> i64 {
    sqlx::query("UPDATE prestation_packages SET is_active = false")
        .execute(store.pool())
        .await
        .unwrap();
    let package_id: i64 = sqlx::query_scalar(
        "INSERT INTO prestation_packages (name, price) VALUES ($1, $2) RETURNING package_id",
    )
    .bind("Bilan")
    .bind(money(cents))
    .fetch_one(store.pool())
    .await
    .unwrap();
    for prestation_id in prestation_ids {
        sqlx::query("INSERT INTO prestation_package_items (package_id, prestation_id) VALUES ($1, $2)")
            .bind(package_id)
            .bind(*prestation_id)
            .execute(store.pool())
            .await
            .unwrap();
    }
    package_id
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_items_round_trip_and_soft_delete() {
    let store = connect().await;
    let request = store.create_request(42).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let locked = tx.lock_request(request.fiche_navette_id).await.unwrap();
    assert_eq!(locked.unwrap().patient_id, 42);
    let first = tx
        .insert_item(
            request.fiche_navette_id,
            &NewServiceRequestItem::prestation(1, Some(7), money(1000)),
        )
        .await
        .unwrap();
    tx.insert_item(
        request.fiche_navette_id,
        &NewServiceRequestItem::prestation(2, Some(7), money(800)),
    )
    .await
    .unwrap();
    tx.update_total(request.fiche_navette_id, money(1800)).await.unwrap();
    tx.commit().await.unwrap();

    let snapshot = store
        .load_snapshot(request.fiche_navette_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.items.len(), 2);
    assert_eq!(snapshot.request.total_amount, money(1800));
    assert_eq!(snapshot.item(first.item_id).unwrap().status, ItemStatus::Pending);

    let mut tx = store.begin().await.unwrap();
    let deleted = tx
        .delete_items(request.fiche_navette_id, &[first.item_id])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    tx.rollback().await.unwrap();

    let snapshot = store
        .load_snapshot(request.fiche_navette_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.items.len(), 2);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_conversion_end_to_end_on_postgres() {
    let store = connect().await;
    let package_id = only_package(&store, &[1, 2], 1500).await;

    let config = test_config();
    let events = EventPublisher::new(config.events.channel_capacity);
    let service = FicheNavetteService::new(Arc::new(store.clone()), &config, events);

    let fiche_id = service.create_request(1).await.unwrap().fiche_navette_id;
    let added = service
        .add_items(
            fiche_id,
            vec![prestation(1, Some(7), 1000), prestation(2, Some(7), 800)],
        )
        .await
        .unwrap();
    let status = service
        .runner()
        .wait_for_terminal(added.conversion_job.unwrap(), JOB_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(status.state, JobState::Succeeded);

    let snapshot = service.snapshot(fiche_id).await.unwrap();
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.items[0].package_id, Some(package_id));
    assert_eq!(snapshot.request.total_amount, money(1500));

    service.shutdown().await;
}
