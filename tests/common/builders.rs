//! Builders and helpers shared by the integration tests.

#![allow(dead_code)] // Not every test binary uses every helper

use std::sync::Arc;
use std::time::Duration;

use navette_core::config::NavetteConfig;
use navette_core::events::{EventPublisher, PublishedEvent};
use navette_core::jobs::{JobId, JobStatus};
use navette_core::models::{NewServiceRequestItem, PrestationPackage, ServiceRequestItem};
use navette_core::service::FicheNavetteService;
use navette_core::store::{InMemoryStore, Store, StoreTransaction};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

pub const JOB_TIMEOUT: Duration = Duration::from_secs(5);

pub fn money(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

pub fn package(package_id: i64, name: &str, prestation_ids: &[i64], cents: i64) -> PrestationPackage {
    PrestationPackage {
        package_id,
        name: name.to_string(),
        price: money(cents),
        prestation_ids: prestation_ids.to_vec(),
    }
}

/// Configuration with millisecond backoff so retry tests stay fast
pub fn test_config() -> NavetteConfig {
    let mut config = NavetteConfig::default();
    config.jobs.backoff_ms = vec![5, 10];
    config.jobs.worker_count = 2;
    config.jobs.queue_capacity = 64;
    config.events.channel_capacity = 256;
    config
}

/// In-memory store plus a running service on top of it
pub struct Harness {
    pub store: InMemoryStore,
    pub service: FicheNavetteService,
    pub events: EventPublisher,
}

impl Harness {
    pub async fn new(packages: Vec<PrestationPackage>) -> Self {
        Self::with_config(test_config(), packages).await
    }

    pub async fn with_config(config: NavetteConfig, packages: Vec<PrestationPackage>) -> Self {
        let store = InMemoryStore::new();
        for package in packages {
            store.insert_package(package).await;
        }
        let events = EventPublisher::new(config.events.channel_capacity);
        let service = FicheNavetteService::new(Arc::new(store.clone()), &config, events.clone());
        Self {
            store,
            service,
            events,
        }
    }

    pub async fn new_request(&self) -> i64 {
        self.service
            .create_request(1)
            .await
            .expect("create fiche navette")
            .fiche_navette_id
    }

    /// Insert items and set the total directly, without scheduling a job
    pub async fn seed_items(
        &self,
        fiche_navette_id: i64,
        items: &[NewServiceRequestItem],
    ) -> Vec<ServiceRequestItem> {
        let mut tx = self.store.begin().await.expect("begin");
        let previous = tx
            .lock_request(fiche_navette_id)
            .await
            .expect("lock")
            .expect("request exists")
            .total_amount;
        let mut created = Vec::new();
        for item in items {
            created.push(tx.insert_item(fiche_navette_id, item).await.expect("insert"));
        }
        let added: Decimal = items.iter().map(|item| item.final_price).sum();
        tx.update_total(fiche_navette_id, previous + added)
            .await
            .expect("update total");
        tx.commit().await.expect("commit");
        created
    }

    pub async fn wait_for(&self, job_id: JobId) -> JobStatus {
        self.service
            .runner()
            .wait_for_terminal(job_id, JOB_TIMEOUT)
            .await
            .expect("job settles before timeout")
    }

    pub async fn total(&self, fiche_navette_id: i64) -> Decimal {
        self.service
            .snapshot(fiche_navette_id)
            .await
            .expect("snapshot")
            .request
            .total_amount
    }
}

pub fn prestation(prestation_id: i64, doctor_id: Option<i64>, cents: i64) -> NewServiceRequestItem {
    NewServiceRequestItem::prestation(prestation_id, doctor_id, money(cents))
}

/// Everything published so far, without waiting
pub fn drain(receiver: &mut broadcast::Receiver<PublishedEvent>) -> Vec<PublishedEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

pub fn named<'a>(events: &'a [PublishedEvent], name: &str) -> Vec<&'a PublishedEvent> {
    events.iter().filter(|event| event.name == name).collect()
}
