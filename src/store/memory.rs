//! # In-Memory Store
//!
//! Thread-safe store for tests and development. A transaction takes the store
//! mutex for its whole lifetime and works on a copy of the state; `commit`
//! swaps the copy in, dropping the transaction discards it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, StoreTransaction};
use crate::error::{NavetteError, Result};
use crate::models::{
    ItemStatus, NewServiceRequestItem, PrestationPackage, RequestSnapshot, ServiceRequest,
    ServiceRequestItem,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    requests: BTreeMap<i64, ServiceRequest>,
    items: BTreeMap<i64, ServiceRequestItem>,
    packages: BTreeMap<i64, PrestationPackage>,
    next_request_id: i64,
    next_item_id: i64,
}

impl MemoryState {
    fn live_items(&self, fiche_navette_id: i64) -> Vec<ServiceRequestItem> {
        self.items
            .values()
            .filter(|item| item.fiche_navette_id == fiche_navette_id)
            .cloned()
            .collect()
    }

    fn allocate_item_id(&mut self) -> i64 {
        self.next_item_id += 1;
        self.next_item_id
    }
}

/// In-memory [`Store`] provider
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    /// Upcoming `begin` calls that fail with a transient error
    injected_failures: Arc<AtomicU32>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a package definition
    pub async fn insert_package(&self, package: PrestationPackage) {
        let mut state = self.state.lock().await;
        state.packages.insert(package.package_id, package);
    }

    pub async fn remove_package(&self, package_id: i64) {
        let mut state = self.state.lock().await;
        state.packages.remove(&package_id);
    }

    /// Remove a request and its items outside any workflow (for testing)
    pub async fn purge_request(&self, fiche_navette_id: i64) {
        let mut state = self.state.lock().await;
        state.requests.remove(&fiche_navette_id);
        state
            .items
            .retain(|_, item| item.fiche_navette_id != fiche_navette_id);
    }

    /// Force an item's status, e.g. to simulate payment at the caisse
    pub async fn set_item_status(&self, item_id: i64, status: ItemStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&item_id)
            .ok_or_else(|| NavetteError::Validation(format!("unknown item {item_id}")))?;
        item.status = status;
        Ok(())
    }

    /// Make the next `count` transactions fail as if the database were contended
    pub fn inject_transient_failures(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        if self.take_injected_failure() {
            return Err(NavetteError::Transient(
                "could not obtain lock on row in relation \"fiche_navettes\"".to_string(),
            ));
        }

        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn create_request(&self, patient_id: i64) -> Result<ServiceRequest> {
        let mut state = self.state.lock().await;
        state.next_request_id += 1;
        let request = ServiceRequest {
            fiche_navette_id: state.next_request_id,
            patient_id,
            total_amount: Decimal::ZERO,
            created_at: Utc::now(),
        };
        state
            .requests
            .insert(request.fiche_navette_id, request.clone());
        Ok(request)
    }

    async fn load_snapshot(&self, fiche_navette_id: i64) -> Result<Option<RequestSnapshot>> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .get(&fiche_navette_id)
            .map(|request| RequestSnapshot {
                request: request.clone(),
                items: state.live_items(fiche_navette_id),
            }))
    }

    async fn list_packages(&self) -> Result<Vec<PrestationPackage>> {
        let state = self.state.lock().await;
        Ok(state.packages.values().cloned().collect())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_request(&mut self, fiche_navette_id: i64) -> Result<Option<ServiceRequest>> {
        Ok(self.working.requests.get(&fiche_navette_id).cloned())
    }

    async fn items_for_request(&mut self, fiche_navette_id: i64) -> Result<Vec<ServiceRequestItem>> {
        Ok(self.working.live_items(fiche_navette_id))
    }

    async fn find_package(&mut self, package_id: i64) -> Result<Option<PrestationPackage>> {
        Ok(self.working.packages.get(&package_id).cloned())
    }

    async fn insert_item(
        &mut self,
        fiche_navette_id: i64,
        item: &NewServiceRequestItem,
    ) -> Result<ServiceRequestItem> {
        if !self.working.requests.contains_key(&fiche_navette_id) {
            return Err(NavetteError::RequestNotFound(fiche_navette_id));
        }

        let item = ServiceRequestItem {
            item_id: self.working.allocate_item_id(),
            fiche_navette_id,
            prestation_id: item.prestation_id,
            package_id: item.package_id,
            doctor_id: item.doctor_id,
            final_price: item.final_price,
            status: ItemStatus::Pending,
            created_at: Utc::now(),
        };
        self.working.items.insert(item.item_id, item.clone());
        Ok(item)
    }

    async fn delete_items(&mut self, fiche_navette_id: i64, item_ids: &[i64]) -> Result<u64> {
        let mut removed = 0;
        for item_id in item_ids {
            let belongs = self
                .working
                .items
                .get(item_id)
                .is_some_and(|item| item.fiche_navette_id == fiche_navette_id);
            if belongs && self.working.items.remove(item_id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn update_item_price(&mut self, item_id: i64, final_price: Decimal) -> Result<()> {
        let item = self
            .working
            .items
            .get_mut(&item_id)
            .ok_or_else(|| NavetteError::Validation(format!("unknown item {item_id}")))?;
        item.final_price = final_price;
        Ok(())
    }

    async fn update_total(&mut self, fiche_navette_id: i64, total_amount: Decimal) -> Result<()> {
        let request = self
            .working
            .requests
            .get_mut(&fiche_navette_id)
            .ok_or(NavetteError::RequestNotFound(fiche_navette_id))?;
        request.total_amount = total_amount;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_persists_changes() {
        let store = InMemoryStore::new();
        let request = store.create_request(77).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let item = tx
            .insert_item(
                request.fiche_navette_id,
                &NewServiceRequestItem::prestation(5, Some(1), Decimal::new(1000, 2)),
            )
            .await
            .unwrap();
        tx.update_total(request.fiche_navette_id, Decimal::new(1000, 2))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let snapshot = store
            .load_snapshot(request.fiche_navette_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.items, vec![item]);
        assert_eq!(snapshot.request.total_amount, Decimal::new(1000, 2));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = InMemoryStore::new();
        let request = store.create_request(77).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_item(
                request.fiche_navette_id,
                &NewServiceRequestItem::prestation(5, None, Decimal::ONE),
            )
            .await
            .unwrap();
        }

        let snapshot = store
            .load_snapshot(request.fiche_navette_id)
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot.items.is_empty());
    }

    #[tokio::test]
    async fn test_delete_ignores_foreign_items() {
        let store = InMemoryStore::new();
        let first = store.create_request(1).await.unwrap();
        let second = store.create_request(2).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let foreign = tx
            .insert_item(
                second.fiche_navette_id,
                &NewServiceRequestItem::prestation(5, None, Decimal::ONE),
            )
            .await
            .unwrap();
        let removed = tx
            .delete_items(first.fiche_navette_id, &[foreign.item_id])
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient_and_bounded() {
        let store = InMemoryStore::new();
        store.inject_transient_failures(1);

        let err = store.begin().await.err().unwrap();
        assert!(err.is_retryable());
        assert!(store.begin().await.is_ok());
    }
}
