//! # Persistence Seam
//!
//! Repository-style access to fiche navettes, their items and the package
//! catalogue. All mutations go through a [`StoreTransaction`], which row-locks
//! the request it touches so concurrent edits to one fiche navette serialize.
//!
//! Providers:
//! - [`InMemoryStore`]: process-local, used by tests and embedded setups
//! - [`PgStore`]: PostgreSQL through sqlx

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{
    NewServiceRequestItem, PrestationPackage, RequestSnapshot, ServiceRequest, ServiceRequestItem,
};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Read access plus the entry point for transactional writes
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Start a unit of work. Dropping it without `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Open a new fiche navette with a zero total
    async fn create_request(&self, patient_id: i64) -> Result<ServiceRequest>;

    /// Request plus live items, without locking
    async fn load_snapshot(&self, fiche_navette_id: i64) -> Result<Option<RequestSnapshot>>;

    /// Active package definitions ordered by id
    async fn list_packages(&self) -> Result<Vec<PrestationPackage>>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// A row-locked unit of work scoped to one or more fiche navettes
#[async_trait]
pub trait StoreTransaction: Send {
    /// Lock the request row for the rest of the transaction
    async fn lock_request(&mut self, fiche_navette_id: i64) -> Result<Option<ServiceRequest>>;

    /// Live items of the request
    async fn items_for_request(&mut self, fiche_navette_id: i64) -> Result<Vec<ServiceRequestItem>>;

    async fn find_package(&mut self, package_id: i64) -> Result<Option<PrestationPackage>>;

    async fn insert_item(
        &mut self,
        fiche_navette_id: i64,
        item: &NewServiceRequestItem,
    ) -> Result<ServiceRequestItem>;

    /// Remove live items of the request, returning how many were removed
    async fn delete_items(&mut self, fiche_navette_id: i64, item_ids: &[i64]) -> Result<u64>;

    async fn update_item_price(&mut self, item_id: i64, final_price: Decimal) -> Result<()>;

    async fn update_total(&mut self, fiche_navette_id: i64, total_amount: Decimal) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
