//! # PostgreSQL Store
//!
//! sqlx-backed provider. Items are soft-deleted (`deleted_at`), so "live" means
//! `deleted_at IS NULL`. Expected tables:
//!
//! ```sql
//! CREATE TABLE fiche_navettes (
//!   fiche_navette_id BIGSERIAL PRIMARY KEY,
//!   patient_id BIGINT NOT NULL,
//!   total_amount NUMERIC(12, 2) NOT NULL DEFAULT 0,
//!   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE TABLE fiche_navette_items (
//!   item_id BIGSERIAL PRIMARY KEY,
//!   fiche_navette_id BIGINT NOT NULL REFERENCES fiche_navettes,
//!   prestation_id BIGINT,
//!   package_id BIGINT,
//!   doctor_id BIGINT,
//!   final_price NUMERIC(12, 2) NOT NULL,
//!   status TEXT NOT NULL DEFAULT 'pending',
//!   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!   deleted_at TIMESTAMPTZ
//! );
//! CREATE TABLE prestation_packages (
//!   package_id BIGSERIAL PRIMARY KEY,
//!   name TEXT NOT NULL,
//!   price NUMERIC(12, 2) NOT NULL,
//!   is_active BOOLEAN NOT NULL DEFAULT true
//! );
//! CREATE TABLE prestation_package_items (
//!   package_id BIGINT NOT NULL REFERENCES prestation_packages,
//!   prestation_id BIGINT NOT NULL
//! );
//! ```

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use super::{Store, StoreTransaction};
use crate::config::DatabaseConfig;
use crate::error::{NavetteError, Result};
use crate::models::{
    NewServiceRequestItem, PrestationPackage, RequestSnapshot, ServiceRequest, ServiceRequestItem,
};

const ITEM_COLUMNS: &str = "item_id, fiche_navette_id, prestation_id, package_id, doctor_id, \
                            final_price, status, created_at";

const PACKAGE_SELECT: &str = r#"
    SELECT p.package_id, p.name, p.price,
           COALESCE(
               array_agg(pi.prestation_id ORDER BY pi.prestation_id)
                   FILTER (WHERE pi.prestation_id IS NOT NULL),
               '{}'::BIGINT[]
           ) AS prestation_ids
    FROM prestation_packages p
    LEFT JOIN prestation_package_items pi ON pi.package_id = p.package_id
"#;

/// PostgreSQL [`Store`] provider
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.database_url().ok_or_else(|| {
            NavetteError::Configuration("database.url is not set and DATABASE_URL is empty".into())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "Connected PostgreSQL store"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn create_request(&self, patient_id: i64) -> Result<ServiceRequest> {
        let request = sqlx::query_as::<_, ServiceRequest>(
            r#"
            INSERT INTO fiche_navettes (patient_id, total_amount, created_at)
            VALUES ($1, 0, NOW())
            RETURNING fiche_navette_id, patient_id, total_amount, created_at
            "#,
        )
        .bind(patient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(request)
    }

    async fn load_snapshot(&self, fiche_navette_id: i64) -> Result<Option<RequestSnapshot>> {
        let request = sqlx::query_as::<_, ServiceRequest>(
            r#"
            SELECT fiche_navette_id, patient_id, total_amount, created_at
            FROM fiche_navettes
            WHERE fiche_navette_id = $1
            "#,
        )
        .bind(fiche_navette_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(request) = request else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, ServiceRequestItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM fiche_navette_items \
             WHERE fiche_navette_id = $1 AND deleted_at IS NULL ORDER BY item_id"
        ))
        .bind(fiche_navette_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(RequestSnapshot { request, items }))
    }

    async fn list_packages(&self) -> Result<Vec<PrestationPackage>> {
        let packages = sqlx::query_as::<_, PrestationPackage>(&format!(
            "{PACKAGE_SELECT} WHERE p.is_active GROUP BY p.package_id ORDER BY p.package_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(packages)
    }

    fn provider_name(&self) -> &'static str {
        "postgres"
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn lock_request(&mut self, fiche_navette_id: i64) -> Result<Option<ServiceRequest>> {
        let request = sqlx::query_as::<_, ServiceRequest>(
            r#"
            SELECT fiche_navette_id, patient_id, total_amount, created_at
            FROM fiche_navettes
            WHERE fiche_navette_id = $1
            FOR UPDATE
            "#,
        )
        .bind(fiche_navette_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(request)
    }

    async fn items_for_request(&mut self, fiche_navette_id: i64) -> Result<Vec<ServiceRequestItem>> {
        let items = sqlx::query_as::<_, ServiceRequestItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM fiche_navette_items \
             WHERE fiche_navette_id = $1 AND deleted_at IS NULL ORDER BY item_id FOR UPDATE"
        ))
        .bind(fiche_navette_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(items)
    }

    async fn find_package(&mut self, package_id: i64) -> Result<Option<PrestationPackage>> {
        let package = sqlx::query_as::<_, PrestationPackage>(&format!(
            "{PACKAGE_SELECT} WHERE p.package_id = $1 AND p.is_active GROUP BY p.package_id"
        ))
        .bind(package_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(package)
    }

    async fn insert_item(
        &mut self,
        fiche_navette_id: i64,
        item: &NewServiceRequestItem,
    ) -> Result<ServiceRequestItem> {
        let inserted = sqlx::query_as::<_, ServiceRequestItem>(&format!(
            "INSERT INTO fiche_navette_items \
             (fiche_navette_id, prestation_id, package_id, doctor_id, final_price, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, 'pending', NOW()) \
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(fiche_navette_id)
        .bind(item.prestation_id)
        .bind(item.package_id)
        .bind(item.doctor_id)
        .bind(item.final_price)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(inserted)
    }

    async fn delete_items(&mut self, fiche_navette_id: i64, item_ids: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE fiche_navette_items
            SET deleted_at = NOW()
            WHERE fiche_navette_id = $1 AND item_id = ANY($2) AND deleted_at IS NULL
            "#,
        )
        .bind(fiche_navette_id)
        .bind(item_ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_item_price(&mut self, item_id: i64, final_price: Decimal) -> Result<()> {
        sqlx::query("UPDATE fiche_navette_items SET final_price = $2 WHERE item_id = $1")
            .bind(item_id)
            .bind(final_price)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_total(&mut self, fiche_navette_id: i64, total_amount: Decimal) -> Result<()> {
        let result =
            sqlx::query("UPDATE fiche_navettes SET total_amount = $2 WHERE fiche_navette_id = $1")
                .bind(fiche_navette_id)
                .bind(total_amount)
                .execute(&mut *self.tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(NavetteError::RequestNotFound(fiche_navette_id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
