//! # Conversion Executor
//!
//! Replaces matched items with one package item inside a single transaction:
//! lock the request, re-check the items, delete them, insert the package item
//! and move the total by `package price - removed prices`. Any mismatch aborts
//! the whole unit of work. The `PackageConverted` event is only published once
//! the transaction has committed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::totals::{self, FloorPolicy};
use crate::error::{NavetteError, Result};
use crate::events::{DomainEvent, EventPublisher, PackageConvertedPayload};
use crate::logging::log_conversion_operation;
use crate::models::{NewServiceRequestItem, PrestationPackage, ServiceRequestItem};
use crate::store::{Store, StoreTransaction};

/// What a successful conversion did
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub fiche_navette_id: i64,
    pub package: PrestationPackage,
    pub new_item: ServiceRequestItem,
    pub removed_item_ids: Vec<i64>,
    pub is_cascading: bool,
    pub old_package_ids: Vec<i64>,
    pub previous_total: Decimal,
    pub new_total: Decimal,
    pub clamped: bool,
}

impl ConversionOutcome {
    pub fn to_event(&self) -> DomainEvent {
        DomainEvent::PackageConverted(PackageConvertedPayload {
            fiche_navette_id: self.fiche_navette_id,
            package_id: self.package.package_id,
            package_name: self.package.name.clone(),
            package_price: self.package.price,
            new_item_id: self.new_item.item_id,
            removed_item_ids: self.removed_item_ids.clone(),
            is_cascading: self.is_cascading,
            old_package_ids: self.old_package_ids.clone(),
            doctor_id: self.new_item.doctor_id,
            previous_total: self.previous_total,
            new_total: self.new_total,
            converted_at: Utc::now(),
        })
    }
}

#[derive(Clone)]
pub struct ConversionExecutor {
    store: Arc<dyn Store>,
    events: EventPublisher,
    floor_policy: FloorPolicy,
}

impl std::fmt::Debug for ConversionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionExecutor")
            .field("store", &self.store.provider_name())
            .field("floor_policy", &self.floor_policy)
            .finish()
    }
}

impl ConversionExecutor {
    pub fn new(store: Arc<dyn Store>, events: EventPublisher, floor_policy: FloorPolicy) -> Self {
        Self {
            store,
            events,
            floor_policy,
        }
    }

    /// Replace `item_ids_to_remove` with one item for `package_id`
    pub async fn execute(
        &self,
        fiche_navette_id: i64,
        package_id: i64,
        item_ids_to_remove: &[i64],
        doctor_id: Option<i64>,
    ) -> Result<ConversionOutcome> {
        let item_ids: Vec<i64> = item_ids_to_remove
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if item_ids.is_empty() {
            return Err(NavetteError::Validation(
                "a conversion must remove at least one item".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let result = self
            .execute_in(tx.as_mut(), fiche_navette_id, package_id, &item_ids, doctor_id)
            .await;

        let outcome = match result {
            Ok(outcome) => {
                tx.commit().await?;
                outcome
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(
                        fiche_navette_id = fiche_navette_id,
                        error = %rollback_error,
                        "Rollback after failed conversion also failed"
                    );
                }
                warn!(
                    fiche_navette_id = fiche_navette_id,
                    package_id = package_id,
                    item_ids = ?item_ids,
                    error_code = error.error_code(),
                    error = %error,
                    "Package conversion aborted"
                );
                return Err(error);
            }
        };

        info!(
            fiche_navette_id = fiche_navette_id,
            package_id = package_id,
            removed_item_ids = ?outcome.removed_item_ids,
            new_item_id = outcome.new_item.item_id,
            is_cascading = outcome.is_cascading,
            new_total = %outcome.new_total,
            "Package conversion committed"
        );
        log_conversion_operation(
            "execute",
            fiche_navette_id,
            Some(package_id),
            "converted",
            None,
        );

        if let Err(error) = self.events.publish_event(&outcome.to_event()).await {
            warn!(
                fiche_navette_id = fiche_navette_id,
                error = %error,
                "Failed to publish package conversion event"
            );
        }

        Ok(outcome)
    }

    async fn execute_in(
        &self,
        tx: &mut dyn StoreTransaction,
        fiche_navette_id: i64,
        package_id: i64,
        item_ids: &[i64],
        doctor_id: Option<i64>,
    ) -> Result<ConversionOutcome> {
        let request = tx
            .lock_request(fiche_navette_id)
            .await?
            .ok_or(NavetteError::RequestNotFound(fiche_navette_id))?;
        let package = tx
            .find_package(package_id)
            .await?
            .ok_or(NavetteError::PackageNotFound(package_id))?;
        let live_items = tx.items_for_request(fiche_navette_id).await?;

        let mut removed: Vec<&ServiceRequestItem> = Vec::with_capacity(item_ids.len());
        let mut missing = Vec::new();
        let mut settled = Vec::new();
        for item_id in item_ids {
            match live_items.iter().find(|item| item.item_id == *item_id) {
                None => missing.push(*item_id),
                Some(item) if !item.status.is_convertible() => settled.push(*item_id),
                Some(item) => removed.push(item),
            }
        }

        if !missing.is_empty() {
            return Err(NavetteError::StaleItemState {
                fiche_navette_id,
                item_ids: missing,
                reason: "items are no longer on the request".to_string(),
            });
        }
        if !settled.is_empty() {
            return Err(NavetteError::StaleItemState {
                fiche_navette_id,
                item_ids: settled,
                reason: "items are already paid, consumed or cancelled".to_string(),
            });
        }

        let old_package_ids: Vec<i64> = removed
            .iter()
            .filter_map(|item| item.package_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let removed_prices: Vec<Decimal> = removed.iter().map(|item| item.final_price).collect();

        let deleted = tx.delete_items(fiche_navette_id, item_ids).await?;
        if deleted != item_ids.len() as u64 {
            return Err(NavetteError::StaleItemState {
                fiche_navette_id,
                item_ids: item_ids.to_vec(),
                reason: format!("expected to remove {} items, removed {deleted}", item_ids.len()),
            });
        }

        let new_item = tx
            .insert_item(
                fiche_navette_id,
                &NewServiceRequestItem::package(package_id, doctor_id, package.price),
            )
            .await?;

        let adjustment = totals::conversion_total(
            self.floor_policy,
            fiche_navette_id,
            request.total_amount,
            &removed_prices,
            package.price,
        )?;
        tx.update_total(fiche_navette_id, adjustment.new_total)
            .await?;

        Ok(ConversionOutcome {
            fiche_navette_id,
            is_cascading: !old_package_ids.is_empty(),
            old_package_ids,
            package,
            new_item,
            removed_item_ids: item_ids.to_vec(),
            previous_total: request.total_amount,
            new_total: adjustment.new_total,
            clamped: adjustment.clamped,
        })
    }
}
