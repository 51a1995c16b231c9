//! # Item Lifecycle Observer
//!
//! Keeps the fiche navette total in step with its items and schedules the
//! package conversion check. There is no implicit model hook: the service calls
//! these methods from each write path. Total updates run inside the caller's
//! transaction; events and job scheduling happen only after the caller commits.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::conversion::job::{ConversionJobPayload, PackageConversionJob};
use crate::conversion::totals::{self, FloorPolicy, RecalculationStrategy, TotalAdjustment};
use crate::error::Result;
use crate::events::{DomainEvent, EventPublisher, TotalChangeReason, TotalRecalculatedPayload};
use crate::jobs::{JobId, JobRunner};
use crate::models::{ServiceRequest, ServiceRequestItem};
use crate::store::StoreTransaction;

#[derive(Clone)]
pub struct ItemLifecycleObserver {
    runner: Arc<JobRunner<PackageConversionJob>>,
    events: EventPublisher,
    floor_policy: FloorPolicy,
    strategy: RecalculationStrategy,
}

impl std::fmt::Debug for ItemLifecycleObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemLifecycleObserver")
            .field("floor_policy", &self.floor_policy)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl ItemLifecycleObserver {
    pub fn new(
        runner: Arc<JobRunner<PackageConversionJob>>,
        events: EventPublisher,
        floor_policy: FloorPolicy,
        strategy: RecalculationStrategy,
    ) -> Self {
        Self {
            runner,
            events,
            floor_policy,
            strategy,
        }
    }

    pub fn strategy(&self) -> RecalculationStrategy {
        self.strategy
    }

    pub fn floor_policy(&self) -> FloorPolicy {
        self.floor_policy
    }

    /// Items were inserted in `tx`; add their prices to the total
    pub async fn on_inserted(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &ServiceRequest,
        created: &[ServiceRequestItem],
    ) -> Result<TotalAdjustment> {
        let delta: Decimal = created.iter().map(|item| item.final_price).sum();
        self.recalculate(tx, request, delta).await
    }

    /// `removed` was deleted in `tx`; subtract its price
    pub async fn on_deleted(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &ServiceRequest,
        removed: &ServiceRequestItem,
    ) -> Result<TotalAdjustment> {
        self.recalculate(tx, request, -removed.final_price).await
    }

    /// The item's price moved from `before.final_price` to `new_price` in `tx`.
    /// Returns `None` when the price did not change.
    pub async fn on_updated(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &ServiceRequest,
        before: &ServiceRequestItem,
        new_price: Decimal,
    ) -> Result<Option<TotalAdjustment>> {
        if before.final_price == new_price {
            debug!(
                fiche_navette_id = request.fiche_navette_id,
                item_id = before.item_id,
                "Item price unchanged, total left as is"
            );
            return Ok(None);
        }
        let adjustment = self
            .recalculate(tx, request, new_price - before.final_price)
            .await?;
        Ok(Some(adjustment))
    }

    /// Items were committed; queue the conversion check. Enqueue failures are
    /// logged and swallowed so the item write still succeeds.
    pub fn on_created(
        &self,
        fiche_navette_id: i64,
        created: &[ServiceRequestItem],
        doctor_selection: Option<i64>,
    ) -> Option<JobId> {
        let newly_added_prestation_ids: Vec<i64> =
            created.iter().filter_map(|item| item.prestation_id).collect();
        self.schedule_conversion(fiche_navette_id, newly_added_prestation_ids, doctor_selection)
    }

    pub fn schedule_conversion(
        &self,
        fiche_navette_id: i64,
        newly_added_prestation_ids: Vec<i64>,
        doctor_selection: Option<i64>,
    ) -> Option<JobId> {
        let payload = ConversionJobPayload {
            fiche_navette_id,
            newly_added_prestation_ids,
            doctor_selection,
        };
        match self.runner.submit(payload) {
            Ok(job_id) => Some(job_id),
            Err(error) => {
                warn!(
                    fiche_navette_id = fiche_navette_id,
                    error = %error,
                    "Could not schedule package conversion check"
                );
                None
            }
        }
    }

    /// Publish a committed total change
    pub async fn announce_total(
        &self,
        fiche_navette_id: i64,
        adjustment: &TotalAdjustment,
        reason: TotalChangeReason,
    ) {
        let event = DomainEvent::TotalRecalculated(TotalRecalculatedPayload {
            fiche_navette_id,
            previous_total: adjustment.previous,
            new_total: adjustment.new_total,
            reason,
            clamped: adjustment.clamped,
        });
        if let Err(error) = self.events.publish_event(&event).await {
            warn!(
                fiche_navette_id = fiche_navette_id,
                error = %error,
                "Failed to publish total recalculation"
            );
        }
    }

    async fn recalculate(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &ServiceRequest,
        delta: Decimal,
    ) -> Result<TotalAdjustment> {
        let fiche_navette_id = request.fiche_navette_id;
        let adjustment = match self.strategy {
            RecalculationStrategy::Resum => {
                let items = tx.items_for_request(fiche_navette_id).await?;
                totals::resum(self.floor_policy, fiche_navette_id, request.total_amount, &items)?
            }
            RecalculationStrategy::Incremental => totals::apply_delta(
                self.floor_policy,
                fiche_navette_id,
                request.total_amount,
                delta,
            )?,
        };

        if adjustment.changed() {
            tx.update_total(fiche_navette_id, adjustment.new_total)
                .await?;
        }
        debug!(
            fiche_navette_id = fiche_navette_id,
            strategy = ?self.strategy,
            previous_total = %adjustment.previous,
            new_total = %adjustment.new_total,
            "Total recalculated"
        );
        Ok(adjustment)
    }
}
