//! # Fiche Navette Service
//!
//! Entry point for callers. Every write runs in one store transaction scoped to
//! the fiche navette, calls the [`ItemLifecycleObserver`] explicitly, commits,
//! then publishes events and schedules the conversion check. Conversion itself
//! happens later on the job runner, so `add_items` returns before any package
//! replacement is visible.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::config::NavetteConfig;
use crate::conversion::{
    totals, ConversionExecutor, ConversionJobPayload, ConversionPreparer, PackageConversionJob,
    TotalAdjustment,
};
use crate::error::{NavetteError, Result};
use crate::events::{EventPublisher, TotalChangeReason};
use crate::jobs::{DeadLetterEntry, JobId, JobRunner, JobStatus, RunnerOptions};
use crate::models::{NewServiceRequestItem, RequestSnapshot, ServiceRequest, ServiceRequestItem};
use crate::observer::ItemLifecycleObserver;
use crate::store::{Store, StoreTransaction};

/// Result of [`FicheNavetteService::add_items`]
#[derive(Debug, Clone, PartialEq)]
pub struct AddedItems {
    pub items: Vec<ServiceRequestItem>,
    pub total: TotalAdjustment,
    /// `None` when the conversion check could not be queued
    pub conversion_job: Option<JobId>,
}

pub struct FicheNavetteService {
    store: Arc<dyn Store>,
    events: EventPublisher,
    preparer: ConversionPreparer,
    observer: ItemLifecycleObserver,
    runner: Arc<JobRunner<PackageConversionJob>>,
}

impl std::fmt::Debug for FicheNavetteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FicheNavetteService")
            .field("store", &self.store.provider_name())
            .field("observer", &self.observer)
            .field("runner", &self.runner)
            .finish()
    }
}

impl FicheNavetteService {
    /// Wire the workflow on top of `store` and start the conversion workers.
    /// Must be called inside a tokio runtime.
    ///
    /// `config` is taken as already validated (as [`ConfigManager`] does on
    /// load); use [`try_new`](Self::try_new) for hand-built configurations.
    ///
    /// [`ConfigManager`]: crate::config::ConfigManager
    pub fn new(store: Arc<dyn Store>, config: &NavetteConfig, events: EventPublisher) -> Self {
        let floor_policy = config.conversion.floor_policy;
        let preparer = ConversionPreparer::new(Arc::clone(&store));
        let executor = ConversionExecutor::new(Arc::clone(&store), events.clone(), floor_policy);
        let job = PackageConversionJob::new(preparer.clone(), executor, events.clone());
        let runner = Arc::new(JobRunner::start(
            job,
            RunnerOptions::from(&config.jobs),
            events.clone(),
        ));
        let observer = ItemLifecycleObserver::new(
            Arc::clone(&runner),
            events.clone(),
            floor_policy,
            config.conversion.recalculation,
        );

        info!(
            store = store.provider_name(),
            floor_policy = ?floor_policy,
            recalculation = ?config.conversion.recalculation,
            "Fiche navette service ready"
        );

        Self {
            store,
            events,
            preparer,
            observer,
            runner,
        }
    }

    /// [`new`](Self::new) after rejecting configuration the runner cannot work with
    pub fn try_new(
        store: Arc<dyn Store>,
        config: &NavetteConfig,
        events: EventPublisher,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(store, config, events))
    }

    /// Build the service on PostgreSQL from configuration
    #[cfg(feature = "postgres")]
    pub async fn connect(config: &NavetteConfig) -> Result<Self> {
        config.validate()?;
        let store = crate::store::PgStore::connect(&config.database).await?;
        let events = EventPublisher::new(config.events.channel_capacity);
        Ok(Self::new(Arc::new(store), config, events))
    }

    pub async fn create_request(&self, patient_id: i64) -> Result<ServiceRequest> {
        let request = self.store.create_request(patient_id).await?;
        info!(
            fiche_navette_id = request.fiche_navette_id,
            patient_id = patient_id,
            "Fiche navette created"
        );
        Ok(request)
    }

    pub async fn snapshot(&self, fiche_navette_id: i64) -> Result<RequestSnapshot> {
        self.store
            .load_snapshot(fiche_navette_id)
            .await?
            .ok_or(NavetteError::RequestNotFound(fiche_navette_id))
    }

    /// Insert items and update the total, then queue the conversion check
    #[instrument(skip(self, items), fields(item_count = items.len()))]
    pub async fn add_items(
        &self,
        fiche_navette_id: i64,
        items: Vec<NewServiceRequestItem>,
    ) -> Result<AddedItems> {
        if items.is_empty() {
            return Err(NavetteError::Validation("no items to add".to_string()));
        }
        for item in &items {
            item.validate().map_err(NavetteError::Validation)?;
        }

        let (created, total) = self
            .in_transaction(fiche_navette_id, |observer, tx, request| {
                Box::pin(async move {
                    let mut created = Vec::with_capacity(items.len());
                    for item in &items {
                        created.push(tx.insert_item(request.fiche_navette_id, item).await?);
                    }
                    let total = observer.on_inserted(tx, &request, &created).await?;
                    Ok((created, total))
                })
            })
            .await?;

        self.observer
            .announce_total(fiche_navette_id, &total, TotalChangeReason::ItemsAdded)
            .await;
        let conversion_job = self.observer.on_created(fiche_navette_id, &created, None);

        info!(
            fiche_navette_id = fiche_navette_id,
            item_ids = ?created.iter().map(|item| item.item_id).collect::<Vec<_>>(),
            new_total = %total.new_total,
            conversion_job = ?conversion_job,
            "Items added"
        );

        Ok(AddedItems {
            items: created,
            total,
            conversion_job,
        })
    }

    /// Delete one item and subtract its price from the total
    #[instrument(skip(self))]
    pub async fn remove_item(&self, fiche_navette_id: i64, item_id: i64) -> Result<TotalAdjustment> {
        let total = self
            .in_transaction(fiche_navette_id, |observer, tx, request| {
                Box::pin(async move {
                    let item = find_item(tx, fiche_navette_id, item_id).await?;
                    if tx.delete_items(fiche_navette_id, &[item_id]).await? == 0 {
                        return Err(NavetteError::ItemNotFound {
                            fiche_navette_id,
                            item_id,
                        });
                    }
                    observer.on_deleted(tx, &request, &item).await
                })
            })
            .await?;

        self.observer
            .announce_total(fiche_navette_id, &total, TotalChangeReason::ItemRemoved)
            .await;
        Ok(total)
    }

    /// Change an item's final price. `None` when the price is unchanged.
    #[instrument(skip(self))]
    pub async fn update_item_price(
        &self,
        fiche_navette_id: i64,
        item_id: i64,
        final_price: Decimal,
    ) -> Result<Option<TotalAdjustment>> {
        if final_price < Decimal::ZERO {
            return Err(NavetteError::Validation(format!(
                "final price must not be negative, got {final_price}"
            )));
        }

        let total = self
            .in_transaction(fiche_navette_id, |observer, tx, request| {
                Box::pin(async move {
                    let before = find_item(tx, fiche_navette_id, item_id).await?;
                    if before.final_price == final_price {
                        return Ok(None);
                    }
                    tx.update_item_price(item_id, final_price).await?;
                    observer.on_updated(tx, &request, &before, final_price).await
                })
            })
            .await?;

        if let Some(total) = &total {
            self.observer
                .announce_total(fiche_navette_id, total, TotalChangeReason::PriceUpdated)
                .await;
        }
        Ok(total)
    }

    /// Retry a conversion that stopped on `MultipleDoctors`, attributing the
    /// package to `doctor_id`. An unrelated doctor is rejected immediately.
    #[instrument(skip(self))]
    pub async fn resolve_doctor_conflict(
        &self,
        fiche_navette_id: i64,
        doctor_id: i64,
    ) -> Result<JobId> {
        let decision = self
            .preparer
            .evaluate_current(fiche_navette_id, &[], Some(doctor_id))
            .await?;
        info!(
            fiche_navette_id = fiche_navette_id,
            doctor_id = doctor_id,
            should_convert = decision.should_convert,
            "Doctor selected for package conversion"
        );

        self.runner.submit(ConversionJobPayload {
            fiche_navette_id,
            newly_added_prestation_ids: Vec::new(),
            doctor_selection: Some(doctor_id),
        })
    }

    /// Recompute the total from the live items
    #[instrument(skip(self))]
    pub async fn recalculate_total(&self, fiche_navette_id: i64) -> Result<TotalAdjustment> {
        let floor_policy = self.observer.floor_policy();
        let total = self
            .in_transaction(fiche_navette_id, |_, tx, request| {
                Box::pin(async move {
                    let items = tx.items_for_request(fiche_navette_id).await?;
                    let adjustment = totals::resum(
                        floor_policy,
                        fiche_navette_id,
                        request.total_amount,
                        &items,
                    )?;
                    if adjustment.changed() {
                        tx.update_total(fiche_navette_id, adjustment.new_total)
                            .await?;
                    }
                    Ok(adjustment)
                })
            })
            .await?;

        if total.changed() {
            self.observer
                .announce_total(fiche_navette_id, &total, TotalChangeReason::Recalculated)
                .await;
        }
        Ok(total)
    }

    pub fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.runner.job_status(job_id)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.runner.dead_letters()
    }

    pub fn requeue_dead_letter(&self, job_id: JobId) -> Result<()> {
        self.runner.requeue_dead_letter(job_id)
    }

    pub fn runner(&self) -> &JobRunner<PackageConversionJob> {
        &self.runner
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn shutdown(&self) {
        self.runner.shutdown().await;
    }

    /// Lock the request, run `work`, commit on success and roll back otherwise
    async fn in_transaction<T, F>(&self, fiche_navette_id: i64, work: F) -> Result<T>
    where
        T: Send,
        F: for<'a> FnOnce(
            &'a ItemLifecycleObserver,
            &'a mut dyn StoreTransaction,
            ServiceRequest,
        ) -> futures::future::BoxFuture<'a, Result<T>>,
    {
        let mut tx = self.store.begin().await?;
        let request = match tx.lock_request(fiche_navette_id).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                rollback_after_failure(tx, fiche_navette_id).await;
                return Err(NavetteError::RequestNotFound(fiche_navette_id));
            }
            Err(error) => {
                rollback_after_failure(tx, fiche_navette_id).await;
                return Err(error);
            }
        };

        match work(&self.observer, tx.as_mut(), request).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                rollback_after_failure(tx, fiche_navette_id).await;
                Err(error)
            }
        }
    }
}

/// The caller reports the original failure; a failed rollback is only logged
async fn rollback_after_failure(tx: Box<dyn StoreTransaction>, fiche_navette_id: i64) {
    if let Err(rollback_error) = tx.rollback().await {
        warn!(
            fiche_navette_id = fiche_navette_id,
            error = %rollback_error,
            "Rollback after failed operation also failed"
        );
    }
}

async fn find_item(
    tx: &mut dyn StoreTransaction,
    fiche_navette_id: i64,
    item_id: i64,
) -> Result<ServiceRequestItem> {
    tx.items_for_request(fiche_navette_id)
        .await?
        .into_iter()
        .find(|item| item.item_id == item_id)
        .ok_or(NavetteError::ItemNotFound {
            fiche_navette_id,
            item_id,
        })
}
