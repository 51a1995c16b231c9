//! Background conversion check run by the [`JobRunner`](crate::jobs::JobRunner).
//!
//! Each attempt starts from a fresh snapshot of the request, so a retry never
//! acts on items a concurrent edit has already changed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::executor::ConversionExecutor;
use super::preparer::ConversionPreparer;
use crate::constants::defaults::MAX_CONVERSION_ROUNDS;
use crate::constants::PACKAGE_CONVERSION_QUEUE;
use crate::error::{NavetteError, Result};
use crate::events::{ConversionConflictPayload, DomainEvent, EventPublisher};
use crate::jobs::{JobHandler, JobOutcome};
use crate::logging::log_conversion_operation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionJobPayload {
    pub fiche_navette_id: i64,
    pub newly_added_prestation_ids: Vec<i64>,
    /// Doctor picked by the user after a `MultipleDoctors` conflict
    pub doctor_selection: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PackageConversionJob {
    preparer: ConversionPreparer,
    executor: ConversionExecutor,
    events: EventPublisher,
}

impl PackageConversionJob {
    pub fn new(
        preparer: ConversionPreparer,
        executor: ConversionExecutor,
        events: EventPublisher,
    ) -> Self {
        Self {
            preparer,
            executor,
            events,
        }
    }

    async fn announce_conflict(&self, fiche_navette_id: i64, package_id: i64, doctor_ids: &[i64]) {
        let event = DomainEvent::ConversionConflict(ConversionConflictPayload {
            fiche_navette_id,
            package_id,
            doctor_ids: doctor_ids.to_vec(),
        });
        if let Err(error) = self.events.publish_event(&event).await {
            warn!(
                fiche_navette_id = fiche_navette_id,
                error = %error,
                "Failed to publish conversion conflict"
            );
        }
    }
}

#[async_trait]
impl JobHandler for PackageConversionJob {
    type Payload = ConversionJobPayload;

    fn queue_name(&self) -> &'static str {
        PACKAGE_CONVERSION_QUEUE
    }

    /// Convert until no package matches any more. The doctor selection only
    /// applies to the first round, which is the conflict it was picked for.
    async fn handle(&self, payload: &ConversionJobPayload, attempt: u32) -> Result<JobOutcome> {
        let fiche_navette_id = payload.fiche_navette_id;
        debug!(
            fiche_navette_id = fiche_navette_id,
            attempt = attempt,
            newly_added = ?payload.newly_added_prestation_ids,
            "Checking fiche navette for package conversion"
        );

        let mut doctor_selection = payload.doctor_selection;
        let mut converted = 0u32;
        loop {
            if converted >= MAX_CONVERSION_ROUNDS {
                warn!(
                    fiche_navette_id = fiche_navette_id,
                    rounds = converted,
                    "Conversion did not settle, leaving the rest to the next check"
                );
                return Ok(JobOutcome::Completed);
            }

            let decision = match self
                .preparer
                .evaluate_current(
                    fiche_navette_id,
                    &payload.newly_added_prestation_ids,
                    doctor_selection.take(),
                )
                .await
            {
                Ok(decision) => decision,
                Err(NavetteError::RequestNotFound(_)) => {
                    return Ok(JobOutcome::Skipped(format!(
                        "fiche navette {fiche_navette_id} no longer exists"
                    )));
                }
                Err(NavetteError::MultipleDoctors {
                    fiche_navette_id,
                    package_id,
                    doctor_ids,
                }) => {
                    self.announce_conflict(fiche_navette_id, package_id, &doctor_ids)
                        .await;
                    log_conversion_operation(
                        "evaluate",
                        fiche_navette_id,
                        Some(package_id),
                        "doctor_conflict",
                        None,
                    );
                    return Err(NavetteError::MultipleDoctors {
                        fiche_navette_id,
                        package_id,
                        doctor_ids,
                    });
                }
                Err(error) => return Err(error),
            };

            let Some(package_id) = decision.package_id.filter(|_| decision.should_convert) else {
                debug!(
                    fiche_navette_id = fiche_navette_id,
                    conversions = converted,
                    reason = %decision.reason,
                    "No further package conversion"
                );
                return Ok(JobOutcome::Completed);
            };

            match self
                .executor
                .execute(
                    fiche_navette_id,
                    package_id,
                    &decision.item_ids(),
                    decision.doctor_id,
                )
                .await
            {
                Ok(outcome) => {
                    converted += 1;
                    info!(
                        fiche_navette_id = fiche_navette_id,
                        package_id = package_id,
                        attempt = attempt,
                        round = converted,
                        removed_item_ids = ?outcome.removed_item_ids,
                        "Converted items to package"
                    );
                }
                Err(NavetteError::RequestNotFound(_)) => {
                    return Ok(JobOutcome::Skipped(format!(
                        "fiche navette {fiche_navette_id} was deleted before conversion"
                    )));
                }
                Err(error) => return Err(error),
            }
        }
    }
}
