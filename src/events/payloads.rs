//! Typed payloads for the events the conversion workflow emits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::events;

/// Items were replaced by a package item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageConvertedPayload {
    pub fiche_navette_id: i64,
    pub package_id: i64,
    pub package_name: String,
    pub package_price: Decimal,
    pub new_item_id: i64,
    pub removed_item_ids: Vec<i64>,
    /// An item being replaced was itself a package
    pub is_cascading: bool,
    pub old_package_ids: Vec<i64>,
    pub doctor_id: Option<i64>,
    pub previous_total: Decimal,
    pub new_total: Decimal,
    pub converted_at: DateTime<Utc>,
}

/// A package matched but the items belong to several doctors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConflictPayload {
    pub fiche_navette_id: i64,
    pub package_id: i64,
    pub doctor_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalChangeReason {
    ItemsAdded,
    ItemRemoved,
    PriceUpdated,
    Recalculated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalRecalculatedPayload {
    pub fiche_navette_id: i64,
    pub previous_total: Decimal,
    pub new_total: Decimal,
    pub reason: TotalChangeReason,
    /// The floor at zero had to be applied
    pub clamped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDeadLetteredPayload {
    pub job_id: String,
    pub queue: String,
    pub attempts: u32,
    pub error: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    PackageConverted(PackageConvertedPayload),
    ConversionConflict(ConversionConflictPayload),
    TotalRecalculated(TotalRecalculatedPayload),
    JobDeadLettered(JobDeadLetteredPayload),
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PackageConverted(_) => events::PACKAGE_CONVERTED,
            Self::ConversionConflict(_) => events::CONVERSION_CONFLICT,
            Self::TotalRecalculated(_) => events::TOTAL_RECALCULATED,
            Self::JobDeadLettered(_) => events::JOB_DEAD_LETTERED,
        }
    }

    pub fn context(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::PackageConverted(payload) => serde_json::to_value(payload),
            Self::ConversionConflict(payload) => serde_json::to_value(payload),
            Self::TotalRecalculated(payload) => serde_json::to_value(payload),
            Self::JobDeadLettered(payload) => serde_json::to_value(payload),
        }
    }
}
