//! # Service Request (fiche navette)
//!
//! A patient's open visit/billing aggregate. The `total_amount` column is
//! derived data: it always equals the sum of the live items' final prices and
//! is only ever written by item add/remove/update operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::service_request_item::ServiceRequestItem;

/// Maps to the `fiche_navettes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ServiceRequest {
    pub fiche_navette_id: i64,
    pub patient_id: i64,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A request together with its live items, read in one go
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub request: ServiceRequest,
    pub items: Vec<ServiceRequestItem>,
}

impl RequestSnapshot {
    /// Sum of the live items' final prices
    pub fn items_total(&self) -> Decimal {
        self.items.iter().map(|item| item.final_price).sum()
    }

    pub fn item(&self, item_id: i64) -> Option<&ServiceRequestItem> {
        self.items.iter().find(|item| item.item_id == item_id)
    }

    /// Items that can still take part in a conversion
    pub fn convertible_items(&self) -> impl Iterator<Item = &ServiceRequestItem> {
        self.items.iter().filter(|item| item.status.is_convertible())
    }
}
