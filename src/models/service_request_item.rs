//! # Service Request Item
//!
//! One billable line on a fiche navette: either a standalone prestation or a
//! package. Maps to the `fiche_navette_items` table.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Billing status of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Added to the request, not yet settled
    #[default]
    Pending,
    /// Settled at the caisse
    Paid,
    /// Service delivered
    Consumed,
    /// Withdrawn by staff
    Cancelled,
}

impl ItemStatus {
    /// Only unsettled items can be folded into a package
    pub fn is_convertible(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::Consumed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Paid => write!(f, "paid"),
            Self::Consumed => write!(f, "consumed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "consumed" => Ok(Self::Consumed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid item status: {s}")),
        }
    }
}

impl TryFrom<String> for ItemStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ServiceRequestItem {
    pub item_id: i64,
    pub fiche_navette_id: i64,
    /// Unset for package items
    pub prestation_id: Option<i64>,
    /// Unset for standalone prestations
    pub package_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub final_price: Decimal,
    #[sqlx(try_from = "String")]
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

impl ServiceRequestItem {
    pub fn is_package(&self) -> bool {
        self.package_id.is_some()
    }
}

/// New item for insertion (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewServiceRequestItem {
    pub prestation_id: Option<i64>,
    pub package_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub final_price: Decimal,
}

impl NewServiceRequestItem {
    pub fn prestation(prestation_id: i64, doctor_id: Option<i64>, final_price: Decimal) -> Self {
        Self {
            prestation_id: Some(prestation_id),
            package_id: None,
            doctor_id,
            final_price,
        }
    }

    pub fn package(package_id: i64, doctor_id: Option<i64>, final_price: Decimal) -> Self {
        Self {
            prestation_id: None,
            package_id: Some(package_id),
            doctor_id,
            final_price,
        }
    }

    /// Exactly one of prestation/package must be set and the price must not be negative
    pub fn validate(&self) -> Result<(), String> {
        match (self.prestation_id, self.package_id) {
            (Some(_), Some(_)) => {
                return Err("item cannot reference both a prestation and a package".to_string())
            }
            (None, None) => {
                return Err("item must reference a prestation or a package".to_string())
            }
            _ => {}
        }
        if self.final_price.is_sign_negative() {
            return Err(format!("final price {} is negative", self.final_price));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_conversion() {
        assert_eq!(ItemStatus::Consumed.to_string(), "consumed");
        assert_eq!("paid".parse::<ItemStatus>().unwrap(), ItemStatus::Paid);
        assert!("refunded".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ItemStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_only_pending_items_convert() {
        assert!(ItemStatus::Pending.is_convertible());
        assert!(!ItemStatus::Paid.is_convertible());
        assert!(!ItemStatus::Consumed.is_convertible());
        assert!(!ItemStatus::Cancelled.is_convertible());
        assert!(ItemStatus::Paid.is_settled());
    }

    #[test]
    fn test_new_item_validation() {
        assert!(NewServiceRequestItem::prestation(1, None, Decimal::new(100, 2))
            .validate()
            .is_ok());

        let both = NewServiceRequestItem {
            prestation_id: Some(1),
            package_id: Some(2),
            doctor_id: None,
            final_price: Decimal::ONE,
        };
        assert!(both.validate().is_err());

        let negative = NewServiceRequestItem::prestation(1, None, Decimal::new(-100, 2));
        assert!(negative.validate().is_err());
    }
}
