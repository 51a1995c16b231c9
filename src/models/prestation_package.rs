//! # Prestation Package
//!
//! Read-mostly reference data: a named bundle of prestations sold at a fixed
//! price. Stored as `prestation_packages` plus the `prestation_package_items`
//! join table; repositories aggregate the join into `prestation_ids`.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PrestationPackage {
    pub package_id: i64,
    pub name: String,
    pub price: Decimal,
    pub prestation_ids: Vec<i64>,
}

impl PrestationPackage {
    /// The distinct prestations the package requires
    pub fn required_set(&self) -> BTreeSet<i64> {
        self.prestation_ids.iter().copied().collect()
    }

    /// True when every required prestation is present in `candidates`
    pub fn is_satisfied_by(&self, candidates: &BTreeSet<i64>) -> bool {
        !self.prestation_ids.is_empty()
            && self.prestation_ids.iter().all(|id| candidates.contains(id))
    }
}
