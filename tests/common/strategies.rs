#![allow(dead_code)]

use std::collections::BTreeSet;

use chrono::Utc;
use navette_core::models::{ItemStatus, PrestationPackage, ServiceRequestItem};
use proptest::prelude::*;
use rust_decimal::Decimal;

pub const FICHE_NAVETTE_ID: i64 = 1;

/// Prestation ids drawn from a small universe so packages overlap often
pub fn prestation_set_strategy() -> impl Strategy<Value = BTreeSet<i64>> {
    prop::collection::btree_set(1i64..=6, 1..=4)
}

/// A catalogue of packages with ids 100, 101, ...
pub fn catalogue_strategy() -> impl Strategy<Value = Vec<PrestationPackage>> {
    prop::collection::vec((prestation_set_strategy(), 100i64..10_000), 1..6).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(index, (prestations, cents))| PrestationPackage {
                package_id: 100 + index as i64,
                name: format!("package-{index}"),
                price: Decimal::new(cents, 2),
                prestation_ids: prestations.into_iter().collect(),
            })
            .collect()
    })
}

/// One pending standalone item per prestation, single doctor
pub fn items_strategy() -> impl Strategy<Value = Vec<ServiceRequestItem>> {
    (
        prop::collection::btree_set(1i64..=6, 1..=6),
        prop::collection::vec(100i64..5_000, 6),
    )
        .prop_map(|(prestations, prices)| {
            prestations
                .into_iter()
                .zip(prices)
                .enumerate()
                .map(|(index, (prestation_id, cents))| ServiceRequestItem {
                    item_id: index as i64 + 1,
                    fiche_navette_id: FICHE_NAVETTE_ID,
                    prestation_id: Some(prestation_id),
                    package_id: None,
                    doctor_id: Some(7),
                    final_price: Decimal::new(cents, 2),
                    status: ItemStatus::Pending,
                    created_at: Utc::now(),
                })
                .collect()
        })
}
