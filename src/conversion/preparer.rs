//! # Conversion Preparer
//!
//! Decides whether the prestations on a fiche navette now satisfy a package
//! definition, and which items a conversion would replace.
//!
//! Matching rules:
//! - The candidate set is the union of newly added and existing prestation ids.
//!   A package item already on the request contributes its package's
//!   prestations, so a bigger package can absorb a smaller one (cascading).
//! - A package matches when its required set is contained in the candidate set.
//!   The largest required set wins, ties go to the lowest package id.
//! - Only `pending` items are used. Each required prestation is covered by the
//!   lowest-id item providing it; a package item is only used when its whole
//!   content fits inside the target package.
//! - A package that is already the sole item covering its prestations is not
//!   applied again. An item of the package itself never counts toward it, so
//!   a second full set of its prestations still converts.
//! - Items ordered by more than one doctor need an explicit doctor selection.
//!
//! [`evaluate`] is a pure function; [`ConversionPreparer`] only adds the reads.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NavetteError, Result};
use crate::models::{PrestationPackage, ServiceRequestItem};
use crate::store::Store;

/// Everything the decision depends on
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub fiche_navette_id: i64,
    pub newly_added_prestation_ids: &'a [i64],
    pub existing_prestation_ids: &'a [i64],
    pub items: &'a [ServiceRequestItem],
    pub packages: &'a [PrestationPackage],
    pub doctor_selection: Option<i64>,
}

/// An item a conversion would remove
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemToRemove {
    pub item_id: i64,
    pub prestation_id: Option<i64>,
    /// Set when the item is itself a package (cascading replacement)
    pub package_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionDecision {
    pub should_convert: bool,
    pub package_id: Option<i64>,
    pub items_to_remove: Vec<ItemToRemove>,
    /// Doctor the package item is attributed to
    pub doctor_id: Option<i64>,
    pub reason: String,
}

impl ConversionDecision {
    fn no_conversion(reason: impl Into<String>) -> Self {
        Self {
            should_convert: false,
            package_id: None,
            items_to_remove: Vec::new(),
            doctor_id: None,
            reason: reason.into(),
        }
    }

    pub fn item_ids(&self) -> Vec<i64> {
        self.items_to_remove.iter().map(|item| item.item_id).collect()
    }

    pub fn is_cascading(&self) -> bool {
        self.items_to_remove
            .iter()
            .any(|item| item.package_id.is_some())
    }
}

/// Prestations an item stands for: its own, or its package's content
fn contribution(
    item: &ServiceRequestItem,
    packages_by_id: &HashMap<i64, &PrestationPackage>,
) -> BTreeSet<i64> {
    match (item.package_id, item.prestation_id) {
        (Some(package_id), _) => packages_by_id
            .get(&package_id)
            .map(|package| package.required_set())
            .unwrap_or_default(),
        (None, Some(prestation_id)) => BTreeSet::from([prestation_id]),
        (None, None) => BTreeSet::new(),
    }
}

/// Prestation ids currently represented by the request's convertible items
pub fn existing_prestation_ids(
    items: &[ServiceRequestItem],
    packages: &[PrestationPackage],
) -> Vec<i64> {
    let packages_by_id: HashMap<i64, &PrestationPackage> =
        packages.iter().map(|p| (p.package_id, p)).collect();
    items
        .iter()
        .filter(|item| item.status.is_convertible())
        .flat_map(|item| contribution(item, &packages_by_id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Decide whether a conversion applies. No side effects.
pub fn evaluate(input: &EvaluationInput<'_>) -> Result<ConversionDecision> {
    let candidates: BTreeSet<i64> = input
        .newly_added_prestation_ids
        .iter()
        .chain(input.existing_prestation_ids)
        .copied()
        .collect();

    if candidates.is_empty() {
        return Ok(ConversionDecision::no_conversion("no prestations to match"));
    }

    let mut ranked: Vec<&PrestationPackage> = input
        .packages
        .iter()
        .filter(|package| package.is_satisfied_by(&candidates))
        .collect();
    ranked.sort_by_key(|package| (Reverse(package.required_set().len()), package.package_id));

    if ranked.is_empty() {
        return Ok(ConversionDecision::no_conversion(
            "no package definition is contained in the current prestations",
        ));
    }

    let packages_by_id: HashMap<i64, &PrestationPackage> = input
        .packages
        .iter()
        .map(|package| (package.package_id, package))
        .collect();

    let mut convertible: Vec<&ServiceRequestItem> = input
        .items
        .iter()
        .filter(|item| {
            item.fiche_navette_id == input.fiche_navette_id && item.status.is_convertible()
        })
        .collect();
    convertible.sort_by_key(|item| item.item_id);

    let mut last_reason = String::new();
    for package in ranked {
        let required = package.required_set();
        let mut selected: Vec<&ServiceRequestItem> = Vec::new();
        let mut covered: BTreeSet<i64> = BTreeSet::new();
        let mut holds_own_item = false;

        for item in &convertible {
            if item.package_id == Some(package.package_id) {
                holds_own_item = true;
                continue;
            }
            let provides = contribution(item, &packages_by_id);
            if provides.is_empty()
                || !provides.is_subset(&required)
                || !provides.is_disjoint(&covered)
            {
                continue;
            }
            covered.extend(provides);
            selected.push(*item);
        }

        if covered != required && holds_own_item {
            last_reason = format!("package {} is already applied", package.package_id);
            continue;
        }

        if covered != required {
            debug!(
                fiche_navette_id = input.fiche_navette_id,
                package_id = package.package_id,
                "Package matched but its prestations are not all held by convertible items"
            );
            last_reason = format!(
                "package {} matched but not all of its prestations are on convertible items",
                package.package_id
            );
            continue;
        }

        // One package item already holding exactly these prestations
        if selected.len() == 1 && selected[0].package_id.is_some() {
            last_reason = format!("package {} is already applied", package.package_id);
            continue;
        }

        let doctor_id = resolve_doctor(input, package.package_id, &selected)?;

        let items_to_remove = selected
            .iter()
            .map(|item| ItemToRemove {
                item_id: item.item_id,
                prestation_id: item.prestation_id,
                package_id: item.package_id,
            })
            .collect();

        return Ok(ConversionDecision {
            should_convert: true,
            package_id: Some(package.package_id),
            items_to_remove,
            doctor_id,
            reason: format!(
                "prestations {:?} match package {} ({})",
                required, package.package_id, package.name
            ),
        });
    }

    Ok(ConversionDecision::no_conversion(last_reason))
}

fn resolve_doctor(
    input: &EvaluationInput<'_>,
    package_id: i64,
    selected: &[&ServiceRequestItem],
) -> Result<Option<i64>> {
    let doctors: BTreeSet<i64> = selected.iter().filter_map(|item| item.doctor_id).collect();

    match (doctors.len(), input.doctor_selection) {
        (0, None) => Ok(None),
        (_, Some(selection)) if doctors.contains(&selection) => Ok(Some(selection)),
        (_, Some(selection)) => Err(NavetteError::InvalidDoctorSelection {
            doctor_id: selection,
            doctor_ids: doctors.into_iter().collect(),
        }),
        (1, None) => Ok(doctors.into_iter().next()),
        (_, None) => Err(NavetteError::MultipleDoctors {
            fiche_navette_id: input.fiche_navette_id,
            package_id,
            doctor_ids: doctors.into_iter().collect(),
        }),
    }
}

/// Store-backed preparer: loads the current snapshot and package catalogue,
/// then delegates to [`evaluate`]
#[derive(Clone)]
pub struct ConversionPreparer {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for ConversionPreparer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionPreparer")
            .field("store", &self.store.provider_name())
            .finish()
    }
}

impl ConversionPreparer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Evaluate with caller-supplied existing prestations
    pub async fn evaluate(
        &self,
        fiche_navette_id: i64,
        newly_added_prestation_ids: &[i64],
        existing_prestation_ids: &[i64],
        doctor_selection: Option<i64>,
    ) -> Result<ConversionDecision> {
        let snapshot = self
            .store
            .load_snapshot(fiche_navette_id)
            .await?
            .ok_or(NavetteError::RequestNotFound(fiche_navette_id))?;
        let packages = self.store.list_packages().await?;

        evaluate(&EvaluationInput {
            fiche_navette_id,
            newly_added_prestation_ids,
            existing_prestation_ids,
            items: &snapshot.items,
            packages: &packages,
            doctor_selection,
        })
    }

    /// Evaluate against whatever is on the request right now
    pub async fn evaluate_current(
        &self,
        fiche_navette_id: i64,
        newly_added_prestation_ids: &[i64],
        doctor_selection: Option<i64>,
    ) -> Result<ConversionDecision> {
        let snapshot = self
            .store
            .load_snapshot(fiche_navette_id)
            .await?
            .ok_or(NavetteError::RequestNotFound(fiche_navette_id))?;
        let packages = self.store.list_packages().await?;
        let existing = existing_prestation_ids(&snapshot.items, &packages);

        evaluate(&EvaluationInput {
            fiche_navette_id,
            newly_added_prestation_ids,
            existing_prestation_ids: &existing,
            items: &snapshot.items,
            packages: &packages,
            doctor_selection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemStatus;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn package(package_id: i64, prestation_ids: &[i64], cents: i64) -> PrestationPackage {
        PrestationPackage {
            package_id,
            name: format!("package-{package_id}"),
            price: Decimal::new(cents, 2),
            prestation_ids: prestation_ids.to_vec(),
        }
    }

    fn prestation_item(item_id: i64, prestation_id: i64, doctor_id: Option<i64>) -> ServiceRequestItem {
        ServiceRequestItem {
            item_id,
            fiche_navette_id: 1,
            prestation_id: Some(prestation_id),
            package_id: None,
            doctor_id,
            final_price: Decimal::new(1000, 2),
            status: ItemStatus::Pending,
            created_at: Utc::now(),
        }
    }

    fn package_item(item_id: i64, package_id: i64) -> ServiceRequestItem {
        ServiceRequestItem {
            prestation_id: None,
            package_id: Some(package_id),
            ..prestation_item(item_id, 0, Some(1))
        }
    }

    fn input<'a>(
        items: &'a [ServiceRequestItem],
        packages: &'a [PrestationPackage],
        newly_added: &'a [i64],
        existing: &'a [i64],
    ) -> EvaluationInput<'a> {
        EvaluationInput {
            fiche_navette_id: 1,
            newly_added_prestation_ids: newly_added,
            existing_prestation_ids: existing,
            items,
            packages,
            doctor_selection: None,
        }
    }

    #[test]
    fn test_exact_match_converts() {
        let items = [prestation_item(1, 10, Some(7)), prestation_item(2, 20, Some(7))];
        let packages = [package(100, &[10, 20], 1500)];

        let decision = evaluate(&input(&items, &packages, &[20], &[10])).unwrap();

        assert!(decision.should_convert);
        assert_eq!(decision.package_id, Some(100));
        assert_eq!(decision.item_ids(), vec![1, 2]);
        assert_eq!(decision.doctor_id, Some(7));
        assert!(!decision.is_cascading());
    }

    #[test]
    fn test_largest_package_wins_then_lowest_id() {
        let items = [
            prestation_item(1, 10, None),
            prestation_item(2, 20, None),
            prestation_item(3, 30, None),
        ];
        let packages = [
            package(5, &[10, 20], 1000),
            package(9, &[10, 20, 30], 2000),
            package(7, &[20, 30, 10], 1800),
        ];

        let decision = evaluate(&input(&items, &packages, &[30], &[10, 20])).unwrap();
        assert_eq!(decision.package_id, Some(7));
        assert_eq!(decision.item_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_no_match_leaves_items_alone() {
        let items = [prestation_item(1, 10, None)];
        let packages = [package(100, &[10, 20], 1500)];

        let decision = evaluate(&input(&items, &packages, &[10], &[])).unwrap();
        assert!(!decision.should_convert);
        assert!(decision.items_to_remove.is_empty());
        assert!(decision.reason.contains("no package"));
    }

    #[test]
    fn test_multiple_doctors_without_selection_fails() {
        let items = [prestation_item(1, 10, Some(4)), prestation_item(2, 20, Some(2))];
        let packages = [package(100, &[10, 20], 1500)];

        let err = evaluate(&input(&items, &packages, &[20], &[10])).unwrap_err();
        assert_eq!(
            err,
            NavetteError::MultipleDoctors {
                fiche_navette_id: 1,
                package_id: 100,
                doctor_ids: vec![2, 4],
            }
        );
    }

    #[test]
    fn test_doctor_selection_resolves_conflict() {
        let items = [prestation_item(1, 10, Some(4)), prestation_item(2, 20, Some(2))];
        let packages = [package(100, &[10, 20], 1500)];
        let mut evaluation = input(&items, &packages, &[20], &[10]);

        evaluation.doctor_selection = Some(4);
        let decision = evaluate(&evaluation).unwrap();
        assert_eq!(decision.doctor_id, Some(4));

        evaluation.doctor_selection = Some(99);
        let err = evaluate(&evaluation).unwrap_err();
        assert!(matches!(err, NavetteError::InvalidDoctorSelection { doctor_id: 99, .. }));
    }

    #[test]
    fn test_cascading_absorbs_existing_package() {
        let items = [package_item(1, 100), prestation_item(2, 30, Some(1))];
        let packages = [package(100, &[10, 20], 1500), package(200, &[10, 20, 30], 2200)];
        let existing = existing_prestation_ids(&items, &packages);
        assert_eq!(existing, vec![10, 20, 30]);

        let decision = evaluate(&input(&items, &packages, &[30], &existing)).unwrap();
        assert!(decision.should_convert);
        assert_eq!(decision.package_id, Some(200));
        assert!(decision.is_cascading());
        assert_eq!(
            decision.items_to_remove[0],
            ItemToRemove {
                item_id: 1,
                prestation_id: None,
                package_id: Some(100),
            }
        );
    }

    #[test]
    fn test_applied_package_is_not_reapplied() {
        let items = [package_item(1, 100)];
        let packages = [package(100, &[10, 20], 1500)];
        let existing = existing_prestation_ids(&items, &packages);

        let decision = evaluate(&input(&items, &packages, &[], &existing)).unwrap();
        assert!(!decision.should_convert);
        assert!(decision.reason.contains("already applied"));
    }

    #[test]
    fn test_settled_items_are_not_converted() {
        let mut paid = prestation_item(1, 10, None);
        paid.status = ItemStatus::Paid;
        let items = [paid, prestation_item(2, 20, None)];
        let packages = [package(100, &[10, 20], 1500)];

        let decision = evaluate(&input(&items, &packages, &[20], &[10])).unwrap();
        assert!(!decision.should_convert);
    }

    #[test]
    fn test_duplicate_prestation_uses_lowest_item() {
        let items = [
            prestation_item(4, 10, None),
            prestation_item(2, 10, None),
            prestation_item(3, 20, None),
        ];
        let packages = [package(100, &[10, 20], 1500)];

        let decision = evaluate(&input(&items, &packages, &[10], &[10, 20])).unwrap();
        assert_eq!(decision.item_ids(), vec![2, 3]);
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let items = [prestation_item(1, 10, Some(3)), prestation_item(2, 20, Some(3))];
        let packages = [package(100, &[10, 20], 1500)];
        let evaluation = input(&items, &packages, &[20], &[10]);

        assert_eq!(evaluate(&evaluation).unwrap(), evaluate(&evaluation).unwrap());
    }

    #[test]
    fn test_second_full_set_converts_next_to_applied_package() {
        let items = [
            package_item(1, 100),
            prestation_item(2, 10, Some(1)),
            prestation_item(3, 20, Some(1)),
        ];
        let packages = [package(100, &[10, 20], 1500)];
        let existing = existing_prestation_ids(&items, &packages);

        let decision = evaluate(&input(&items, &packages, &[10, 20], &existing)).unwrap();
        assert!(decision.should_convert);
        assert_eq!(decision.package_id, Some(100));
        assert_eq!(decision.item_ids(), vec![2, 3]);
        assert!(!decision.is_cascading());
    }

    #[test]
    fn test_doctor_selection_needs_a_doctor_on_the_items() {
        let items = [prestation_item(1, 10, None), prestation_item(2, 20, None)];
        let packages = [package(100, &[10, 20], 1500)];
        let mut evaluation = input(&items, &packages, &[20], &[10]);

        assert_eq!(evaluate(&evaluation).unwrap().doctor_id, None);

        evaluation.doctor_selection = Some(5);
        let err = evaluate(&evaluation).unwrap_err();
        assert_eq!(
            err,
            NavetteError::InvalidDoctorSelection {
                doctor_id: 5,
                doctor_ids: Vec::new(),
            }
        );
    }

    #[test]
    fn test_package_with_identical_content_does_not_replace_applied_one() {
        let items = [package_item(1, 200)];
        let packages = [package(100, &[10, 20], 1500), package(200, &[10, 20], 1400)];
        let existing = existing_prestation_ids(&items, &packages);

        let decision = evaluate(&input(&items, &packages, &[], &existing)).unwrap();
        assert!(!decision.should_convert);
    }
}
