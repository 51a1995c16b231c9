//! # Total Arithmetic
//!
//! Every change to a fiche navette total goes through here so the floor policy
//! and money rounding are applied in exactly one place.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::MONEY_SCALE;
use crate::error::{NavetteError, Result};
use crate::models::ServiceRequestItem;

/// Behaviour when a recalculated total drops below zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FloorPolicy {
    /// Floor at zero and log a warning
    #[default]
    Clamp,
    /// Abort the transaction with [`NavetteError::NegativeTotal`]
    Reject,
}

/// How item delete/update events keep the total in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecalculationStrategy {
    /// Recompute from the live items; duplicate events cannot drift the total
    #[default]
    Resum,
    /// Apply the price delta to the stored total
    Incremental,
}

/// Outcome of a total recalculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalAdjustment {
    pub previous: Decimal,
    /// Value before the floor was applied
    pub computed: Decimal,
    pub new_total: Decimal,
    pub clamped: bool,
}

impl TotalAdjustment {
    pub fn changed(&self) -> bool {
        self.previous != self.new_total
    }
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

impl FloorPolicy {
    pub fn apply(
        &self,
        fiche_navette_id: i64,
        previous: Decimal,
        computed: Decimal,
    ) -> Result<TotalAdjustment> {
        let computed = round_money(computed);
        if computed >= Decimal::ZERO {
            return Ok(TotalAdjustment {
                previous,
                computed,
                new_total: computed,
                clamped: false,
            });
        }

        match self {
            FloorPolicy::Clamp => {
                warn!(
                    fiche_navette_id = fiche_navette_id,
                    previous_total = %previous,
                    computed_total = %computed,
                    "Total would go negative, clamping to zero"
                );
                Ok(TotalAdjustment {
                    previous,
                    computed,
                    new_total: Decimal::ZERO,
                    clamped: true,
                })
            }
            FloorPolicy::Reject => Err(NavetteError::NegativeTotal {
                fiche_navette_id,
                computed,
            }),
        }
    }
}

/// `previous + delta`, floored
pub fn apply_delta(
    policy: FloorPolicy,
    fiche_navette_id: i64,
    previous: Decimal,
    delta: Decimal,
) -> Result<TotalAdjustment> {
    policy.apply(fiche_navette_id, previous, previous + delta)
}

/// `previous - sum(removed) + package_price`, floored
pub fn conversion_total(
    policy: FloorPolicy,
    fiche_navette_id: i64,
    previous: Decimal,
    removed_prices: &[Decimal],
    package_price: Decimal,
) -> Result<TotalAdjustment> {
    let removed: Decimal = removed_prices.iter().copied().sum();
    policy.apply(fiche_navette_id, previous, previous - removed + package_price)
}

/// Sum of the given live items, floored
pub fn resum(
    policy: FloorPolicy,
    fiche_navette_id: i64,
    previous: Decimal,
    items: &[ServiceRequestItem],
) -> Result<TotalAdjustment> {
    let sum: Decimal = items.iter().map(|item| item.final_price).sum();
    policy.apply(fiche_navette_id, previous, sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn test_delete_subtracts_price() {
        let adjustment = apply_delta(FloorPolicy::Clamp, 1, money(1000), -money(400)).unwrap();
        assert_eq!(adjustment.new_total, money(600));
        assert!(!adjustment.clamped);
        assert!(adjustment.changed());
    }

    #[test]
    fn test_clamp_floors_at_zero() {
        let adjustment = apply_delta(FloorPolicy::Clamp, 1, money(200), -money(400)).unwrap();
        assert_eq!(adjustment.new_total, Decimal::ZERO);
        assert_eq!(adjustment.computed, -money(200));
        assert!(adjustment.clamped);
    }

    #[test]
    fn test_reject_surfaces_negative_total() {
        let err = apply_delta(FloorPolicy::Reject, 5, money(200), -money(400)).unwrap_err();
        assert_eq!(
            err,
            NavetteError::NegativeTotal {
                fiche_navette_id: 5,
                computed: -money(200),
            }
        );
    }

    #[test]
    fn test_conversion_total() {
        let adjustment = conversion_total(
            FloorPolicy::Clamp,
            1,
            money(2500),
            &[money(800), money(1200)],
            money(1500),
        )
        .unwrap();
        assert_eq!(adjustment.new_total, money(2000));
    }

    #[test]
    fn test_rounding_to_two_places() {
        assert_eq!(round_money(Decimal::new(10005, 3)), money(1001));
        assert_eq!(round_money(Decimal::new(10004, 3)), money(1000));
    }

    #[test]
    fn test_policy_serde_names() {
        assert_eq!(serde_json::to_string(&FloorPolicy::Reject).unwrap(), "\"reject\"");
        assert_eq!(
            serde_json::from_str::<RecalculationStrategy>("\"incremental\"").unwrap(),
            RecalculationStrategy::Incremental
        );
    }
}
