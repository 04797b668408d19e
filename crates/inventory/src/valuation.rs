//! Per-item valuation: dispatches to layer tracking or weighted average.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, LocationId, ProductVariationId};

use crate::checked;
use crate::costing::{CostingMethod, OversoldPolicy, ValuationWarning};
use crate::layers::{CostLayer, CostLayerTracker, LayerOrder, outbound_total};
use crate::movement::{Movement, StockSnapshot};
use crate::weighted_average::WeightedAverageCalculator;

/// Value of one product variation's stock at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub product_variation_id: ProductVariationId,
    pub location_id: LocationId,
    pub method: CostingMethod,
    pub current_quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    /// Remaining layers for FIFO/LIFO; always empty for weighted average.
    pub cost_layers: Vec<CostLayer>,
    /// Quantity drawn down by outbound movements and its cost.
    pub consumed_quantity: Decimal,
    pub consumed_value: Decimal,
    pub warnings: Vec<ValuationWarning>,
}

impl ValuationResult {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Value `snapshot`'s item from its full movement history.
///
/// `movements` may arrive in any order; every movement must belong to the
/// snapshot's (product variation, location) pair.
pub fn valuate_item(
    snapshot: &StockSnapshot,
    movements: &[Movement],
    method: CostingMethod,
    policy: OversoldPolicy,
) -> DomainResult<ValuationResult> {
    if let Some(stray) = movements.iter().find(|m| {
        m.product_variation_id != snapshot.product_variation_id || m.location_id != snapshot.location_id
    }) {
        return Err(DomainError::invariant(format!(
            "movement {} does not belong to the valued item",
            stray.id
        )));
    }

    match method {
        CostingMethod::Fifo => by_layers(snapshot, movements, method, LayerOrder::OldestFirst, policy),
        CostingMethod::Lifo => by_layers(snapshot, movements, method, LayerOrder::NewestFirst, policy),
        CostingMethod::WeightedAverage => by_weighted_average(snapshot, movements, policy),
    }
}

fn by_layers(
    snapshot: &StockSnapshot,
    movements: &[Movement],
    method: CostingMethod,
    order: LayerOrder,
    policy: OversoldPolicy,
) -> DomainResult<ValuationResult> {
    let valued = CostLayerTracker::from_movements(order, movements)
        .consume(outbound_total(movements)?, policy)?;

    Ok(ValuationResult {
        product_variation_id: snapshot.product_variation_id,
        location_id: snapshot.location_id,
        method,
        current_quantity: valued.current_quantity,
        unit_cost: valued.unit_cost,
        total_value: valued.total_value,
        cost_layers: valued.layers,
        consumed_quantity: valued.consumed_quantity,
        consumed_value: valued.consumed_value,
        warnings: valued.warnings,
    })
}

/// Weighted average cannot derive quantity on its own, so it trusts the
/// snapshot; a negative snapshot goes through the oversold policy.
fn by_weighted_average(
    snapshot: &StockSnapshot,
    movements: &[Movement],
    policy: OversoldPolicy,
) -> DomainResult<ValuationResult> {
    let calc = WeightedAverageCalculator::from_movements(movements)?;
    let average = calc.average_cost()?;
    let mut warnings = calc.into_warnings();

    let mut quantity = snapshot.quantity;
    if quantity < Decimal::ZERO {
        let shortfall = -quantity;
        match policy {
            OversoldPolicy::Reject => {
                return Err(DomainError::invariant(format!(
                    "stock snapshot is negative by {shortfall}"
                )));
            }
            OversoldPolicy::Warn => quantity = Decimal::ZERO,
            OversoldPolicy::AllowNegative => {}
        }
        warnings.push(ValuationWarning::Oversold {
            unresolved_quantity: shortfall,
        });
    }

    let consumed_quantity = outbound_total(movements)?;
    let total_value = checked::mul(quantity, average)?;
    let consumed_value = checked::mul(consumed_quantity, average)?;

    Ok(ValuationResult {
        product_variation_id: snapshot.product_variation_id,
        location_id: snapshot.location_id,
        method: CostingMethod::WeightedAverage,
        current_quantity: quantity,
        unit_cost: average,
        total_value,
        cost_layers: Vec::new(),
        consumed_quantity,
        consumed_value,
        warnings,
    })
}
