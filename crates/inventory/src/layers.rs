//! Cost layer tracking (FIFO / LIFO).
//!
//! Every inbound movement opens a layer at its own unit cost. Outbound
//! quantity is drawn from those layers in consumption order until it is
//! exhausted; whatever remains is the valued stock.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, MovementId};

use crate::checked;
use crate::costing::{OversoldPolicy, ValuationWarning, effective_cost};
use crate::movement::{Movement, MovementKind};

/// One inbound batch still held at its original cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLayer {
    pub origin_movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    /// Cost per unit; zero when the origin movement had none.
    pub unit_cost: Decimal,
}

impl CostLayer {
    fn ordering_key(&self) -> (DateTime<Utc>, MovementId) {
        (self.occurred_at, self.origin_movement_id)
    }

    pub fn remaining_value(&self) -> DomainResult<Decimal> {
        checked::mul(self.remaining_quantity, self.unit_cost)
    }
}

/// Order in which layers are drawn down.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LayerOrder {
    OldestFirst,
    NewestFirst,
}

/// Outcome of consuming outbound quantity against the layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerValuation {
    /// Layers with stock left, in chronological order.
    pub layers: Vec<CostLayer>,
    pub current_quantity: Decimal,
    pub total_value: Decimal,
    pub unit_cost: Decimal,
    pub consumed_quantity: Decimal,
    pub consumed_value: Decimal,
    pub warnings: Vec<ValuationWarning>,
}

/// In-memory layer set for a single (product variation, location) pair.
///
/// Lives for one valuation run only.
#[derive(Debug, Clone)]
pub struct CostLayerTracker {
    order: LayerOrder,
    layers: Vec<CostLayer>,
    warnings: Vec<ValuationWarning>,
}

impl CostLayerTracker {
    pub fn new(order: LayerOrder) -> Self {
        Self {
            order,
            layers: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Build layers from every movement that adds stock.
    ///
    /// Acquisitions open a layer at their recorded cost. Positive count
    /// corrections open a layer with no cost (and a warning), since the
    /// surplus has no receipt behind it.
    pub fn from_movements<'a>(
        order: LayerOrder,
        movements: impl IntoIterator<Item = &'a Movement>,
    ) -> Self {
        let mut tracker = Self::new(order);
        for m in movements {
            match &m.kind {
                MovementKind::Correction(c) if c.delta() > Decimal::ZERO => {
                    tracker.push_layer(m.id, m.occurred_at, c.delta(), None);
                }
                kind => {
                    if let Some(inbound) = kind.acquisition() {
                        tracker.push_layer(m.id, m.occurred_at, inbound.quantity(), inbound.unit_cost());
                    }
                }
            }
        }
        tracker
    }

    pub fn push_layer(
        &mut self,
        origin_movement_id: MovementId,
        occurred_at: DateTime<Utc>,
        quantity: Decimal,
        unit_cost: Option<Decimal>,
    ) {
        let unit_cost = effective_cost(origin_movement_id, quantity, unit_cost, &mut self.warnings);
        self.layers.push(CostLayer {
            origin_movement_id,
            occurred_at,
            original_quantity: quantity,
            remaining_quantity: quantity,
            unit_cost,
        });
    }

    /// Draw `outbound` units from the layers and value what is left.
    pub fn consume(mut self, outbound: Decimal, policy: OversoldPolicy) -> DomainResult<LayerValuation> {
        self.layers.sort_by_key(CostLayer::ordering_key);
        if self.order == LayerOrder::NewestFirst {
            self.layers.reverse();
        }

        let mut outstanding = outbound.max(Decimal::ZERO);
        let mut consumed_quantity = Decimal::ZERO;
        let mut consumed_value = Decimal::ZERO;
        let mut last_drawn_cost = None;

        for layer in self.layers.iter_mut() {
            if outstanding.is_zero() {
                break;
            }
            let take = layer.remaining_quantity.min(outstanding);
            if take.is_zero() {
                continue;
            }
            layer.remaining_quantity -= take;
            outstanding -= take;
            consumed_quantity = checked::add(consumed_quantity, take)?;
            consumed_value = checked::add(consumed_value, checked::mul(take, layer.unit_cost)?)?;
            last_drawn_cost = Some(layer.unit_cost);
        }

        let mut warnings = self.warnings;
        let mut shortfall = Decimal::ZERO;

        if outstanding > Decimal::ZERO {
            match policy {
                OversoldPolicy::Reject => {
                    return Err(DomainError::invariant(format!(
                        "outbound exceeds available layers by {outstanding}"
                    )));
                }
                OversoldPolicy::Warn => {}
                OversoldPolicy::AllowNegative => shortfall = outstanding,
            }
            warnings.push(ValuationWarning::Oversold {
                unresolved_quantity: outstanding,
            });
        }

        let mut layers: Vec<CostLayer> = self
            .layers
            .into_iter()
            .filter(|l| l.remaining_quantity > Decimal::ZERO)
            .collect();
        layers.sort_by_key(CostLayer::ordering_key);

        let mut current_quantity = checked::sum(layers.iter().map(|l| l.remaining_quantity))?;
        let mut total_value = checked::try_sum(layers.iter().map(CostLayer::remaining_value))?;

        if !shortfall.is_zero() {
            // Every layer is exhausted at this point.
            current_quantity = checked::sub(current_quantity, shortfall)?;
            let shortfall_value = checked::mul(shortfall, last_drawn_cost.unwrap_or(Decimal::ZERO))?;
            total_value = checked::sub(total_value, shortfall_value)?;
        }

        let unit_cost = checked::div_or_zero(total_value, current_quantity)?;

        Ok(LayerValuation {
            layers,
            current_quantity,
            total_value,
            unit_cost,
            consumed_quantity,
            consumed_value,
            warnings,
        })
    }
}

/// Total quantity leaving the location across `movements`.
pub fn outbound_total<'a>(movements: impl IntoIterator<Item = &'a Movement>) -> DomainResult<Decimal> {
    checked::sum(
        movements
            .into_iter()
            .map(Movement::signed_quantity)
            .filter(|q| q.is_sign_negative())
            .map(|q| -q),
    )
}
