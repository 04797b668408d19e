//! Weighted-average (AVCO) costing.

use rust_decimal::Decimal;

use stockledger_core::{DomainResult, MovementId};

use crate::checked;
use crate::costing::{ValuationWarning, effective_cost};
use crate::movement::Movement;

/// Running blend of every acquisition seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightedAverageCalculator {
    quantity: Decimal,
    value: Decimal,
    warnings: Vec<ValuationWarning>,
}

impl WeightedAverageCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in every acquisition (purchase, transfer-in, opening stock).
    ///
    /// Corrections and outbound movements carry no acquisition cost and do
    /// not move the average.
    pub fn from_movements<'a>(movements: impl IntoIterator<Item = &'a Movement>) -> DomainResult<Self> {
        let mut calc = Self::new();
        for m in movements {
            if let Some(inbound) = m.kind.acquisition() {
                calc.record(m.id, inbound.quantity(), inbound.unit_cost())?;
            }
        }
        Ok(calc)
    }

    pub fn record(
        &mut self,
        movement_id: MovementId,
        quantity: Decimal,
        unit_cost: Option<Decimal>,
    ) -> DomainResult<()> {
        let cost = effective_cost(movement_id, quantity, unit_cost, &mut self.warnings);
        let value = checked::add(self.value, checked::mul(quantity, cost)?)?;
        self.quantity = checked::add(self.quantity, quantity)?;
        self.value = value;
        Ok(())
    }

    /// `Σ(qty × cost) / Σ qty`, or zero before any acquisition.
    pub fn average_cost(&self) -> DomainResult<Decimal> {
        checked::div_or_zero(self.value, self.quantity)
    }

    pub fn inbound_quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn warnings(&self) -> &[ValuationWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<ValuationWarning> {
        self.warnings
    }
}
