//! Costing methods, oversold policy and the warnings a valuation can carry.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, MovementId};

/// How consumed stock is matched against inbound cost.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostingMethod {
    /// Oldest layers are consumed first.
    #[default]
    Fifo,
    /// Newest layers are consumed first.
    Lifo,
    /// One blended cost across every acquisition.
    WeightedAverage,
}

impl CostingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostingMethod::Fifo => "FIFO",
            CostingMethod::Lifo => "LIFO",
            CostingMethod::WeightedAverage => "WEIGHTED_AVERAGE",
        }
    }
}

impl FromStr for CostingMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "FIFO" => Ok(Self::Fifo),
            "LIFO" => Ok(Self::Lifo),
            "WEIGHTED_AVERAGE" | "AVCO" | "AVERAGE" => Ok(Self::WeightedAverage),
            _ => Err(DomainError::validation(format!(
                "unsupported costing method: {s}"
            ))),
        }
    }
}

impl core::fmt::Display for CostingMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when outbound quantity exceeds every inbound layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversoldPolicy {
    /// Stop at zero and attach an [`ValuationWarning::Oversold`].
    #[default]
    Warn,
    /// Report the shortfall as negative stock, valued at the last drawn cost.
    AllowNegative,
    /// Fail the valuation.
    Reject,
}

impl FromStr for OversoldPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "warn" => Ok(Self::Warn),
            "allow_negative" | "negative" => Ok(Self::AllowNegative),
            "reject" => Ok(Self::Reject),
            _ => Err(DomainError::validation(format!("unknown oversold policy: {s}"))),
        }
    }
}

/// Non-fatal data-quality findings attached to a valuation.
///
/// The numbers are still produced (missing costs count as zero), but callers
/// should treat a result carrying warnings as degraded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValuationWarning {
    /// An inbound movement had no cost recorded; valued at zero.
    MissingUnitCost {
        movement_id: MovementId,
        quantity: Decimal,
    },
    /// An inbound movement was recorded at zero cost.
    ZeroUnitCost {
        movement_id: MovementId,
        quantity: Decimal,
    },
    /// Outbound exceeded all available layers by this much.
    Oversold { unresolved_quantity: Decimal },
}

impl ValuationWarning {
    pub fn code(&self) -> &'static str {
        match self {
            ValuationWarning::MissingUnitCost { .. } => "missing_unit_cost",
            ValuationWarning::ZeroUnitCost { .. } => "zero_unit_cost",
            ValuationWarning::Oversold { .. } => "oversold",
        }
    }
}

/// Resolve a recorded cost, pushing a warning when it is missing or zero.
pub(crate) fn effective_cost(
    movement_id: MovementId,
    quantity: Decimal,
    unit_cost: Option<Decimal>,
    warnings: &mut Vec<ValuationWarning>,
) -> Decimal {
    match unit_cost {
        None => {
            warnings.push(ValuationWarning::MissingUnitCost {
                movement_id,
                quantity,
            });
            Decimal::ZERO
        }
        Some(c) if c.is_zero() => {
            warnings.push(ValuationWarning::ZeroUnitCost {
                movement_id,
                quantity,
            });
            Decimal::ZERO
        }
        Some(c) => c,
    }
}
