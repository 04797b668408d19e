//! Inventory costing and ledger logic.
//!
//! This crate contains the valuation and replay rules, implemented purely as
//! deterministic functions over movement history (no IO, no storage).

pub mod checked;
pub mod costing;
pub mod layers;
pub mod ledger;
pub mod movement;
pub mod valuation;
pub mod weighted_average;

pub use costing::{CostingMethod, OversoldPolicy, ValuationWarning};
pub use layers::{CostLayer, CostLayerTracker, LayerOrder, LayerValuation, outbound_total};
pub use ledger::{
    DiscrepancyStatus, LedgerReplay, LedgerWindow, ReconciliationResult, ResolvedWindow, WindowEnd,
    reconcile_item, replay,
};
pub use movement::{
    Correction, Inbound, Movement, MovementDirection, MovementKind, Outbound, PhysicalCountAnchor,
    StockSnapshot, latest_anchor_before, sort_chronologically,
};
pub use valuation::{ValuationResult, valuate_item};
pub use weighted_average::WeightedAverageCalculator;
