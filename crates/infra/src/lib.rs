//! Infrastructure layer: repository adapters, engine configuration and the
//! valuation / reconciliation services built on them.

mod batch;
pub mod config;
pub mod error;
pub mod reconciliation;
pub mod repository;
pub mod valuation;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ItemFailure, ItemFailureKind};
pub use reconciliation::{LocationReconciliation, ReconciliationService};
pub use repository::{
    InMemoryStockLedger, LedgerSlice, MovementFilter, PostgresStockLedger, RepositoryError,
    StockLedgerRepository, ValuationInputs,
};
pub use valuation::{BusinessValuation, LocationTotals, LocationValuation, ValuationService, parse_method};
