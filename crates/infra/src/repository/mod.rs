//! Stock ledger read access.
//!
//! - `r#trait`: the repository contract and its value types
//! - `in_memory`: map-backed store for tests and embedding
//! - `postgres`: sqlx-backed store over the `stock_movements` schema

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStockLedger;
pub use postgres::PostgresStockLedger;
pub use r#trait::{LedgerSlice, MovementFilter, RepositoryError, StockLedgerRepository, ValuationInputs};
