//! Engine-level errors and per-item batch failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{DomainError, LocationId, ProductVariationId};

use crate::repository::RepositoryError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure of a single engine call.
///
/// Batch operations do not surface these directly for individual items;
/// they are folded into [`ItemFailure`] records instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("unsupported costing method: {0}")]
    UnsupportedMethod(String),

    #[error("missing reference: {0}")]
    MissingReference(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A per-item task ended without producing a result.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl EngineError {
    pub(crate) fn missing_item(product_variation_id: ProductVariationId, location_id: LocationId) -> Self {
        Self::MissingReference(format!(
            "product variation {product_variation_id} at location {location_id}"
        ))
    }
}

/// Coarse classification of a skipped item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFailureKind {
    MissingReference,
    /// The domain layer refused the item (e.g. oversold under `Reject`).
    Rejected,
    Repository,
    Aborted,
}

/// One item a batch run skipped, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub product_variation_id: ProductVariationId,
    pub location_id: LocationId,
    pub kind: ItemFailureKind,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(product_variation_id: ProductVariationId, location_id: LocationId, error: &EngineError) -> Self {
        let kind = match error {
            EngineError::MissingReference(_) => ItemFailureKind::MissingReference,
            EngineError::Domain(_) | EngineError::UnsupportedMethod(_) => ItemFailureKind::Rejected,
            EngineError::Repository(_) => ItemFailureKind::Repository,
            EngineError::TaskFailed(_) => ItemFailureKind::Aborted,
        };
        Self {
            product_variation_id,
            location_id,
            kind,
            reason: error.to_string(),
        }
    }
}
