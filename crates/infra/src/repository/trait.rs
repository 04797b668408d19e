use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{BusinessId, LocationId, ProductVariationId};
use stockledger_inventory::{
    Movement, MovementDirection, PhysicalCountAnchor, ResolvedWindow, StockSnapshot,
};

/// Repository operation error.
///
/// These are **infrastructure errors** (storage, decoding) as opposed to
/// domain errors (validation, invariants). Retrying is the caller's call; the
/// engine itself never retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),

    #[error("failed to decode row: {0}")]
    Decode(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

/// Movement query filter. Both time bounds are inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub direction: Option<MovementDirection>,
}

impl MovementFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }

    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        self.until = Some(at);
        self
    }

    pub fn direction(mut self, direction: MovementDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn matches(&self, m: &Movement) -> bool {
        self.since.is_none_or(|s| m.occurred_at >= s)
            && self.until.is_none_or(|u| m.occurred_at <= u)
            && self.direction.is_none_or(|d| m.kind.direction() == Some(d))
    }
}

/// Everything a valuation reads, taken from one consistent view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuationInputs {
    pub snapshot: StockSnapshot,
    pub movements: Vec<Movement>,
}

/// Everything a reconciliation reads, taken from one consistent view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSlice {
    pub snapshot: StockSnapshot,
    pub anchor: Option<PhysicalCountAnchor>,
    /// Movements from the anchor (inclusive) through the window end.
    pub movements: Vec<Movement>,
    pub has_later_movements: bool,
}

/// Read-only view of the transaction store and stock snapshot.
///
/// The engine never writes through this interface. Implementations must
/// return movements ordered by timestamp, then by movement id.
///
/// Point lookups return `None` when the product variation or location is not
/// a live reference for the business.
#[async_trait::async_trait]
pub trait StockLedgerRepository: Send + Sync {
    async fn movements(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        filter: MovementFilter,
    ) -> Result<Vec<Movement>, RepositoryError>;

    /// Latest physical count strictly before `before`.
    async fn latest_anchor_before(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        before: DateTime<Utc>,
    ) -> Result<Option<PhysicalCountAnchor>, RepositoryError>;

    async fn stock_snapshot(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
    ) -> Result<Option<StockSnapshot>, RepositoryError>;

    /// Snapshot rows with non-zero quantity at a location.
    async fn stocked_items(
        &self,
        business_id: BusinessId,
        location_id: LocationId,
    ) -> Result<Vec<StockSnapshot>, RepositoryError>;

    async fn locations(&self, business_id: BusinessId) -> Result<Vec<LocationId>, RepositoryError>;

    /// Business-level costing method setting, as stored.
    async fn default_costing_method(
        &self,
        business_id: BusinessId,
    ) -> Result<Option<String>, RepositoryError>;

    async fn has_movements_after(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        after: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Snapshot plus full history for one item.
    ///
    /// The default issues independent reads; stores that can should override
    /// it to read from a single snapshot.
    async fn valuation_inputs(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
    ) -> Result<Option<ValuationInputs>, RepositoryError> {
        let Some(snapshot) = self
            .stock_snapshot(business_id, product_variation_id, location_id)
            .await?
        else {
            return Ok(None);
        };
        let movements = self
            .movements(business_id, product_variation_id, location_id, MovementFilter::all())
            .await?;
        Ok(Some(ValuationInputs { snapshot, movements }))
    }

    /// Anchor, relevant movements and snapshot for one reconciliation.
    async fn ledger_slice(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        window: ResolvedWindow,
    ) -> Result<Option<LedgerSlice>, RepositoryError> {
        let Some(snapshot) = self
            .stock_snapshot(business_id, product_variation_id, location_id)
            .await?
        else {
            return Ok(None);
        };
        let anchor = self
            .latest_anchor_before(business_id, product_variation_id, location_id, window.start)
            .await?;

        let mut filter = MovementFilter::all().until(window.end);
        if let Some(a) = anchor {
            filter = filter.since(a.occurred_at);
        }
        let movements = self
            .movements(business_id, product_variation_id, location_id, filter)
            .await?;

        let has_later_movements = if window.ends_now {
            false
        } else {
            self.has_movements_after(business_id, product_variation_id, location_id, window.end)
                .await?
        };

        Ok(Some(LedgerSlice {
            snapshot,
            anchor,
            movements,
            has_later_movements,
        }))
    }
}

#[async_trait::async_trait]
impl<R> StockLedgerRepository for Arc<R>
where
    R: StockLedgerRepository + ?Sized,
{
    async fn movements(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        filter: MovementFilter,
    ) -> Result<Vec<Movement>, RepositoryError> {
        (**self)
            .movements(business_id, product_variation_id, location_id, filter)
            .await
    }

    async fn latest_anchor_before(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        before: DateTime<Utc>,
    ) -> Result<Option<PhysicalCountAnchor>, RepositoryError> {
        (**self)
            .latest_anchor_before(business_id, product_variation_id, location_id, before)
            .await
    }

    async fn stock_snapshot(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
    ) -> Result<Option<StockSnapshot>, RepositoryError> {
        (**self)
            .stock_snapshot(business_id, product_variation_id, location_id)
            .await
    }

    async fn stocked_items(
        &self,
        business_id: BusinessId,
        location_id: LocationId,
    ) -> Result<Vec<StockSnapshot>, RepositoryError> {
        (**self).stocked_items(business_id, location_id).await
    }

    async fn locations(&self, business_id: BusinessId) -> Result<Vec<LocationId>, RepositoryError> {
        (**self).locations(business_id).await
    }

    async fn default_costing_method(
        &self,
        business_id: BusinessId,
    ) -> Result<Option<String>, RepositoryError> {
        (**self).default_costing_method(business_id).await
    }

    async fn has_movements_after(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        after: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        (**self)
            .has_movements_after(business_id, product_variation_id, location_id, after)
            .await
    }

    async fn valuation_inputs(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
    ) -> Result<Option<ValuationInputs>, RepositoryError> {
        (**self)
            .valuation_inputs(business_id, product_variation_id, location_id)
            .await
    }

    async fn ledger_slice(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        window: ResolvedWindow,
    ) -> Result<Option<LedgerSlice>, RepositoryError> {
        (**self)
            .ledger_slice(business_id, product_variation_id, location_id, window)
            .await
    }
}
