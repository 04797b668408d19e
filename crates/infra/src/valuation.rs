//! Valuation service: method resolution, per-item valuation and the
//! location/business roll-ups.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use stockledger_core::{BusinessId, LocationId, ProductVariationId};
use stockledger_inventory::{CostingMethod, ValuationResult, checked, valuate_item};

use crate::batch::fan_out;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ItemFailure};
use crate::repository::StockLedgerRepository;

/// Every stocked item at one location, valued with one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationValuation {
    pub location_id: LocationId,
    pub method: CostingMethod,
    /// Sorted by product variation id.
    pub items: Vec<ValuationResult>,
    pub failures: Vec<ItemFailure>,
}

impl LocationValuation {
    pub fn total_value(&self) -> EngineResult<Decimal> {
        Ok(checked::sum(self.items.iter().map(|i| i.total_value))?)
    }

    pub fn total_quantity(&self) -> EngineResult<Decimal> {
        Ok(checked::sum(self.items.iter().map(|i| i.current_quantity))?)
    }

    pub fn items_with_warnings(&self) -> usize {
        self.items.iter().filter(|i| i.is_degraded()).count()
    }
}

/// Per-location line of a business valuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationTotals {
    pub location_id: LocationId,
    pub total_value: Decimal,
    pub total_quantity: Decimal,
    pub item_count: usize,
    pub items_with_warnings: usize,
    pub failed_items: usize,
}

impl TryFrom<&LocationValuation> for LocationTotals {
    type Error = EngineError;

    fn try_from(v: &LocationValuation) -> EngineResult<Self> {
        Ok(Self {
            location_id: v.location_id,
            total_value: v.total_value()?,
            total_quantity: v.total_quantity()?,
            item_count: v.items.len(),
            items_with_warnings: v.items_with_warnings(),
            failed_items: v.failures.len(),
        })
    }
}

/// Business-wide (or single-location) valuation summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessValuation {
    pub business_id: BusinessId,
    pub method: CostingMethod,
    pub total_value: Decimal,
    pub total_quantity: Decimal,
    pub item_count: usize,
    pub items_with_warnings: usize,
    pub failed_items: usize,
    pub locations: Vec<LocationTotals>,
}

impl BusinessValuation {
    fn new(business_id: BusinessId, method: CostingMethod) -> Self {
        Self {
            business_id,
            method,
            total_value: Decimal::ZERO,
            total_quantity: Decimal::ZERO,
            item_count: 0,
            items_with_warnings: 0,
            failed_items: 0,
            locations: Vec::new(),
        }
    }

    fn add(&mut self, totals: LocationTotals) -> EngineResult<()> {
        self.total_value = checked::add(self.total_value, totals.total_value)?;
        self.total_quantity = checked::add(self.total_quantity, totals.total_quantity)?;
        self.item_count += totals.item_count;
        self.items_with_warnings += totals.items_with_warnings;
        self.failed_items += totals.failed_items;
        self.locations.push(totals);
        Ok(())
    }
}

/// Values stock read through a [`StockLedgerRepository`].
///
/// Holds no mutable state; clones share the repository.
pub struct ValuationService<R> {
    repository: Arc<R>,
    config: EngineConfig,
}

impl<R> Clone for ValuationService<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            config: self.config,
        }
    }
}

impl<R> ValuationService<R>
where
    R: StockLedgerRepository + 'static,
{
    pub fn new(repository: Arc<R>, config: EngineConfig) -> Self {
        Self { repository, config }
    }

    /// The caller's method if given, else the business setting, else the
    /// engine default. A stored setting that does not name a known method is
    /// an error rather than a silent fallback.
    pub async fn resolve_method(
        &self,
        business_id: BusinessId,
        requested: Option<CostingMethod>,
    ) -> EngineResult<CostingMethod> {
        if let Some(method) = requested {
            return Ok(method);
        }
        match self.repository.default_costing_method(business_id).await? {
            Some(stored) => parse_method(&stored),
            None => Ok(self.config.default_method),
        }
    }

    /// Value one product variation at one location.
    #[instrument(
        skip(self),
        fields(business_id = %business_id, product_variation_id = %product_variation_id, location_id = %location_id),
        err
    )]
    pub async fn valuate(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        method: Option<CostingMethod>,
    ) -> EngineResult<ValuationResult> {
        let method = self.resolve_method(business_id, method).await?;
        self.valuate_with(business_id, product_variation_id, location_id, method)
            .await
    }

    /// Value every item with non-zero stock at `location_id`.
    ///
    /// Items that cannot be valued are recorded in `failures`; only method
    /// resolution or failing to enumerate the location aborts the call.
    #[instrument(skip(self), fields(business_id = %business_id, location_id = %location_id), err)]
    pub async fn valuate_location(
        &self,
        business_id: BusinessId,
        location_id: LocationId,
        method: Option<CostingMethod>,
    ) -> EngineResult<LocationValuation> {
        let method = self.resolve_method(business_id, method).await?;
        self.valuate_location_with(business_id, location_id, method)
            .await
    }

    /// Sum location valuations across the business, or across `location_id`
    /// alone when given.
    #[instrument(skip(self), fields(business_id = %business_id), err)]
    pub async fn valuate_business(
        &self,
        business_id: BusinessId,
        method: Option<CostingMethod>,
        location_id: Option<LocationId>,
    ) -> EngineResult<BusinessValuation> {
        let method = self.resolve_method(business_id, method).await?;
        let locations = match location_id {
            Some(l) => vec![l],
            None => self.repository.locations(business_id).await?,
        };

        let mut summary = BusinessValuation::new(business_id, method);
        for location_id in locations {
            let valued = self
                .valuate_location_with(business_id, location_id, method)
                .await?;
            summary.add(LocationTotals::try_from(&valued)?)?;
        }

        info!(
            method = %method,
            locations = summary.locations.len(),
            items = summary.item_count,
            failed = summary.failed_items,
            total_value = %summary.total_value,
            "business valuation complete"
        );
        Ok(summary)
    }

    async fn valuate_with(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        method: CostingMethod,
    ) -> EngineResult<ValuationResult> {
        let inputs = self
            .repository
            .valuation_inputs(business_id, product_variation_id, location_id)
            .await?
            .ok_or_else(|| EngineError::missing_item(product_variation_id, location_id))?;

        let result = valuate_item(
            &inputs.snapshot,
            &inputs.movements,
            method,
            self.config.oversold_policy,
        )?;

        if result.is_degraded() {
            let codes: Vec<&str> = result.warnings.iter().map(|w| w.code()).collect();
            warn!(
                product_variation_id = %product_variation_id,
                location_id = %location_id,
                warnings = ?codes,
                "valuation accuracy degraded"
            );
        }
        Ok(result)
    }

    async fn valuate_location_with(
        &self,
        business_id: BusinessId,
        location_id: LocationId,
        method: CostingMethod,
    ) -> EngineResult<LocationValuation> {
        let stocked = self
            .repository
            .stocked_items(business_id, location_id)
            .await?;
        let keys = stocked.iter().map(|s| s.product_variation_id).collect();

        let service = self.clone();
        let outcomes = fan_out(keys, self.config.max_concurrency, move |product_variation_id| {
            let service = service.clone();
            async move {
                service
                    .valuate_with(business_id, product_variation_id, location_id, method)
                    .await
            }
        })
        .await;

        let mut items = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (product_variation_id, outcome) in outcomes {
            match outcome {
                Ok(result) => items.push(result),
                Err(e) => {
                    warn!(
                        product_variation_id = %product_variation_id,
                        location_id = %location_id,
                        error = %e,
                        "item skipped during location valuation"
                    );
                    failures.push(ItemFailure::new(product_variation_id, location_id, &e));
                }
            }
        }

        info!(
            location_id = %location_id,
            method = %method,
            items = items.len(),
            failed = failures.len(),
            "location valuation complete"
        );
        Ok(LocationValuation {
            location_id,
            method,
            items,
            failures,
        })
    }
}

/// Parse a stored or user-supplied method name.
pub fn parse_method(raw: &str) -> EngineResult<CostingMethod> {
    raw.parse::<CostingMethod>()
        .map_err(|_| EngineError::UnsupportedMethod(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use stockledger_inventory::{Inbound, MovementKind, OversoldPolicy, Outbound, ValuationWarning};

    use stockledger_core::DomainError;

    use crate::error::ItemFailureKind;
    use crate::repository::InMemoryStockLedger;

    fn t(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::hours(n)
    }

    fn buy(qty: i64, cost: i64) -> MovementKind {
        MovementKind::PurchaseReceipt(Inbound::new(Decimal::from(qty), Some(Decimal::from(cost))).unwrap())
    }

    fn sell(qty: i64) -> MovementKind {
        MovementKind::Sale(Outbound::new(Decimal::from(qty)).unwrap())
    }

    struct Fixture {
        repo: Arc<InMemoryStockLedger>,
        business: BusinessId,
        location: LocationId,
    }

    impl Fixture {
        fn new() -> Self {
            let repo = Arc::new(InMemoryStockLedger::new());
            let business = BusinessId::new();
            let location = LocationId::new();
            repo.register_location(business, location).unwrap();
            Self {
                repo,
                business,
                location,
            }
        }

        fn basic_item(&self) -> ProductVariationId {
            let pv = ProductVariationId::new();
            self.repo.record(self.business, pv, self.location, t(1), buy(10, 5)).unwrap();
            self.repo.record(self.business, pv, self.location, t(2), buy(10, 7)).unwrap();
            self.repo.record(self.business, pv, self.location, t(3), sell(12)).unwrap();
            pv
        }

        fn service(&self, config: EngineConfig) -> ValuationService<InMemoryStockLedger> {
            ValuationService::new(Arc::clone(&self.repo), config)
        }
    }

    #[tokio::test]
    async fn valuate_uses_business_default_when_method_omitted() {
        let fx = Fixture::new();
        let pv = fx.basic_item();
        fx.repo.set_default_costing_method(fx.business, "LIFO").unwrap();

        let result = fx
            .service(EngineConfig::default())
            .valuate(fx.business, pv, fx.location, None)
            .await
            .unwrap();

        assert_eq!(result.method, CostingMethod::Lifo);
        assert_eq!(result.current_quantity, Decimal::from(8));
        assert_eq!(result.total_value, Decimal::from(40));
    }

    #[tokio::test]
    async fn explicit_method_wins_over_business_default() {
        let fx = Fixture::new();
        let pv = fx.basic_item();
        fx.repo.set_default_costing_method(fx.business, "LIFO").unwrap();

        let result = fx
            .service(EngineConfig::default())
            .valuate(fx.business, pv, fx.location, Some(CostingMethod::Fifo))
            .await
            .unwrap();

        assert_eq!(result.total_value, Decimal::from(56));
        assert_eq!(result.unit_cost, Decimal::from(7));
    }

    #[tokio::test]
    async fn engine_default_applies_without_business_setting() {
        let fx = Fixture::new();
        let pv = fx.basic_item();

        let config = EngineConfig::default().with_default_method(CostingMethod::WeightedAverage);
        let result = fx.service(config).valuate(fx.business, pv, fx.location, None).await.unwrap();

        assert_eq!(result.method, CostingMethod::WeightedAverage);
        assert_eq!(result.total_value, Decimal::from(48));
    }

    #[tokio::test]
    async fn unknown_stored_method_is_rejected() {
        let fx = Fixture::new();
        let pv = fx.basic_item();
        fx.repo.set_default_costing_method(fx.business, "HIFO").unwrap();

        let err = fx
            .service(EngineConfig::default())
            .valuate(fx.business, pv, fx.location, None)
            .await
            .unwrap_err();

        assert_eq!(err, EngineError::UnsupportedMethod("HIFO".into()));
    }

    #[tokio::test]
    async fn missing_reference_fails_single_valuation() {
        let fx = Fixture::new();
        let err = fx
            .service(EngineConfig::default())
            .valuate(fx.business, ProductVariationId::new(), fx.location, Some(CostingMethod::Fifo))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::MissingReference(_)));
    }

    #[tokio::test]
    async fn location_valuation_isolates_failures() {
        let fx = Fixture::new();
        let good = fx.basic_item();
        let retired = fx.basic_item();
        fx.repo.retire_variation(fx.business, retired).unwrap();

        let valued = fx
            .service(EngineConfig::default())
            .valuate_location(fx.business, fx.location, Some(CostingMethod::Fifo))
            .await
            .unwrap();

        assert_eq!(valued.items.len(), 1);
        assert_eq!(valued.items[0].product_variation_id, good);
        assert_eq!(valued.failures.len(), 1);
        assert_eq!(valued.failures[0].product_variation_id, retired);
        assert_eq!(valued.failures[0].kind, ItemFailureKind::MissingReference);
    }

    #[tokio::test]
    async fn reject_policy_turns_oversold_item_into_failure() {
        let fx = Fixture::new();
        let fine = fx.basic_item();
        let oversold = ProductVariationId::new();
        fx.repo.record(fx.business, oversold, fx.location, t(1), buy(10, 5)).unwrap();
        fx.repo.record(fx.business, oversold, fx.location, t(2), sell(15)).unwrap();

        let config = EngineConfig::default().with_oversold_policy(OversoldPolicy::Reject);
        let valued = fx
            .service(config)
            .valuate_location(fx.business, fx.location, Some(CostingMethod::Fifo))
            .await
            .unwrap();

        assert_eq!(valued.items.len(), 1);
        assert_eq!(valued.items[0].product_variation_id, fine);
        assert_eq!(valued.failures[0].kind, ItemFailureKind::Rejected);
    }

    #[tokio::test]
    async fn warn_policy_keeps_oversold_item_with_warning() {
        let fx = Fixture::new();
        let pv = ProductVariationId::new();
        fx.repo.record(fx.business, pv, fx.location, t(1), buy(10, 5)).unwrap();
        fx.repo.record(fx.business, pv, fx.location, t(2), sell(15)).unwrap();

        let result = fx
            .service(EngineConfig::default())
            .valuate(fx.business, pv, fx.location, Some(CostingMethod::Fifo))
            .await
            .unwrap();

        assert_eq!(result.current_quantity, Decimal::ZERO);
        assert_eq!(result.total_value, Decimal::ZERO);
        assert!(result.warnings.contains(&ValuationWarning::Oversold {
            unresolved_quantity: Decimal::from(5)
        }));
    }

    #[tokio::test]
    async fn business_valuation_sums_locations() {
        let fx = Fixture::new();
        fx.basic_item();
        let second = LocationId::new();
        let pv = ProductVariationId::new();
        fx.repo.record(fx.business, pv, second, t(1), buy(4, 10)).unwrap();

        let service = fx.service(EngineConfig::default());
        let all = service
            .valuate_business(fx.business, Some(CostingMethod::Fifo), None)
            .await
            .unwrap();

        assert_eq!(all.locations.len(), 2);
        assert_eq!(all.item_count, 2);
        assert_eq!(all.total_quantity, Decimal::from(12));
        assert_eq!(all.total_value, Decimal::from(96));

        let one = service
            .valuate_business(fx.business, Some(CostingMethod::Fifo), Some(second))
            .await
            .unwrap();
        assert_eq!(one.item_count, 1);
        assert_eq!(one.total_value, Decimal::from(40));
    }

    #[tokio::test]
    async fn decimal_overflow_is_reported_not_raised() {
        let fx = Fixture::new();
        let big = 99_999_999_999_999;
        let oversized = ProductVariationId::new();
        for h in 0..8 {
            fx.repo.record(fx.business, oversized, fx.location, t(h), buy(big, big)).unwrap();
        }
        let service = fx.service(EngineConfig::default());

        let err = service
            .valuate(fx.business, oversized, fx.location, Some(CostingMethod::Fifo))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::InvariantViolation(_))));

        let valued = service
            .valuate_location(fx.business, fx.location, Some(CostingMethod::Fifo))
            .await
            .unwrap();
        assert_eq!(valued.failures[0].kind, ItemFailureKind::Rejected);
    }

    #[tokio::test]
    async fn business_totals_overflow_is_an_error() {
        let fx = Fixture::new();
        let big = 99_999_999_999_999;
        for _ in 0..2 {
            let pv = ProductVariationId::new();
            for h in 0..7 {
                fx.repo.record(fx.business, pv, fx.location, t(h), buy(big, big)).unwrap();
            }
        }
        let service = fx.service(EngineConfig::default());

        let valued = service
            .valuate_location(fx.business, fx.location, Some(CostingMethod::Fifo))
            .await
            .unwrap();
        assert_eq!(valued.items.len(), 2);
        assert!(valued.total_value().is_err());

        let err = service
            .valuate_business(fx.business, Some(CostingMethod::Fifo), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn repeated_runs_are_identical() {
        let fx = Fixture::new();
        for _ in 0..5 {
            fx.basic_item();
        }
        let service = fx.service(EngineConfig::default().with_max_concurrency(2));

        let a = service.valuate_location(fx.business, fx.location, None).await.unwrap();
        let b = service.valuate_location(fx.business, fx.location, None).await.unwrap();
        assert_eq!(a, b);

        let ids: Vec<_> = a.items.iter().map(|i| i.product_variation_id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn parse_method_maps_to_unsupported() {
        assert_eq!(parse_method("fifo"), Ok(CostingMethod::Fifo));
        assert_eq!(parse_method("avco"), Ok(CostingMethod::WeightedAverage));
        assert!(matches!(parse_method("nope"), Err(EngineError::UnsupportedMethod(_))));
    }
}
