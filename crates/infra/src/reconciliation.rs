//! Reconciliation service: replays the ledger for a window and compares the
//! result with the live snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use stockledger_core::{BusinessId, Clock, LocationId, ProductVariationId, SystemClock};
use stockledger_inventory::{
    DiscrepancyStatus, LedgerWindow, ReconciliationResult, ResolvedWindow, reconcile_item,
};

use crate::batch::fan_out;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ItemFailure};
use crate::repository::StockLedgerRepository;

/// Reconciliation of every stocked item at a location over one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationReconciliation {
    pub location_id: LocationId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub ends_now: bool,
    /// Sorted by product variation id.
    pub results: Vec<ReconciliationResult>,
    pub failures: Vec<ItemFailure>,
}

impl LocationReconciliation {
    /// Results whose closing balance disagrees with the snapshot when the
    /// comparison is valid.
    pub fn discrepancies(&self) -> impl Iterator<Item = &ReconciliationResult> {
        self.results.iter().filter(|r| r.status.is_alertable())
    }

    pub fn is_balanced(&self) -> bool {
        self.failures.is_empty() && self.discrepancies().next().is_none()
    }
}

/// Replays stock ledgers read through a [`StockLedgerRepository`].
pub struct ReconciliationService<R> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<R> Clone for ReconciliationService<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            clock: Arc::clone(&self.clock),
            config: self.config,
        }
    }
}

impl<R> ReconciliationService<R>
where
    R: StockLedgerRepository + 'static,
{
    pub fn new(repository: Arc<R>, config: EngineConfig) -> Self {
        Self {
            repository,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the source of "now" used to resolve windows.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reconcile one product variation at one location.
    ///
    /// Fails on a malformed window or a missing reference.
    #[instrument(
        skip(self, window),
        fields(business_id = %business_id, product_variation_id = %product_variation_id, location_id = %location_id),
        err
    )]
    pub async fn reconcile(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        window: LedgerWindow,
    ) -> EngineResult<ReconciliationResult> {
        let resolved = window.resolve(self.clock.now())?;
        self.reconcile_resolved(business_id, product_variation_id, location_id, resolved)
            .await
    }

    /// Reconcile every item with non-zero stock at `location_id`.
    ///
    /// The window is resolved once, so every item shares the same "now".
    #[instrument(skip(self, window), fields(business_id = %business_id, location_id = %location_id), err)]
    pub async fn reconcile_location(
        &self,
        business_id: BusinessId,
        location_id: LocationId,
        window: LedgerWindow,
    ) -> EngineResult<LocationReconciliation> {
        let resolved = window.resolve(self.clock.now())?;
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
                    .reconcile_resolved(business_id, product_variation_id, location_id, resolved)
                    .await
            }
        })
        .await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (product_variation_id, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(
                        product_variation_id = %product_variation_id,
                        location_id = %location_id,
                        error = %e,
                        "item skipped during reconciliation"
                    );
                    failures.push(ItemFailure::new(product_variation_id, location_id, &e));
                }
            }
        }

        let report = LocationReconciliation {
            location_id,
            window_start: resolved.start,
            window_end: resolved.end,
            ends_now: resolved.ends_now,
            results,
            failures,
        };
        info!(
            location_id = %location_id,
            items = report.results.len(),
            discrepancies = report.discrepancies().count(),
            failed = report.failures.len(),
            "location reconciliation complete"
        );
        Ok(report)
    }

    async fn reconcile_resolved(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        window: ResolvedWindow,
    ) -> EngineResult<ReconciliationResult> {
        let slice = self
            .repository
            .ledger_slice(business_id, product_variation_id, location_id, window)
            .await?
            .ok_or_else(|| EngineError::missing_item(product_variation_id, location_id))?;

        let result = reconcile_item(
            &slice.snapshot,
            slice.anchor,
            &slice.movements,
            &window,
            slice.has_later_movements,
        )?;

        match result.status {
            DiscrepancyStatus::Genuine { difference } => warn!(
                product_variation_id = %product_variation_id,
                location_id = %location_id,
                closing_balance = %result.closing_balance,
                system_quantity = %result.system_quantity,
                difference = %difference,
                "ledger does not match stock snapshot"
            ),
            DiscrepancyStatus::MovementsAfterWindowEnd { difference } => debug!(
                product_variation_id = %product_variation_id,
                difference = %difference,
                "difference explained by movements after window end"
            ),
            DiscrepancyStatus::Balanced => {}
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use stockledger_core::{DomainError, FixedClock};
    use stockledger_inventory::{Correction, Inbound, MovementKind, Outbound};

    use crate::error::ItemFailureKind;
    use crate::repository::InMemoryStockLedger;

    fn day(d: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::days(d)
    }

    fn receive(qty: i64) -> MovementKind {
        MovementKind::PurchaseReceipt(Inbound::new(Decimal::from(qty), Some(Decimal::ONE)).unwrap())
    }

    fn sell(qty: i64) -> MovementKind {
        MovementKind::Sale(Outbound::new(Decimal::from(qty)).unwrap())
    }

    fn count(delta: i64, counted: i64) -> MovementKind {
        MovementKind::Correction(Correction::new(Decimal::from(delta), Decimal::from(counted)).unwrap())
    }

    struct Fixture {
        repo: Arc<InMemoryStockLedger>,
        business: BusinessId,
        location: LocationId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                repo: Arc::new(InMemoryStockLedger::new()),
                business: BusinessId::new(),
                location: LocationId::new(),
            }
        }

        fn record(&self, pv: ProductVariationId, d: i64, kind: MovementKind) {
            self.repo.record(self.business, pv, self.location, day(d), kind).unwrap();
        }

        fn service(&self, today: i64) -> ReconciliationService<InMemoryStockLedger> {
            ReconciliationService::new(Arc::clone(&self.repo), EngineConfig::default())
                .with_clock(Arc::new(FixedClock(day(today))))
        }
    }

    #[tokio::test]
    async fn quiet_window_carries_opening_balance_through() {
        let fx = Fixture::new();
        let pv = ProductVariationId::new();
        fx.record(pv, 1, receive(50));

        let result = fx
            .service(30)
            .reconcile(fx.business, pv, fx.location, LedgerWindow::until_now(day(10)))
            .await
            .unwrap();

        assert_eq!(result.opening_balance, Decimal::from(50));
        assert_eq!(result.total_in, Decimal::ZERO);
        assert_eq!(result.total_out, Decimal::ZERO);
        assert_eq!(result.closing_balance, Decimal::from(50));
        assert_eq!(result.system_quantity, Decimal::from(50));
        assert_eq!(result.discrepancy, Decimal::ZERO);
        assert_eq!(result.status, DiscrepancyStatus::Balanced);
        assert_eq!(result.window_end, day(30));
    }

    #[tokio::test]
    async fn past_window_with_later_movements_is_expected() {
        let fx = Fixture::new();
        let pv = ProductVariationId::new();
        fx.record(pv, 1, receive(20));
        fx.record(pv, 5, sell(5));
        fx.record(pv, 12, sell(3));

        let result = fx
            .service(30)
            .reconcile(fx.business, pv, fx.location, LedgerWindow::between(day(2), day(10)))
            .await
            .unwrap();

        assert_eq!(result.closing_balance, Decimal::from(15));
        assert_eq!(result.system_quantity, Decimal::from(12));
        assert_eq!(
            result.status,
            DiscrepancyStatus::MovementsAfterWindowEnd {
                difference: Decimal::from(3)
            }
        );
        assert!(!result.status.is_alertable());
    }

    #[tokio::test]
    async fn tampered_snapshot_is_a_genuine_discrepancy() {
        let fx = Fixture::new();
        let pv = ProductVariationId::new();
        fx.record(pv, 1, receive(20));
        fx.repo
            .set_snapshot_quantity(fx.business, pv, fx.location, Decimal::from(18))
            .unwrap();

        let result = fx
            .service(30)
            .reconcile(fx.business, pv, fx.location, LedgerWindow::until_now(day(0)))
            .await
            .unwrap();

        assert_eq!(
            result.status,
            DiscrepancyStatus::Genuine {
                difference: Decimal::from(2)
            }
        );
    }

    #[tokio::test]
    async fn anchor_supersedes_earlier_history() {
        let fx = Fixture::new();
        let pv = ProductVariationId::new();
        fx.record(pv, 1, receive(100));
        fx.record(pv, 3, count(-4, 96));
        fx.record(pv, 8, sell(6));

        let result = fx
            .service(30)
            .reconcile(fx.business, pv, fx.location, LedgerWindow::until_now(day(5)))
            .await
            .unwrap();

        assert_eq!(result.opening_balance, Decimal::from(96));
        assert_eq!(result.total_out, Decimal::from(6));
        assert_eq!(result.closing_balance, Decimal::from(90));
        assert_eq!(result.status, DiscrepancyStatus::Balanced);
        assert!(result.anchor_movement_id.is_some());
    }

    #[tokio::test]
    async fn inverted_window_is_a_validation_error() {
        let fx = Fixture::new();
        let pv = ProductVariationId::new();
        fx.record(pv, 1, receive(1));

        let err = fx
            .service(30)
            .reconcile(fx.business, pv, fx.location, LedgerWindow::between(day(9), day(2)))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_item_is_a_missing_reference() {
        let fx = Fixture::new();
        fx.repo.register_location(fx.business, fx.location).unwrap();

        let err = fx
            .service(30)
            .reconcile(
                fx.business,
                ProductVariationId::new(),
                fx.location,
                LedgerWindow::until_now(day(0)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::MissingReference(_)));
    }

    #[tokio::test]
    async fn location_run_lists_discrepancies_and_failures() {
        let fx = Fixture::new();
        let clean = ProductVariationId::new();
        let drifted = ProductVariationId::new();
        let retired = ProductVariationId::new();
        fx.record(clean, 1, receive(10));
        fx.record(drifted, 1, receive(10));
        fx.record(retired, 1, receive(10));
        fx.repo
            .set_snapshot_quantity(fx.business, drifted, fx.location, Decimal::from(7))
            .unwrap();
        fx.repo.retire_variation(fx.business, retired).unwrap();

        let report = fx
            .service(30)
            .reconcile_location(fx.business, fx.location, LedgerWindow::until_now(day(0)))
            .await
            .unwrap();

        assert_eq!(report.results.len(), 2);
        let flagged: Vec<_> = report.discrepancies().map(|r| r.product_variation_id).collect();
        assert_eq!(flagged, vec![drifted]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].product_variation_id, retired);
        assert_eq!(report.failures[0].kind, ItemFailureKind::MissingReference);
        assert!(!report.is_balanced());
    }
}
