//! End-to-end scenarios through the services and the in-memory store.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;

use stockledger_core::{BusinessId, FixedClock, LocationId, ProductVariationId};
use stockledger_infra::{
    EngineConfig, InMemoryStockLedger, ReconciliationService, ValuationService,
};
use stockledger_inventory::{
    CostingMethod, DiscrepancyStatus, Inbound, LedgerWindow, MovementKind, Outbound,
    ValuationWarning,
};

fn t(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + Duration::hours(n)
}

fn dec(n: i64) -> Decimal {
    Decimal::from(n)
}

fn buy(qty: i64, cost: i64) -> MovementKind {
    MovementKind::PurchaseReceipt(Inbound::new(dec(qty), Some(dec(cost))).unwrap())
}

fn sell(qty: i64) -> MovementKind {
    MovementKind::Sale(Outbound::new(dec(qty)).unwrap())
}

struct Shop {
    repo: Arc<InMemoryStockLedger>,
    business: BusinessId,
    location: LocationId,
}

impl Shop {
    fn open() -> Self {
        stockledger_observability::init();
        let shop = Self {
            repo: Arc::new(InMemoryStockLedger::new()),
            business: BusinessId::new(),
            location: LocationId::new(),
        };
        shop.repo.register_location(shop.business, shop.location).unwrap();
        shop
    }

    fn record(&self, pv: ProductVariationId, at: i64, kind: MovementKind) {
        self.repo.record(self.business, pv, self.location, t(at), kind).unwrap();
    }

    fn valuation(&self) -> ValuationService<InMemoryStockLedger> {
        ValuationService::new(Arc::clone(&self.repo), EngineConfig::default())
    }

    fn reconciliation(&self, now: i64) -> ReconciliationService<InMemoryStockLedger> {
        ReconciliationService::new(Arc::clone(&self.repo), EngineConfig::default())
            .with_clock(Arc::new(FixedClock(t(now))))
    }

    fn two_receipts_then_sale(&self) -> ProductVariationId {
        let pv = ProductVariationId::new();
        self.record(pv, 1, buy(10, 5));
        self.record(pv, 2, buy(10, 7));
        self.record(pv, 3, sell(12));
        pv
    }
}

#[tokio::test]
async fn fifo_basic() {
    let shop = Shop::open();
    let pv = shop.two_receipts_then_sale();

    let r = shop
        .valuation()
        .valuate(shop.business, pv, shop.location, Some(CostingMethod::Fifo))
        .await
        .unwrap();

    assert_eq!(r.current_quantity, dec(8));
    assert_eq!(r.total_value, dec(56));
    assert_eq!(r.unit_cost, dec(7));
    assert_eq!(r.cost_layers.len(), 1);
    assert_eq!(r.cost_layers[0].occurred_at, t(2));
    assert_eq!(r.consumed_value, dec(64));
    assert!(r.warnings.is_empty());
}

#[tokio::test]
async fn lifo_basic() {
    let shop = Shop::open();
    let pv = shop.two_receipts_then_sale();

    let r = shop
        .valuation()
        .valuate(shop.business, pv, shop.location, Some(CostingMethod::Lifo))
        .await
        .unwrap();

    assert_eq!(r.current_quantity, dec(8));
    assert_eq!(r.total_value, dec(40));
    assert_eq!(r.unit_cost, dec(5));
    assert_eq!(r.cost_layers[0].occurred_at, t(1));
}

#[tokio::test]
async fn weighted_average_basic() {
    let shop = Shop::open();
    let pv = shop.two_receipts_then_sale();

    let r = shop
        .valuation()
        .valuate(shop.business, pv, shop.location, Some(CostingMethod::WeightedAverage))
        .await
        .unwrap();

    assert_eq!(r.unit_cost, dec(6));
    assert_eq!(r.current_quantity, dec(8));
    assert_eq!(r.total_value, dec(48));
    assert!(r.cost_layers.is_empty());
}

#[tokio::test]
async fn layered_methods_agree_with_snapshot_when_costs_are_complete() {
    let shop = Shop::open();
    let pv = shop.two_receipts_then_sale();
    let service = shop.valuation();

    for method in [CostingMethod::Fifo, CostingMethod::Lifo] {
        let r = service
            .valuate(shop.business, pv, shop.location, Some(method))
            .await
            .unwrap();
        assert_eq!(r.current_quantity, dec(8), "{method}");
        assert_eq!(r.total_value, r.current_quantity * r.unit_cost, "{method}");
    }
}

#[tokio::test]
async fn reconciliation_with_no_in_window_movements() {
    let shop = Shop::open();
    let pv = ProductVariationId::new();
    shop.record(pv, 1, buy(50, 2));

    let r = shop
        .reconciliation(100)
        .reconcile(shop.business, pv, shop.location, LedgerWindow::until_now(t(10)))
        .await
        .unwrap();

    assert_eq!(r.opening_balance, dec(50));
    assert_eq!(r.total_in, Decimal::ZERO);
    assert_eq!(r.total_out, Decimal::ZERO);
    assert_eq!(r.closing_balance, dec(50));
    assert_eq!(r.system_quantity, dec(50));
    assert_eq!(r.discrepancy, Decimal::ZERO);
    assert_eq!(r.status, DiscrepancyStatus::Balanced);
}

#[tokio::test]
async fn oversold_is_flagged_not_dropped() {
    let shop = Shop::open();
    let pv = ProductVariationId::new();
    shop.record(pv, 1, buy(10, 5));
    shop.record(pv, 2, sell(15));

    let r = shop
        .valuation()
        .valuate(shop.business, pv, shop.location, Some(CostingMethod::Fifo))
        .await
        .unwrap();

    assert_eq!(r.current_quantity, Decimal::ZERO);
    assert_eq!(r.total_value, Decimal::ZERO);
    assert!(r.cost_layers.is_empty());
    assert_eq!(
        r.warnings,
        vec![ValuationWarning::Oversold {
            unresolved_quantity: dec(5)
        }]
    );
}

#[tokio::test]
async fn repeated_calls_are_identical() {
    let shop = Shop::open();
    let pv = shop.two_receipts_then_sale();
    let valuation = shop.valuation();
    let reconciliation = shop.reconciliation(50);
    let window = LedgerWindow::between(t(0), t(2));

    let a = valuation.valuate(shop.business, pv, shop.location, None).await.unwrap();
    let b = valuation.valuate(shop.business, pv, shop.location, None).await.unwrap();
    assert_eq!(a, b);

    let x = reconciliation.reconcile(shop.business, pv, shop.location, window).await.unwrap();
    let y = reconciliation.reconcile(shop.business, pv, shop.location, window).await.unwrap();
    assert_eq!(x, y);
    assert!(matches!(x.status, DiscrepancyStatus::MovementsAfterWindowEnd { .. }));
}

#[tokio::test]
async fn results_serialize_with_tagged_status() {
    let shop = Shop::open();
    let pv = ProductVariationId::new();
    shop.record(pv, 1, buy(3, 1));

    let r = shop
        .reconciliation(10)
        .reconcile(shop.business, pv, shop.location, LedgerWindow::until_now(t(0)))
        .await
        .unwrap();

    let value = serde_json::to_value(&r).unwrap();
    assert_eq!(value["status"], json!({ "status": "balanced" }));
    assert_eq!(value["closing_balance"], json!("3"));
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

    /// A window covering all history, ending now, always balances.
    #[test]
    fn full_history_window_balances(deltas in prop::collection::vec(-20i64..40, 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let shop = Shop::open();
        let pv = ProductVariationId::new();

        for (i, d) in deltas.iter().enumerate() {
            let kind = match *d {
                d if d > 0 => buy(d, 3),
                0 => continue,
                d => sell(-d),
            };
            shop.record(pv, i as i64 + 1, kind);
        }
        // Keep the item enumerable even when the net is zero.
        shop.repo.register_variation(shop.business, pv).unwrap();

        let r = rt
            .block_on(shop.reconciliation(1_000).reconcile(
                shop.business,
                pv,
                shop.location,
                LedgerWindow::until_now(t(0)),
            ))
            .unwrap();

        prop_assert_eq!(r.closing_balance, r.system_quantity);
        prop_assert_eq!(r.status, DiscrepancyStatus::Balanced);
    }
}
