//! Ledger replay: opening balance, in-window movements, closing balance.
//!
//! Replay starts from the latest physical count before the window (or from
//! zero), rolls forward to the window start, then accumulates the window's
//! inbound and outbound totals. The closing balance is finally compared with
//! the live snapshot, but that comparison only means something when nothing
//! can have happened after the window closed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use stockledger_core::{DomainError, DomainResult, LocationId, MovementId, ProductVariationId};

use crate::checked;
use crate::movement::{Movement, PhysicalCountAnchor, StockSnapshot};

/// Where a reconciliation window closes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "at", rename_all = "snake_case")]
pub enum WindowEnd {
    /// The present instant, as reported by the caller's clock.
    Now,
    At(DateTime<Utc>),
}

/// Requested reconciliation window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerWindow {
    pub start: DateTime<Utc>,
    pub end: WindowEnd,
}

impl LedgerWindow {
    pub fn new(start: DateTime<Utc>, end: WindowEnd) -> Self {
        Self { start, end }
    }

    pub fn until_now(start: DateTime<Utc>) -> Self {
        Self::new(start, WindowEnd::Now)
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(start, WindowEnd::At(end))
    }

    /// Pin the window to concrete instants.
    ///
    /// An explicit end at or after `now` counts as ending now.
    pub fn resolve(&self, now: DateTime<Utc>) -> DomainResult<ResolvedWindow> {
        let (end, ends_now) = match self.end {
            WindowEnd::Now => (now, true),
            WindowEnd::At(at) => (at, at >= now),
        };
        if end < self.start {
            return Err(DomainError::validation(format!(
                "window end {end} precedes window start {}",
                self.start
            )));
        }
        Ok(ResolvedWindow {
            start: self.start,
            end,
            ends_now,
        })
    }
}

/// A window with a concrete end.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub ends_now: bool,
}

/// Balances rebuilt from history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReplay {
    pub opening_balance: Decimal,
    pub total_in: Decimal,
    pub total_out: Decimal,
    pub closing_balance: Decimal,
    pub anchor: Option<PhysicalCountAnchor>,
    /// Movements replayed between the anchor and the window start.
    pub replayed_movements: usize,
    pub window_movements: usize,
}

/// Rebuild opening and closing balances for `window`.
///
/// `movements` may contain anything; only those after the anchor (by
/// timestamp, then id) and up to the window end are used.
pub fn replay(
    anchor: Option<PhysicalCountAnchor>,
    movements: &[Movement],
    window: &ResolvedWindow,
) -> DomainResult<LedgerReplay> {
    let mut ordered: Vec<&Movement> = movements.iter().collect();
    ordered.sort_by_key(|m| m.ordering_key());

    let after_anchor = |m: &Movement| match anchor {
        Some(a) => m.ordering_key() > a.ordering_key(),
        None => true,
    };

    let mut opening_balance = anchor.map(|a| a.counted_quantity).unwrap_or(Decimal::ZERO);
    let mut replayed_movements = 0;
    let mut total_in = Decimal::ZERO;
    let mut total_out = Decimal::ZERO;
    let mut window_movements = 0;

    for m in ordered {
        if m.occurred_at < window.start {
            if after_anchor(m) {
                opening_balance = checked::add(opening_balance, m.signed_quantity())?;
                replayed_movements += 1;
            }
        } else if m.occurred_at <= window.end {
            let q = m.signed_quantity();
            if q > Decimal::ZERO {
                total_in = checked::add(total_in, q)?;
            } else {
                total_out = checked::sub(total_out, q)?;
            }
            window_movements += 1;
        }
    }

    debug!(
        anchored = anchor.is_some(),
        replayed_movements,
        window_movements,
        %opening_balance,
        "ledger replayed"
    );

    Ok(LedgerReplay {
        opening_balance,
        total_in,
        total_out,
        closing_balance: checked::sub(checked::add(opening_balance, total_in)?, total_out)?,
        anchor,
        replayed_movements,
        window_movements,
    })
}

/// How a closing balance relates to the live snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiscrepancyStatus {
    /// The comparison is valid and the figures agree.
    Balanced,
    /// The comparison is valid and the figures disagree.
    Genuine { difference: Decimal },
    /// The window closed in the past and later movements exist, so a
    /// difference is expected.
    MovementsAfterWindowEnd { difference: Decimal },
}

impl DiscrepancyStatus {
    /// `comparable` is true when no movement can exist past the window end.
    /// `difference` is `closing_balance - system_quantity`.
    pub fn classify(difference: Decimal, comparable: bool) -> Self {
        if !comparable {
            Self::MovementsAfterWindowEnd { difference }
        } else if difference.is_zero() {
            Self::Balanced
        } else {
            Self::Genuine { difference }
        }
    }

    /// Only genuine discrepancies warrant operational alerting.
    pub fn is_alertable(&self) -> bool {
        matches!(self, Self::Genuine { .. })
    }
}

/// Full reconciliation outcome for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub product_variation_id: ProductVariationId,
    pub location_id: LocationId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub opening_balance: Decimal,
    pub total_in: Decimal,
    pub total_out: Decimal,
    pub closing_balance: Decimal,
    /// Current, unbounded live quantity.
    pub system_quantity: Decimal,
    /// `closing_balance - system_quantity`; read together with `status`.
    pub discrepancy: Decimal,
    pub status: DiscrepancyStatus,
    pub anchor_movement_id: Option<MovementId>,
    pub replayed_movements: usize,
    pub window_movements: usize,
}

/// Replay one item and compare against its snapshot.
///
/// `has_later_movements` tells whether anything was recorded after a window
/// that ends in the past; it is ignored for windows ending now.
pub fn reconcile_item(
    snapshot: &StockSnapshot,
    anchor: Option<PhysicalCountAnchor>,
    movements: &[Movement],
    window: &ResolvedWindow,
    has_later_movements: bool,
) -> DomainResult<ReconciliationResult> {
    let ledger = replay(anchor, movements, window)?;
    let discrepancy = checked::sub(ledger.closing_balance, snapshot.quantity)?;
    let comparable = window.ends_now || !has_later_movements;
    let status = DiscrepancyStatus::classify(discrepancy, comparable);

    Ok(ReconciliationResult {
        product_variation_id: snapshot.product_variation_id,
        location_id: snapshot.location_id,
        window_start: window.start,
        window_end: window.end,
        opening_balance: ledger.opening_balance,
        total_in: ledger.total_in,
        total_out: ledger.total_out,
        closing_balance: ledger.closing_balance,
        system_quantity: snapshot.quantity,
        discrepancy,
        status,
        anchor_movement_id: ledger.anchor.map(|a| a.movement_id),
        replayed_movements: ledger.replayed_movements,
        window_movements: ledger.window_movements,
    })
}
