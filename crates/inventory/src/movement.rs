//! Stock movements as read from the transaction store.
//!
//! A movement is one signed change in quantity for a product variation at a
//! location. The sign and cost rules live in the types: inbound variants
//! carry a positive quantity and an optional cost, outbound variants carry a
//! positive magnitude and no cost at all, and corrections carry a signed
//! delta together with the physically counted quantity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, LocationId, MovementId, ProductVariationId};

/// Stock arriving at a location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    quantity: Decimal,
    unit_cost: Option<Decimal>,
}

impl Inbound {
    pub fn new(quantity: Decimal, unit_cost: Option<Decimal>) -> DomainResult<Self> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("inbound quantity must be positive"));
        }
        if unit_cost.is_some_and(|c| c.is_sign_negative() && !c.is_zero()) {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        Ok(Self { quantity, unit_cost })
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Cost per unit as recorded on the receipt, if any.
    pub fn unit_cost(&self) -> Option<Decimal> {
        self.unit_cost
    }
}

/// Stock leaving a location. Consumption is costed from layers, never from
/// the outbound record, so there is no cost field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    quantity: Decimal,
}

impl Outbound {
    pub fn new(quantity: Decimal) -> DomainResult<Self> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("outbound quantity must be positive"));
        }
        Ok(Self { quantity })
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }
}

/// Administrative correction written after a physical count.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    delta: Decimal,
    counted_quantity: Decimal,
}

impl Correction {
    pub fn new(delta: Decimal, counted_quantity: Decimal) -> DomainResult<Self> {
        if counted_quantity.is_sign_negative() && !counted_quantity.is_zero() {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }
        Ok(Self {
            delta,
            counted_quantity,
        })
    }

    /// Signed adjustment applied to the running balance.
    pub fn delta(&self) -> Decimal {
        self.delta
    }

    /// Quantity found on the shelf when the count was taken.
    pub fn counted_quantity(&self) -> Decimal {
        self.counted_quantity
    }
}

/// The six movement kinds the surrounding system produces.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MovementKind {
    PurchaseReceipt(Inbound),
    TransferIn(Inbound),
    OpeningStock(Inbound),
    Sale(Outbound),
    TransferOut(Outbound),
    Correction(Correction),
}

/// Direction of a movement by the sign of its quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    Inbound,
    Outbound,
}

impl MovementKind {
    /// Stable storage/type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::PurchaseReceipt(_) => "purchase_receipt",
            MovementKind::TransferIn(_) => "transfer_in",
            MovementKind::OpeningStock(_) => "opening_stock",
            MovementKind::Sale(_) => "sale",
            MovementKind::TransferOut(_) => "transfer_out",
            MovementKind::Correction(_) => "correction",
        }
    }

    pub fn signed_quantity(&self) -> Decimal {
        match self {
            MovementKind::PurchaseReceipt(i)
            | MovementKind::TransferIn(i)
            | MovementKind::OpeningStock(i) => i.quantity,
            MovementKind::Sale(o) | MovementKind::TransferOut(o) => -o.quantity,
            MovementKind::Correction(c) => c.delta,
        }
    }

    /// Acquisition data for the inbound kinds; `None` for everything else.
    pub fn acquisition(&self) -> Option<&Inbound> {
        match self {
            MovementKind::PurchaseReceipt(i)
            | MovementKind::TransferIn(i)
            | MovementKind::OpeningStock(i) => Some(i),
            _ => None,
        }
    }

    /// Direction by sign. A zero-delta correction has no direction.
    pub fn direction(&self) -> Option<MovementDirection> {
        let q = self.signed_quantity();
        if q > Decimal::ZERO {
            Some(MovementDirection::Inbound)
        } else if q < Decimal::ZERO {
            Some(MovementDirection::Outbound)
        } else {
            None
        }
    }
}

/// One row of the append-only transaction store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub product_variation_id: ProductVariationId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
    pub kind: MovementKind,
}

impl Movement {
    pub fn signed_quantity(&self) -> Decimal {
        self.kind.signed_quantity()
    }

    /// Chronological ordering key: timestamp, then insertion order.
    pub fn ordering_key(&self) -> (DateTime<Utc>, MovementId) {
        (self.occurred_at, self.id)
    }

    /// The physical count this movement records, if it is a correction.
    pub fn as_anchor(&self) -> Option<PhysicalCountAnchor> {
        match self.kind {
            MovementKind::Correction(c) => Some(PhysicalCountAnchor {
                movement_id: self.id,
                occurred_at: self.occurred_at,
                counted_quantity: c.counted_quantity,
            }),
            _ => None,
        }
    }
}

/// Sort movements into replay order.
pub fn sort_chronologically(movements: &mut [Movement]) {
    movements.sort_by_key(Movement::ordering_key);
}

/// A verified physical count; supersedes every computed balance before it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalCountAnchor {
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
    pub counted_quantity: Decimal,
}

impl PhysicalCountAnchor {
    pub fn ordering_key(&self) -> (DateTime<Utc>, MovementId) {
        (self.occurred_at, self.movement_id)
    }
}

/// Latest anchor strictly before `before`, chosen by ordering key.
pub fn latest_anchor_before<'a>(
    movements: impl IntoIterator<Item = &'a Movement>,
    before: DateTime<Utc>,
) -> Option<PhysicalCountAnchor> {
    movements
        .into_iter()
        .filter(|m| m.occurred_at < before)
        .filter_map(Movement::as_anchor)
        .max_by_key(PhysicalCountAnchor::ordering_key)
}

/// Live running total maintained by the surrounding system.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub product_variation_id: ProductVariationId,
    pub location_id: LocationId,
    pub quantity: Decimal,
}
