use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use stockledger_core::{BusinessId, LocationId, MovementId, ProductVariationId};
use stockledger_inventory::{Movement, MovementKind, PhysicalCountAnchor, StockSnapshot};

use super::r#trait::{MovementFilter, RepositoryError, StockLedgerRepository};

#[derive(Debug, Default)]
struct BusinessBook {
    default_costing_method: Option<String>,
    locations: BTreeSet<LocationId>,
    variations: HashSet<ProductVariationId>,
    movements: Vec<Movement>,
    snapshots: BTreeMap<(LocationId, ProductVariationId), Decimal>,
}

/// In-memory transaction store plus stock snapshot.
///
/// Intended for tests/dev. The write methods stand in for the surrounding
/// system: `record` appends a movement and bumps the running total the same
/// way the business operations would.
#[derive(Debug, Default)]
pub struct InMemoryStockLedger {
    books: RwLock<HashMap<BusinessId, BusinessBook>>,
    next_movement_id: RwLock<i64>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<BusinessId, BusinessBook>) -> T) -> Result<T, RepositoryError> {
        let mut books = self.books.write().map_err(|_| RepositoryError::LockPoisoned)?;
        Ok(f(&mut books))
    }

    fn read<T>(
        &self,
        business_id: BusinessId,
        f: impl FnOnce(&BusinessBook) -> T,
    ) -> Result<Option<T>, RepositoryError> {
        let books = self.books.read().map_err(|_| RepositoryError::LockPoisoned)?;
        Ok(books.get(&business_id).map(f))
    }

    pub fn register_location(&self, business_id: BusinessId, location_id: LocationId) -> Result<(), RepositoryError> {
        self.write(|books| {
            books.entry(business_id).or_default().locations.insert(location_id);
        })
    }

    pub fn register_variation(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
    ) -> Result<(), RepositoryError> {
        self.write(|books| {
            books
                .entry(business_id)
                .or_default()
                .variations
                .insert(product_variation_id);
        })
    }

    /// Remove a variation from the catalog while leaving its stock rows behind.
    pub fn retire_variation(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
    ) -> Result<(), RepositoryError> {
        self.write(|books| {
            if let Some(book) = books.get_mut(&business_id) {
                book.variations.remove(&product_variation_id);
            }
        })
    }

    pub fn set_default_costing_method(
        &self,
        business_id: BusinessId,
        method: impl Into<String>,
    ) -> Result<(), RepositoryError> {
        let method = method.into();
        self.write(|books| {
            books.entry(business_id).or_default().default_costing_method = Some(method);
        })
    }

    /// Overwrite the live running total, bypassing history.
    pub fn set_snapshot_quantity(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        quantity: Decimal,
    ) -> Result<(), RepositoryError> {
        self.write(|books| {
            books
                .entry(business_id)
                .or_default()
                .snapshots
                .insert((location_id, product_variation_id), quantity);
        })
    }

    /// Append a movement and update the snapshot. References are registered
    /// on first use.
    pub fn record(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        occurred_at: DateTime<Utc>,
        kind: MovementKind,
    ) -> Result<Movement, RepositoryError> {
        let id = {
            let mut next = self
                .next_movement_id
                .write()
                .map_err(|_| RepositoryError::LockPoisoned)?;
            *next += 1;
            MovementId(*next)
        };

        let movement = Movement {
            id,
            product_variation_id,
            location_id,
            occurred_at,
            kind,
        };

        self.write(|books| {
            let book = books.entry(business_id).or_default();
            book.locations.insert(location_id);
            book.variations.insert(product_variation_id);
            *book
                .snapshots
                .entry((location_id, product_variation_id))
                .or_insert(Decimal::ZERO) += movement.signed_quantity();
            book.movements.push(movement.clone());
        })?;

        Ok(movement)
    }

    fn item_history(
        book: &BusinessBook,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
    ) -> impl Iterator<Item = &Movement> {
        book.movements
            .iter()
            .filter(move |m| m.product_variation_id == product_variation_id && m.location_id == location_id)
    }
}

#[async_trait::async_trait]
impl StockLedgerRepository for InMemoryStockLedger {
    async fn movements(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        filter: MovementFilter,
    ) -> Result<Vec<Movement>, RepositoryError> {
        let mut out = self
            .read(business_id, |book| {
                Self::item_history(book, product_variation_id, location_id)
                    .filter(|m| filter.matches(m))
                    .cloned()
                    .collect::<Vec<_>>()
            })?
            .unwrap_or_default();
        out.sort_by_key(Movement::ordering_key);
        Ok(out)
    }

    async fn latest_anchor_before(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        before: DateTime<Utc>,
    ) -> Result<Option<PhysicalCountAnchor>, RepositoryError> {
        Ok(self
            .read(business_id, |book| {
                stockledger_inventory::latest_anchor_before(
                    Self::item_history(book, product_variation_id, location_id),
                    before,
                )
            })?
            .flatten())
    }

    async fn stock_snapshot(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
    ) -> Result<Option<StockSnapshot>, RepositoryError> {
        Ok(self
            .read(business_id, |book| {
                if !book.variations.contains(&product_variation_id) || !book.locations.contains(&location_id) {
                    return None;
                }
                let quantity = book
                    .snapshots
                    .get(&(location_id, product_variation_id))
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                Some(StockSnapshot {
                    product_variation_id,
                    location_id,
                    quantity,
                })
            })?
            .flatten())
    }

    async fn stocked_items(
        &self,
        business_id: BusinessId,
        location_id: LocationId,
    ) -> Result<Vec<StockSnapshot>, RepositoryError> {
        Ok(self
            .read(business_id, |book| {
                book.snapshots
                    .iter()
                    .filter(|((loc, _), qty)| *loc == location_id && !qty.is_zero())
                    .map(|((loc, pv), qty)| StockSnapshot {
                        product_variation_id: *pv,
                        location_id: *loc,
                        quantity: *qty,
                    })
                    .collect::<Vec<_>>()
            })?
            .unwrap_or_default())
    }

    async fn locations(&self, business_id: BusinessId) -> Result<Vec<LocationId>, RepositoryError> {
        Ok(self
            .read(business_id, |book| book.locations.iter().copied().collect::<Vec<_>>())?
            .unwrap_or_default())
    }

    async fn default_costing_method(
        &self,
        business_id: BusinessId,
    ) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .read(business_id, |book| book.default_costing_method.clone())?
            .flatten())
    }

    async fn has_movements_after(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        after: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .read(business_id, |book| {
                Self::item_history(book, product_variation_id, location_id).any(|m| m.occurred_at > after)
            })?
            .unwrap_or(false))
    }
}
