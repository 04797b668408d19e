//! Postgres-backed stock ledger reads.
//!
//! Maps the `stock_movements`, `stock_snapshots` and `business_settings`
//! tables (see `migrations/`) onto [`StockLedgerRepository`].
//!
//! ## Consistency
//!
//! Single-statement reads run at the pool's default isolation. The composite
//! reads (`valuation_inputs`, `ledger_slice`) run inside one
//! `REPEATABLE READ, READ ONLY` transaction so the snapshot row and the
//! movement rows come from the same database snapshot, and a business
//! transaction that is only partly committed is never observed.
//!
//! ## Error Mapping
//!
//! | Source | RepositoryError |
//! |--------|-----------------|
//! | Any `sqlx::Error` while executing | `Database` |
//! | Row column type mismatch / unknown `kind` / invalid quantities | `Decode` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockledger_core::{BusinessId, LocationId, MovementId, ProductVariationId};
use stockledger_inventory::{
    Correction, Inbound, Movement, MovementDirection, MovementKind, Outbound, PhysicalCountAnchor,
    ResolvedWindow, StockSnapshot,
};

use super::r#trait::{
    LedgerSlice, MovementFilter, RepositoryError, StockLedgerRepository, ValuationInputs,
};

/// Postgres-backed, read-only stock ledger.
///
/// `Send + Sync`; the pool handles connection sharing.
#[derive(Debug, Clone)]
pub struct PostgresStockLedger {
    pool: Arc<PgPool>,
}

impl PostgresStockLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, RepositoryError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))
    }

    async fn begin_snapshot(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;
        Ok(tx)
    }
}

#[derive(Debug, FromRow)]
struct MovementRow {
    movement_id: i64,
    product_variation_id: Uuid,
    location_id: Uuid,
    occurred_at: DateTime<Utc>,
    kind: String,
    quantity: Decimal,
    unit_cost: Option<Decimal>,
    counted_quantity: Option<Decimal>,
}

impl TryFrom<MovementRow> for Movement {
    type Error = RepositoryError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let decode = |e: stockledger_core::DomainError| {
            RepositoryError::Decode(format!("movement {}: {e}", row.movement_id))
        };

        let kind = match row.kind.as_str() {
            "purchase_receipt" => {
                MovementKind::PurchaseReceipt(Inbound::new(row.quantity, row.unit_cost).map_err(decode)?)
            }
            "transfer_in" => MovementKind::TransferIn(Inbound::new(row.quantity, row.unit_cost).map_err(decode)?),
            "opening_stock" => {
                MovementKind::OpeningStock(Inbound::new(row.quantity, row.unit_cost).map_err(decode)?)
            }
            "sale" => MovementKind::Sale(Outbound::new(-row.quantity).map_err(decode)?),
            "transfer_out" => MovementKind::TransferOut(Outbound::new(-row.quantity).map_err(decode)?),
            "correction" => {
                let counted = row.counted_quantity.ok_or_else(|| {
                    RepositoryError::Decode(format!(
                        "correction {} has no counted_quantity",
                        row.movement_id
                    ))
                })?;
                MovementKind::Correction(Correction::new(row.quantity, counted).map_err(decode)?)
            }
            other => {
                return Err(RepositoryError::Decode(format!(
                    "movement {} has unknown kind '{other}'",
                    row.movement_id
                )));
            }
        };

        Ok(Movement {
            id: MovementId(row.movement_id),
            product_variation_id: ProductVariationId::from_uuid(row.product_variation_id),
            location_id: LocationId::from_uuid(row.location_id),
            occurred_at: row.occurred_at,
            kind,
        })
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    product_variation_id: Uuid,
    location_id: Uuid,
    quantity: Decimal,
}

impl From<SnapshotRow> for StockSnapshot {
    fn from(row: SnapshotRow) -> Self {
        StockSnapshot {
            product_variation_id: ProductVariationId::from_uuid(row.product_variation_id),
            location_id: LocationId::from_uuid(row.location_id),
            quantity: row.quantity,
        }
    }
}

fn direction_param(direction: Option<MovementDirection>) -> Option<&'static str> {
    direction.map(|d| match d {
        MovementDirection::Inbound => "inbound",
        MovementDirection::Outbound => "outbound",
    })
}

async fn fetch_movements(
    conn: &mut PgConnection,
    business_id: BusinessId,
    product_variation_id: ProductVariationId,
    location_id: LocationId,
    filter: MovementFilter,
) -> Result<Vec<Movement>, RepositoryError> {
    let rows: Vec<MovementRow> = sqlx::query_as(
        r#"
        SELECT
            movement_id,
            product_variation_id,
            location_id,
            occurred_at,
            kind,
            quantity,
            unit_cost,
            counted_quantity
        FROM stock_movements
        WHERE business_id = $1
          AND product_variation_id = $2
          AND location_id = $3
          AND ($4::timestamptz IS NULL OR occurred_at >= $4)
          AND ($5::timestamptz IS NULL OR occurred_at <= $5)
          AND ($6::text IS NULL
               OR ($6 = 'inbound' AND quantity > 0)
               OR ($6 = 'outbound' AND quantity < 0))
        ORDER BY occurred_at ASC, movement_id ASC
        "#,
    )
    .bind(business_id.as_uuid())
    .bind(product_variation_id.as_uuid())
    .bind(location_id.as_uuid())
    .bind(filter.since)
    .bind(filter.until)
    .bind(direction_param(filter.direction))
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_movements", e))?;

    rows.into_iter().map(Movement::try_from).collect()
}

async fn fetch_anchor(
    conn: &mut PgConnection,
    business_id: BusinessId,
    product_variation_id: ProductVariationId,
    location_id: LocationId,
    before: DateTime<Utc>,
) -> Result<Option<PhysicalCountAnchor>, RepositoryError> {
    let row: Option<(i64, DateTime<Utc>, Option<Decimal>)> = sqlx::query_as(
        r#"
        SELECT movement_id, occurred_at, counted_quantity
        FROM stock_movements
        WHERE business_id = $1
          AND product_variation_id = $2
          AND location_id = $3
          AND kind = 'correction'
          AND occurred_at < $4
        ORDER BY occurred_at DESC, movement_id DESC
        LIMIT 1
        "#,
    )
    .bind(business_id.as_uuid())
    .bind(product_variation_id.as_uuid())
    .bind(location_id.as_uuid())
    .bind(before)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_anchor", e))?;

    let Some((movement_id, occurred_at, counted)) = row else {
        return Ok(None);
    };
    let counted_quantity = counted.ok_or_else(|| {
        RepositoryError::Decode(format!("correction {movement_id} has no counted_quantity"))
    })?;
    Ok(Some(PhysicalCountAnchor {
        movement_id: MovementId(movement_id),
        occurred_at,
        counted_quantity,
    }))
}

/// Snapshot lookup joined against the live catalog: a deleted variation or
/// location yields `None`. A live pair with no row yet has zero stock.
async fn fetch_snapshot(
    conn: &mut PgConnection,
    business_id: BusinessId,
    product_variation_id: ProductVariationId,
    location_id: LocationId,
) -> Result<Option<StockSnapshot>, RepositoryError> {
    let row: Option<SnapshotRow> = sqlx::query_as(
        r#"
        SELECT
            pv.product_variation_id,
            l.location_id,
            COALESCE(s.quantity, 0) AS quantity
        FROM product_variations pv
        JOIN locations l
          ON l.business_id = pv.business_id
         AND l.location_id = $3
         AND l.deleted_at IS NULL
        LEFT JOIN stock_snapshots s
          ON s.business_id = pv.business_id
         AND s.product_variation_id = pv.product_variation_id
         AND s.location_id = l.location_id
        WHERE pv.business_id = $1
          AND pv.product_variation_id = $2
          AND pv.deleted_at IS NULL
        "#,
    )
    .bind(business_id.as_uuid())
    .bind(product_variation_id.as_uuid())
    .bind(location_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_snapshot", e))?;

    Ok(row.map(StockSnapshot::from))
}

async fn fetch_has_later(
    conn: &mut PgConnection,
    business_id: BusinessId,
    product_variation_id: ProductVariationId,
    location_id: LocationId,
    after: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM stock_movements
            WHERE business_id = $1
              AND product_variation_id = $2
              AND location_id = $3
              AND occurred_at > $4
        )
        "#,
    )
    .bind(business_id.as_uuid())
    .bind(product_variation_id.as_uuid())
    .bind(location_id.as_uuid())
    .bind(after)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_has_later", e))?;

    Ok(exists)
}

#[async_trait::async_trait]
impl StockLedgerRepository for PostgresStockLedger {
    #[instrument(
        skip(self, filter),
        fields(
            business_id = %business_id,
            product_variation_id = %product_variation_id,
            location_id = %location_id,
            movement_count = tracing::field::Empty
        ),
        err
    )]
    async fn movements(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        filter: MovementFilter,
    ) -> Result<Vec<Movement>, RepositoryError> {
        let mut conn = self.acquire().await?;
        let movements =
            fetch_movements(&mut conn, business_id, product_variation_id, location_id, filter).await?;
        Span::current().record("movement_count", movements.len());
        Ok(movements)
    }

    async fn latest_anchor_before(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        before: DateTime<Utc>,
    ) -> Result<Option<PhysicalCountAnchor>, RepositoryError> {
        let mut conn = self.acquire().await?;
        fetch_anchor(&mut conn, business_id, product_variation_id, location_id, before).await
    }

    async fn stock_snapshot(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
    ) -> Result<Option<StockSnapshot>, RepositoryError> {
        let mut conn = self.acquire().await?;
        fetch_snapshot(&mut conn, business_id, product_variation_id, location_id).await
    }

    #[instrument(skip(self), fields(business_id = %business_id, location_id = %location_id), err)]
    async fn stocked_items(
        &self,
        business_id: BusinessId,
        location_id: LocationId,
    ) -> Result<Vec<StockSnapshot>, RepositoryError> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT product_variation_id, location_id, quantity
            FROM stock_snapshots
            WHERE business_id = $1
              AND location_id = $2
              AND quantity <> 0
            ORDER BY product_variation_id ASC
            "#,
        )
        .bind(business_id.as_uuid())
        .bind(location_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stocked_items", e))?;

        Ok(rows.into_iter().map(StockSnapshot::from).collect())
    }

    async fn locations(&self, business_id: BusinessId) -> Result<Vec<LocationId>, RepositoryError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT location_id
            FROM locations
            WHERE business_id = $1 AND deleted_at IS NULL
            ORDER BY location_id ASC
            "#,
        )
        .bind(business_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("locations", e))?;

        Ok(rows.into_iter().map(|(id,)| LocationId::from_uuid(id)).collect())
    }

    async fn default_costing_method(
        &self,
        business_id: BusinessId,
    ) -> Result<Option<String>, RepositoryError> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT default_costing_method FROM business_settings WHERE business_id = $1",
        )
        .bind(business_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("default_costing_method", e))?;

        Ok(row.and_then(|(m,)| m))
    }

    async fn has_movements_after(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        after: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut conn = self.acquire().await?;
        fetch_has_later(&mut conn, business_id, product_variation_id, location_id, after).await
    }

    #[instrument(
        skip(self),
        fields(product_variation_id = %product_variation_id, location_id = %location_id),
        err
    )]
    async fn valuation_inputs(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
    ) -> Result<Option<ValuationInputs>, RepositoryError> {
        let mut tx = self.begin_snapshot().await?;

        let Some(snapshot) = fetch_snapshot(&mut tx, business_id, product_variation_id, location_id).await?
        else {
            return Ok(None);
        };
        let movements = fetch_movements(
            &mut tx,
            business_id,
            product_variation_id,
            location_id,
            MovementFilter::all(),
        )
        .await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(Some(ValuationInputs { snapshot, movements }))
    }

    #[instrument(
        skip(self),
        fields(product_variation_id = %product_variation_id, location_id = %location_id),
        err
    )]
    async fn ledger_slice(
        &self,
        business_id: BusinessId,
        product_variation_id: ProductVariationId,
        location_id: LocationId,
        window: ResolvedWindow,
    ) -> Result<Option<LedgerSlice>, RepositoryError> {
        let mut tx = self.begin_snapshot().await?;

        let Some(snapshot) = fetch_snapshot(&mut tx, business_id, product_variation_id, location_id).await?
        else {
            return Ok(None);
        };
        let anchor = fetch_anchor(&mut tx, business_id, product_variation_id, location_id, window.start).await?;

        let mut filter = MovementFilter::all().until(window.end);
        if let Some(a) = anchor {
            filter = filter.since(a.occurred_at);
        }
        let movements = fetch_movements(&mut tx, business_id, product_variation_id, location_id, filter).await?;

        let has_later_movements = if window.ends_now {
            false
        } else {
            fetch_has_later(&mut tx, business_id, product_variation_id, location_id, window.end).await?
        };

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(Some(LedgerSlice {
            snapshot,
            anchor,
            movements,
            has_later_movements,
        }))
    }
}

/// Map sqlx errors to repository errors.
fn map_sqlx_error(operation: &str, error: sqlx::Error) -> RepositoryError {
    match error {
        sqlx::Error::ColumnDecode { index, source } => {
            RepositoryError::Decode(format!("{operation}: column {index}: {source}"))
        }
        sqlx::Error::Decode(source) => RepositoryError::Decode(format!("{operation}: {source}")),
        other => RepositoryError::Database(format!("{operation}: {other}")),
    }
}
