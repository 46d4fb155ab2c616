//! Postgres-backed stock store.
//!
//! Catalog rows live in `products`, the movement log in `stock_movements`
//! (see `migrations/0001_stock_ledger.sql`).
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Movement id inserted twice |
//! | Database (serialization failure) | `40001` | `Concurrency` | Conflicting concurrent transaction |
//! | Database (deadlock detected) | `40P01` | `Concurrency` | Lock cycle between two writers |
//! | Database (check constraint violation) | `23514` | `Storage` | Non-positive quantity, unknown type |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed | N/A | `Storage` | Connection pool was closed |
//! | ColumnDecode / Decode | N/A | `Corrupt` | Row could not be decoded |
//! | Other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! ## Thread Safety
//!
//! `PostgresStockStore` is `Send + Sync` and can be shared across threads.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tokio::runtime::RuntimeFlavor;
use tracing::{Span, instrument};

use depot_core::{MovementId, ProductId, UnitId};
use depot_inventory::{AggregatedDelta, MovementEvent, StockWrite, TimeWindow};
use depot_products::{ContainerType, Product};

use super::{LedgerSnapshot, MovementCommit, StockStore, StoreError};
use crate::config::DatabaseConfig;

/// Schema of the stock ledger tables. Idempotent.
pub const SCHEMA: &str = include_str!("../../migrations/0001_stock_ledger.sql");

/// Postgres-backed catalog and movement log.
///
/// `commit_movement` runs in one transaction: the written product rows are
/// locked with `SELECT ... FOR UPDATE`, their versions checked, the movement
/// inserted and the counters updated. Any failure rolls everything back.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool sized by the database configuration.
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .context("failed to connect to the stock database")?;
        Ok(Self::new(pool))
    }

    /// Create the ledger tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Insert or replace a catalog row as-is.
    #[instrument(skip(self, product), fields(product_id = %product.id, unit_id = %product.unit_id), err)]
    pub async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        let version = i64::try_from(product.version)
            .map_err(|_| StoreError::Storage(format!("version out of range for {}", product.id)))?;

        sqlx::query(
            r#"
            INSERT INTO products (
                id, unit_id, name, container_type, pair_id,
                on_hand, unit_price, active, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                unit_id = EXCLUDED.unit_id,
                name = EXCLUDED.name,
                container_type = EXCLUDED.container_type,
                pair_id = EXCLUDED.pair_id,
                on_hand = EXCLUDED.on_hand,
                unit_price = EXCLUDED.unit_price,
                active = EXCLUDED.active,
                version = EXCLUDED.version
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(product.unit_id.as_uuid())
        .bind(&product.name)
        .bind(product.container.map(ContainerType::as_attr))
        .bind(product.pair_id.map(uuid::Uuid::from))
        .bind(product.on_hand)
        .bind(product.unit_price)
        .bind(product.active)
        .bind(version)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;

        Ok(())
    }

    /// Append a movement recorded by another system (sales, purchases).
    #[instrument(skip(self, event), fields(movement_id = %event.id, product_id = %event.product_id), err)]
    pub async fn record_external_movement(&self, event: &MovementEvent) -> Result<(), StoreError> {
        insert_movement(&*self.pool, event).await
    }

    #[instrument(
        skip(self),
        fields(unit_id = ?unit_id.map(|u| u.to_string()), product_count = tracing::field::Empty),
        err
    )]
    pub async fn fetch_active_products(&self, unit_id: Option<UnitId>) -> Result<Vec<Product>, StoreError> {
        let products = select_active_products(&*self.pool, unit_id).await?;
        Span::current().record("product_count", products.len());
        Ok(products)
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn fetch_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, unit_id, name, container_type, pair_id,
                   on_hand, unit_price, active, version
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;

        row.as_ref().map(decode_product).transpose()
    }

    #[instrument(skip(self, product_ids), fields(product_count = product_ids.len()), err)]
    pub async fn fetch_movements(
        &self,
        product_ids: &[ProductId],
        window: &TimeWindow,
    ) -> Result<Vec<MovementEvent>, StoreError> {
        let ids: Vec<uuid::Uuid> = product_ids.iter().map(|id| *id.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            SELECT id, unit_id, product_id, movement_type, quantity, occurred_at, note
            FROM stock_movements
            WHERE product_id = ANY($1)
              AND occurred_at >= $2
              AND occurred_at <= $3
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(&ids)
        .bind(window.start())
        .bind(window.end())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_movements", e))?;

        rows.iter().map(decode_movement).collect()
    }

    /// One grouped pass over the window; products without movements are absent.
    #[instrument(
        skip(self),
        fields(
            unit_id = %unit_id,
            start = %window.start(),
            end = %window.end(),
            product_count = tracing::field::Empty
        ),
        err
    )]
    pub async fn fetch_aggregates(
        &self,
        unit_id: UnitId,
        window: &TimeWindow,
    ) -> Result<HashMap<ProductId, AggregatedDelta>, StoreError> {
        let totals = select_aggregates(&*self.pool, unit_id, window).await?;
        Span::current().record("product_count", totals.len());
        Ok(totals)
    }

    /// Catalog and window totals read inside one `REPEATABLE READ` transaction,
    /// so both reflect the same committed state.
    #[instrument(
        skip(self),
        fields(
            unit_id = %unit_id,
            start = %window.start(),
            end = %window.end(),
            product_count = tracing::field::Empty
        ),
        err
    )]
    pub async fn fetch_ledger_snapshot(
        &self,
        unit_id: UnitId,
        window: &TimeWindow,
    ) -> Result<LedgerSnapshot, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let products = select_active_products(&mut *tx, Some(unit_id)).await?;
        let deltas = select_aggregates(&mut *tx, unit_id, window).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("product_count", products.len());
        Ok(LedgerSnapshot { products, deltas })
    }

    /// Insert the movement and apply every stock write in one transaction.
    #[instrument(
        skip(self, commit),
        fields(
            movement_id = %commit.event.id,
            unit_id = %commit.event.unit_id,
            product_id = %commit.event.product_id,
            write_count = commit.writes.len()
        ),
        err
    )]
    pub async fn apply_commit(&self, commit: MovementCommit) -> Result<MovementEvent, StoreError> {
        let MovementCommit { event, writes } = commit;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Lock in id order so two writers on the same pair cannot deadlock.
        let mut ids: Vec<uuid::Uuid> = writes.iter().map(|w| *w.product_id.as_uuid()).collect();
        ids.sort();
        let locked = sqlx::query(
            r#"
            SELECT id, unit_id, active, version
            FROM products
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_products", e))?;

        let mut current: HashMap<uuid::Uuid, LockedRow> = HashMap::with_capacity(locked.len());
        for row in &locked {
            let id: uuid::Uuid = row.try_get("id").map_err(corrupt)?;
            current.insert(
                id,
                LockedRow {
                    unit_id: row.try_get("unit_id").map_err(corrupt)?,
                    active: row.try_get("active").map_err(corrupt)?,
                    version: row.try_get("version").map_err(corrupt)?,
                },
            );
        }

        for w in &writes {
            check_locked(w, current.get(w.product_id.as_uuid()), event.unit_id)?;
        }

        insert_movement(&mut *tx, &event).await?;

        for w in &writes {
            sqlx::query(
                r#"
                UPDATE products
                SET on_hand = $2, version = version + 1
                WHERE id = $1
                "#,
            )
            .bind(w.product_id.as_uuid())
            .bind(w.new_on_hand)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_stock", e))?;
        }

        // Dropping an uncommitted transaction rolls it back.
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(event)
    }

    /// Run a store future from the synchronous trait.
    ///
    /// Requires a multi-threaded tokio runtime: `block_in_place` cannot park a
    /// current-thread runtime, so that case is reported instead.
    fn block_on<F: Future>(&self, fut: F) -> Result<F::Output, StoreError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StoreError::Storage(
                "PostgresStockStore requires a tokio runtime; call it from within a runtime context".to_string(),
            )
        })?;
        ensure_multi_thread(handle.runtime_flavor())?;
        Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
    }
}

/// Product row as seen under `FOR UPDATE`.
#[derive(Debug, Clone, Copy)]
struct LockedRow {
    unit_id: uuid::Uuid,
    active: bool,
    version: i64,
}

/// A planned write may land only on an active row of the movement's unit that
/// is still at the version the plan was made against.
fn check_locked(write: &StockWrite, locked: Option<&LockedRow>, unit_id: UnitId) -> Result<(), StoreError> {
    let Some(row) = locked else {
        return Err(StoreError::NotFound(format!("product {}", write.product_id)));
    };
    // Deactivated since the caller's read: the movement must not land.
    if row.unit_id != *unit_id.as_uuid() || !row.active {
        return Err(StoreError::NotFound(format!(
            "active product {} in unit {unit_id}",
            write.product_id
        )));
    }
    let version = u64::try_from(row.version)
        .map_err(|_| StoreError::Corrupt(format!("negative version on product {}", write.product_id)))?;
    write
        .expected_version
        .check(version)
        .map_err(|e| StoreError::Concurrency(format!("product {}: {e}", write.product_id)))
}

fn ensure_multi_thread(flavor: RuntimeFlavor) -> Result<(), StoreError> {
    match flavor {
        RuntimeFlavor::MultiThread => Ok(()),
        other => Err(StoreError::Storage(format!(
            "PostgresStockStore needs a multi-threaded tokio runtime, found {other:?}"
        ))),
    }
}

async fn select_active_products<'e, E>(executor: E, unit_id: Option<UnitId>) -> Result<Vec<Product>, StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, unit_id, name, container_type, pair_id,
               on_hand, unit_price, active, version
        FROM products
        WHERE active AND ($1::uuid IS NULL OR unit_id = $1)
        ORDER BY id ASC
        "#,
    )
    .bind(unit_id.map(uuid::Uuid::from))
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("list_active_products", e))?;

    rows.iter().map(decode_product).collect()
}

/// One grouped pass over the window; products without movements are absent.
///
/// Sums come back as NUMERIC and are saturated into `i64` here, so a huge
/// total marks the delta as overflowed instead of failing the query.
async fn select_aggregates<'e, E>(
    executor: E,
    unit_id: UnitId,
    window: &TimeWindow,
) -> Result<HashMap<ProductId, AggregatedDelta>, StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT
            m.product_id,
            COALESCE(SUM(m.quantity) FILTER (WHERE m.movement_type = 'sale'), 0) AS sales,
            COALESCE(SUM(m.quantity) FILTER (WHERE m.movement_type = 'purchase'), 0) AS purchases,
            COALESCE(SUM(m.quantity) FILTER (WHERE m.movement_type = 'manual_in'), 0) AS manual_in,
            COALESCE(SUM(m.quantity) FILTER (WHERE m.movement_type = 'manual_out'), 0) AS manual_out,
            COALESCE(SUM(m.quantity) FILTER (WHERE m.movement_type = 'damage'), 0) AS damages
        FROM stock_movements m
        JOIN products p ON p.id = m.product_id AND p.unit_id = m.unit_id
        WHERE m.unit_id = $1
          AND m.occurred_at >= $2
          AND m.occurred_at <= $3
        GROUP BY m.product_id
        "#,
    )
    .bind(unit_id.as_uuid())
    .bind(window.start())
    .bind(window.end())
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("aggregate_movements", e))?;

    let mut totals = HashMap::with_capacity(rows.len());
    for row in rows {
        let product_id: uuid::Uuid = row.try_get("product_id").map_err(corrupt)?;
        let mut delta = AggregatedDelta::default();
        for (column, slot) in [
            ("sales", &mut delta.sales),
            ("purchases", &mut delta.purchases),
            ("manual_in", &mut delta.manual_in),
            ("manual_out", &mut delta.manual_out),
            ("damages", &mut delta.damages),
        ] {
            let total: Decimal = row.try_get(column).map_err(corrupt)?;
            let (value, overflowed) = saturate_total(total);
            *slot = value;
            delta.overflowed |= overflowed;
        }
        totals.insert(ProductId::from_uuid(product_id), delta);
    }
    Ok(totals)
}

/// Clamp a NUMERIC sum into `i64`; the flag is set when clamping happened.
fn saturate_total(total: Decimal) -> (i64, bool) {
    match total.to_i64() {
        Some(value) => (value, false),
        None if total.is_sign_negative() => (i64::MIN, true),
        None => (i64::MAX, true),
    }
}

async fn insert_movement<'e, E>(executor: E, event: &MovementEvent) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, unit_id, product_id, movement_type, quantity, occurred_at, note
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(event.id.as_uuid())
    .bind(event.unit_id.as_uuid())
    .bind(event.product_id.as_uuid())
    .bind(event.movement_type.as_str())
    .bind(event.quantity)
    .bind(event.occurred_at)
    .bind(event.note.as_deref())
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn corrupt(err: sqlx::Error) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

// SQLx row types

#[derive(Debug)]
struct ProductRow {
    id: uuid::Uuid,
    unit_id: uuid::Uuid,
    name: String,
    container_type: Option<String>,
    pair_id: Option<uuid::Uuid>,
    on_hand: i64,
    unit_price: Decimal,
    active: bool,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            unit_id: row.try_get("unit_id")?,
            name: row.try_get("name")?,
            container_type: row.try_get("container_type")?,
            pair_id: row.try_get("pair_id")?,
            on_hand: row.try_get("on_hand")?,
            unit_price: row.try_get("unit_price")?,
            active: row.try_get("active")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let version = u64::try_from(row.version)
            .map_err(|_| StoreError::Corrupt(format!("negative version on product {}", row.id)))?;
        Ok(Product {
            id: ProductId::from_uuid(row.id),
            unit_id: UnitId::from_uuid(row.unit_id),
            name: row.name,
            container: ContainerType::from_attr(row.container_type.as_deref()),
            pair_id: row.pair_id.map(ProductId::from_uuid),
            on_hand: row.on_hand,
            unit_price: row.unit_price,
            active: row.active,
            version,
        })
    }
}

fn decode_product(row: &PgRow) -> Result<Product, StoreError> {
    ProductRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize product row: {e}")))?
        .try_into()
}

#[derive(Debug)]
struct MovementRow {
    id: uuid::Uuid,
    unit_id: uuid::Uuid,
    product_id: uuid::Uuid,
    movement_type: String,
    quantity: i64,
    occurred_at: DateTime<Utc>,
    note: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            unit_id: row.try_get("unit_id")?,
            product_id: row.try_get("product_id")?,
            movement_type: row.try_get("movement_type")?,
            quantity: row.try_get("quantity")?,
            occurred_at: row.try_get("occurred_at")?,
            note: row.try_get("note")?,
        })
    }
}

impl TryFrom<MovementRow> for MovementEvent {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type = row
            .movement_type
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("movement {}: {e}", row.id)))?;
        Ok(MovementEvent {
            id: MovementId::from_uuid(row.id),
            unit_id: UnitId::from_uuid(row.unit_id),
            product_id: ProductId::from_uuid(row.product_id),
            movement_type,
            quantity: row.quantity,
            occurred_at: row.occurred_at,
            note: row.note,
        })
    }
}

fn decode_movement(row: &PgRow) -> Result<MovementEvent, StoreError> {
    MovementRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize movement row: {e}")))?
        .try_into()
}

// Implement StockStore trait

impl StockStore for PostgresStockStore {
    fn list_active_products(&self, unit_id: Option<UnitId>) -> Result<Vec<Product>, StoreError> {
        self.block_on(self.fetch_active_products(unit_id))?
    }

    fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        self.block_on(self.fetch_product(product_id))?
    }

    fn list_movements(
        &self,
        product_ids: &[ProductId],
        window: &TimeWindow,
    ) -> Result<Vec<MovementEvent>, StoreError> {
        self.block_on(self.fetch_movements(product_ids, window))?
    }

    fn aggregate_movements(
        &self,
        unit_id: UnitId,
        window: &TimeWindow,
    ) -> Result<HashMap<ProductId, AggregatedDelta>, StoreError> {
        self.block_on(self.fetch_aggregates(unit_id, window))?
    }

    fn ledger_snapshot(&self, unit_id: UnitId, window: &TimeWindow) -> Result<LedgerSnapshot, StoreError> {
        self.block_on(self.fetch_ledger_snapshot(unit_id, window))?
    }

    fn commit_movement(&self, commit: MovementCommit) -> Result<MovementEvent, StoreError> {
        self.block_on(self.apply_commit(commit))?
    }
}
