//! Postgres-backed store.
//!
//! One [`UnitOfWork`] is one database transaction. Row locks are
//! `SELECT ... FOR UPDATE`, bounded by `SET LOCAL lock_timeout`, and released
//! when the transaction ends.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | StoreError |
//! |------------|-----------------|------------|
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | Database (deadlock / serialization failure) | `40P01` / `40001` | `Conflict` |
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any other | `Backend` |
//! | PoolTimedOut / PoolClosed / Io | N/A | `Unavailable` |
//! | ColumnDecode / Decode | N/A | `Corrupt` |
//! | Other | N/A | `Backend` |

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use motoshop_core::{
    AggregateRoot, CustomerId, DomainError, Money, OrderLine, OrderNumber, ProductId, SupplierId,
};
use motoshop_events::EventEnvelope;
use motoshop_inventory::{
    HistoryRange, MovementId, MovementKind, Product, ProductSnapshot, ReferenceKind, StockMovement,
};
use motoshop_purchasing::{
    PurchaseOrder, PurchaseOrderId, PurchaseOrderSnapshot, PurchaseOrderStatus,
};
use motoshop_sales::{SalesOrder, SalesOrderId, SalesOrderSnapshot, SalesOrderStatus};

use super::{Store, StoreError, UnitOfWork};
use crate::config::EngineConfig;

/// Tables, constraints and indexes the store relies on. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    product_id     UUID PRIMARY KEY,
    sku            TEXT NOT NULL UNIQUE,
    name           TEXT NOT NULL,
    current_stock  BIGINT NOT NULL DEFAULT 0 CHECK (current_stock >= 0),
    minimum_stock  BIGINT NOT NULL DEFAULT 0 CHECK (minimum_stock >= 0),
    purchase_cost  BIGINT NOT NULL CHECK (purchase_cost >= 0),
    sale_price     BIGINT NOT NULL CHECK (sale_price >= 0),
    version        BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS stock_movements (
    position       BIGSERIAL PRIMARY KEY,
    movement_id    UUID NOT NULL UNIQUE,
    product_id     UUID NOT NULL REFERENCES products (product_id) ON DELETE RESTRICT,
    kind           TEXT NOT NULL CHECK (kind IN ('IN', 'OUT', 'ADJUST')),
    quantity       BIGINT NOT NULL CHECK (quantity > 0),
    stock_before   BIGINT NOT NULL,
    stock_after    BIGINT NOT NULL CHECK (stock_after >= 0),
    reference_id   TEXT,
    reference_kind TEXT,
    notes          TEXT,
    occurred_at    TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS stock_movements_product_time
    ON stock_movements (product_id, occurred_at DESC, position DESC);

CREATE TABLE IF NOT EXISTS purchase_orders (
    order_id       UUID PRIMARY KEY,
    order_number   TEXT NOT NULL UNIQUE,
    supplier_id    UUID NOT NULL,
    order_date     DATE NOT NULL,
    status         TEXT NOT NULL,
    subtotal       BIGINT NOT NULL,
    total          BIGINT NOT NULL,
    notes          TEXT NOT NULL DEFAULT '',
    created_at     TIMESTAMPTZ NOT NULL,
    updated_at     TIMESTAMPTZ NOT NULL,
    version        BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS purchase_order_lines (
    order_id       UUID NOT NULL REFERENCES purchase_orders (order_id) ON DELETE CASCADE,
    line_no        INTEGER NOT NULL,
    product_id     UUID NOT NULL REFERENCES products (product_id) ON DELETE RESTRICT,
    quantity       BIGINT NOT NULL CHECK (quantity > 0),
    unit_price     BIGINT NOT NULL CHECK (unit_price >= 0),
    PRIMARY KEY (order_id, line_no)
);

CREATE TABLE IF NOT EXISTS sales_orders (
    order_id       UUID PRIMARY KEY,
    order_number   TEXT NOT NULL UNIQUE,
    customer_id    UUID NOT NULL,
    order_date     DATE NOT NULL,
    status         TEXT NOT NULL,
    subtotal       BIGINT NOT NULL,
    discount       BIGINT NOT NULL DEFAULT 0 CHECK (discount >= 0),
    total          BIGINT NOT NULL,
    notes          TEXT NOT NULL DEFAULT '',
    created_at     TIMESTAMPTZ NOT NULL,
    updated_at     TIMESTAMPTZ NOT NULL,
    version        BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS sales_order_lines (
    order_id       UUID NOT NULL REFERENCES sales_orders (order_id) ON DELETE CASCADE,
    line_no        INTEGER NOT NULL,
    product_id     UUID NOT NULL REFERENCES products (product_id) ON DELETE RESTRICT,
    quantity       BIGINT NOT NULL CHECK (quantity > 0),
    unit_price     BIGINT NOT NULL CHECK (unit_price >= 0),
    PRIMARY KEY (order_id, line_no)
);

CREATE TABLE IF NOT EXISTS order_number_counters (
    prefix         TEXT PRIMARY KEY,
    last_sequence  INTEGER NOT NULL
);
"#;

/// Postgres-backed transactional store.
///
/// `Send + Sync` and cheap to clone; all connections come from the shared pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    /// Open a pool from `config.database_url`.
    pub async fn connect(config: &EngineConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("database_url is not configured".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, config.lock_timeout()))
    }

    /// Create missing tables and indexes.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET does not take bind parameters; the value is an integer we format.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(Box::new(PostgresUnitOfWork {
            tx,
            locked: HashSet::new(),
            events: Vec::new(),
        }))
    }
}

/// Unit of work over one Postgres transaction.
struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
    /// Rows locked `FOR UPDATE` (or inserted) by this transaction.
    locked: HashSet<Uuid>,
    events: Vec<EventEnvelope<JsonValue>>,
}

impl PostgresUnitOfWork {
    fn ensure_locked(&self, id: Uuid, what: &str) -> Result<(), StoreError> {
        if self.locked.contains(&id) {
            Ok(())
        } else {
            Err(StoreError::Unlocked(format!("{what} {id}")))
        }
    }

    async fn fetch_product(
        &mut self,
        id: ProductId,
        for_update: bool,
    ) -> Result<Option<Product>, StoreError> {
        let sql = format!(
            "SELECT product_id, sku, name, current_stock, minimum_stock, purchase_cost, sale_price, version \
             FROM products WHERE product_id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn fetch_lines(
        &mut self,
        table: &str,
        order_id: Uuid,
    ) -> Result<Vec<OrderLine>, StoreError> {
        let sql = format!(
            "SELECT line_no, product_id, quantity, unit_price FROM {table} \
             WHERE order_id = $1 ORDER BY line_no ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_lines", e))?;
        rows.iter().map(line_from_row).collect()
    }

    async fn insert_lines(
        &mut self,
        table: &str,
        order_id: Uuid,
        lines: &[OrderLine],
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {table} (order_id, line_no, product_id, quantity, unit_price) \
             VALUES ($1, $2, $3, $4, $5)"
        );
        for line in lines {
            sqlx::query(&sql)
                .bind(order_id)
                .bind(line.line_no as i32)
                .bind(line.product_id.as_uuid())
                .bind(line.quantity)
                .bind(line.unit_price.minor())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("insert_line", e))?;
        }
        Ok(())
    }

    async fn fetch_purchase_order(
        &mut self,
        id: PurchaseOrderId,
        for_update: bool,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        let sql = format!(
            "SELECT order_id, order_number, supplier_id, order_date, status, subtotal, total, \
             notes, created_at, updated_at, version \
             FROM purchase_orders WHERE order_id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let order_id = *id.0.as_uuid();
        let Some(row) = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_purchase_order", e))?
        else {
            return Ok(None);
        };

        let lines = self.fetch_lines("purchase_order_lines", order_id).await?;
        let snapshot = PurchaseOrderSnapshot {
            order_id: id,
            order_number: order_number_from(&row)?,
            supplier_id: SupplierId::from_uuid(column(&row, "supplier_id")?),
            order_date: column::<NaiveDate>(&row, "order_date")?,
            status: column::<String>(&row, "status")?
                .parse::<PurchaseOrderStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            lines,
            subtotal: Money::from_minor(column(&row, "subtotal")?),
            total: Money::from_minor(column(&row, "total")?),
            notes: column(&row, "notes")?,
            created_at: column(&row, "created_at")?,
            updated_at: column(&row, "updated_at")?,
            version: column::<i64>(&row, "version")? as u64,
        };
        Ok(Some(PurchaseOrder::restore(snapshot)))
    }

    async fn fetch_sales_order(
        &mut self,
        id: SalesOrderId,
        for_update: bool,
    ) -> Result<Option<SalesOrder>, StoreError> {
        let sql = format!(
            "SELECT order_id, order_number, customer_id, order_date, status, subtotal, discount, \
             total, notes, created_at, updated_at, version \
             FROM sales_orders WHERE order_id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let order_id = *id.0.as_uuid();
        let Some(row) = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_sales_order", e))?
        else {
            return Ok(None);
        };

        let lines = self.fetch_lines("sales_order_lines", order_id).await?;
        let snapshot = SalesOrderSnapshot {
            order_id: id,
            order_number: order_number_from(&row)?,
            customer_id: CustomerId::from_uuid(column(&row, "customer_id")?),
            order_date: column::<NaiveDate>(&row, "order_date")?,
            status: column::<String>(&row, "status")?
                .parse::<SalesOrderStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            lines,
            subtotal: Money::from_minor(column(&row, "subtotal")?),
            discount: Money::from_minor(column(&row, "discount")?),
            total: Money::from_minor(column(&row, "total")?),
            notes: column(&row, "notes")?,
            created_at: column(&row, "created_at")?,
            updated_at: column(&row, "updated_at")?,
            version: column::<i64>(&row, "version")? as u64,
        };
        Ok(Some(SalesOrder::restore(snapshot)))
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.fetch_product(id, false).await
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let product = self.fetch_product(id, true).await?;
        if product.is_some() {
            self.locked.insert(*id.as_uuid());
        }
        Ok(product)
    }

    #[instrument(
        skip(self, product),
        fields(product_id = %product.id_typed(), sku = product.sku()),
        err
    )]
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let snapshot = product.snapshot();
        sqlx::query(
            r#"
            INSERT INTO products (
                product_id, sku, name, current_stock, minimum_stock,
                purchase_cost, sale_price, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(snapshot.product_id.as_uuid())
        .bind(&snapshot.sku)
        .bind(&snapshot.name)
        .bind(snapshot.current_stock)
        .bind(snapshot.minimum_stock)
        .bind(snapshot.purchase_cost.minor())
        .bind(snapshot.sale_price.minor())
        .bind(snapshot.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        self.locked.insert(*snapshot.product_id.as_uuid());
        Ok(())
    }

    async fn save_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let id = product.id_typed();
        self.ensure_locked(*id.as_uuid(), "product")?;
        sqlx::query(
            r#"
            UPDATE products
            SET current_stock = $2, version = $3
            WHERE product_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(product.current_stock())
        .bind(product.version() as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_product", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, movement),
        fields(
            product_id = %movement.product_id,
            kind = %movement.kind,
            quantity = movement.quantity
        ),
        err
    )]
    async fn append_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        self.ensure_locked(*movement.product_id.as_uuid(), "product")?;
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                movement_id, product_id, kind, quantity, stock_before, stock_after,
                reference_id, reference_kind, notes, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(movement.movement_id.0)
        .bind(movement.product_id.as_uuid())
        .bind(movement.kind.as_str())
        .bind(movement.quantity)
        .bind(movement.stock_before)
        .bind(movement.stock_after)
        .bind(movement.reference_id.as_deref())
        .bind(movement.reference_kind.map(ReferenceKind::as_str))
        .bind(movement.notes.as_deref())
        .bind(movement.occurred_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_movement", e))?;
        Ok(())
    }

    #[instrument(skip(self, range), fields(product_id = %id), err)]
    async fn movements(
        &mut self,
        id: ProductId,
        range: &HistoryRange,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                movement_id, product_id, kind, quantity, stock_before, stock_after,
                reference_id, reference_kind, notes, occurred_at
            FROM stock_movements
            WHERE product_id = $1
              AND ($2::timestamptz IS NULL OR occurred_at >= $2)
              AND ($3::timestamptz IS NULL OR occurred_at <= $3)
            ORDER BY occurred_at DESC, position DESC
            "#,
        )
        .bind(id.as_uuid())
        .bind(range.from())
        .bind(range.to())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("movements", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    async fn low_stock_products(&mut self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, sku, name, current_stock, minimum_stock, purchase_cost, sale_price, version
            FROM products
            WHERE current_stock < minimum_stock
            ORDER BY current_stock ASC, sku ASC
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("low_stock_products", e))?;

        rows.iter().map(product_from_row).collect()
    }

    async fn find_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        self.fetch_purchase_order(id, false).await
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        let order = self.fetch_purchase_order(id, true).await?;
        if order.is_some() {
            self.locked.insert(*id.0.as_uuid());
        }
        Ok(order)
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        let snapshot = order
            .snapshot()
            .ok_or_else(|| StoreError::Corrupt("purchase order was never created".to_string()))?;
        let order_id = *snapshot.order_id.0.as_uuid();
        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                order_id, order_number, supplier_id, order_date, status, subtotal, total,
                notes, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(order_id)
        .bind(snapshot.order_number.as_str())
        .bind(snapshot.supplier_id.as_uuid())
        .bind(snapshot.order_date)
        .bind(snapshot.status.as_str())
        .bind(snapshot.subtotal.minor())
        .bind(snapshot.total.minor())
        .bind(&snapshot.notes)
        .bind(snapshot.created_at)
        .bind(snapshot.updated_at)
        .bind(snapshot.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_purchase_order", e))?;

        self.insert_lines("purchase_order_lines", order_id, &snapshot.lines)
            .await?;
        self.locked.insert(order_id);
        Ok(())
    }

    #[instrument(
        skip(self, order),
        fields(order_id = %order.id_typed(), status = %order.status()),
        err
    )]
    async fn update_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        let order_id = *order.id_typed().0.as_uuid();
        self.ensure_locked(order_id, "purchase order")?;
        let updated_at = order.updated_at();
        sqlx::query(
            r#"
            UPDATE purchase_orders
            SET status = $2, subtotal = $3, total = $4, notes = $5, updated_at = $6, version = $7
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(order.status().as_str())
        .bind(order.subtotal().minor())
        .bind(order.total().minor())
        .bind(order.notes())
        .bind(updated_at)
        .bind(order.version() as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_purchase_order", e))?;
        Ok(())
    }

    async fn find_sales_order(
        &mut self,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        self.fetch_sales_order(id, false).await
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn lock_sales_order(
        &mut self,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        let order = self.fetch_sales_order(id, true).await?;
        if order.is_some() {
            self.locked.insert(*id.0.as_uuid());
        }
        Ok(order)
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn insert_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError> {
        let snapshot = order
            .snapshot()
            .ok_or_else(|| StoreError::Corrupt("sales order was never created".to_string()))?;
        let order_id = *snapshot.order_id.0.as_uuid();
        sqlx::query(
            r#"
            INSERT INTO sales_orders (
                order_id, order_number, customer_id, order_date, status, subtotal, discount,
                total, notes, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order_id)
        .bind(snapshot.order_number.as_str())
        .bind(snapshot.customer_id.as_uuid())
        .bind(snapshot.order_date)
        .bind(snapshot.status.as_str())
        .bind(snapshot.subtotal.minor())
        .bind(snapshot.discount.minor())
        .bind(snapshot.total.minor())
        .bind(&snapshot.notes)
        .bind(snapshot.created_at)
        .bind(snapshot.updated_at)
        .bind(snapshot.version as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_sales_order", e))?;

        self.insert_lines("sales_order_lines", order_id, &snapshot.lines)
            .await?;
        self.locked.insert(order_id);
        Ok(())
    }

    #[instrument(
        skip(self, order),
        fields(order_id = %order.id_typed(), status = %order.status()),
        err
    )]
    async fn update_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError> {
        let order_id = *order.id_typed().0.as_uuid();
        self.ensure_locked(order_id, "sales order")?;
        let updated_at = order.updated_at();
        sqlx::query(
            r#"
            UPDATE sales_orders
            SET status = $2, subtotal = $3, discount = $4, total = $5, notes = $6,
                updated_at = $7, version = $8
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(order.status().as_str())
        .bind(order.subtotal().minor())
        .bind(order.discount().minor())
        .bind(order.total().minor())
        .bind(order.notes())
        .bind(updated_at)
        .bind(order.version() as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_sales_order", e))?;
        Ok(())
    }

    /// Upsert the counter row; `ON CONFLICT DO UPDATE` leaves it locked until
    /// the transaction ends.
    #[instrument(skip(self), err)]
    async fn next_order_sequence(&mut self, prefix: &str) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO order_number_counters (prefix, last_sequence)
            VALUES (
                $1,
                COALESCE((
                    SELECT MAX(CAST(split_part(order_number, '-', 3) AS INTEGER))
                    FROM (
                        SELECT order_number FROM purchase_orders WHERE order_number LIKE $1 || '-%'
                        UNION ALL
                        SELECT order_number FROM sales_orders WHERE order_number LIKE $1 || '-%'
                    ) issued
                ), 0) + 1
            )
            ON CONFLICT (prefix)
            DO UPDATE SET last_sequence = order_number_counters.last_sequence + 1
            RETURNING last_sequence
            "#,
        )
        .bind(prefix)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("next_order_sequence", e))?;

        let sequence: i32 = column(&row, "last_sequence")?;
        u32::try_from(sequence)
            .map_err(|_| StoreError::Corrupt(format!("negative sequence {sequence} for {prefix}")))
    }

    fn stage_event(&mut self, event: EventEnvelope<JsonValue>) {
        self.events.push(event);
    }

    #[instrument(skip(self), fields(events = self.events.len()), err)]
    async fn commit(self: Box<Self>) -> Result<Vec<EventEnvelope<JsonValue>>, StoreError> {
        let this = *self;
        this.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(this.events)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("failed to read {name}: {e}")))
}

fn order_number_from(row: &PgRow) -> Result<OrderNumber, StoreError> {
    column::<String>(row, "order_number")?
        .parse()
        .map_err(|e: DomainError| StoreError::Corrupt(e.to_string()))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product::restore(ProductSnapshot {
        product_id: ProductId::from_uuid(column(row, "product_id")?),
        sku: column(row, "sku")?,
        name: column(row, "name")?,
        current_stock: column(row, "current_stock")?,
        minimum_stock: column(row, "minimum_stock")?,
        purchase_cost: Money::from_minor(column(row, "purchase_cost")?),
        sale_price: Money::from_minor(column(row, "sale_price")?),
        version: column::<i64>(row, "version")? as u64,
    }))
}

fn line_from_row(row: &PgRow) -> Result<OrderLine, StoreError> {
    let line_no: i32 = column(row, "line_no")?;
    Ok(OrderLine {
        line_no: u32::try_from(line_no)
            .map_err(|_| StoreError::Corrupt(format!("invalid line number {line_no}")))?,
        product_id: ProductId::from_uuid(column(row, "product_id")?),
        quantity: column(row, "quantity")?,
        unit_price: Money::from_minor(column(row, "unit_price")?),
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let kind: MovementKind = column::<String>(row, "kind")?
        .parse()
        .map_err(|e: DomainError| StoreError::Corrupt(e.to_string()))?;
    let reference_kind = column::<Option<String>>(row, "reference_kind")?
        .map(|raw| raw.parse::<ReferenceKind>())
        .transpose()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(StockMovement {
        movement_id: MovementId(column(row, "movement_id")?),
        product_id: ProductId::from_uuid(column(row, "product_id")?),
        kind,
        quantity: column(row, "quantity")?,
        stock_before: column(row, "stock_before")?,
        stock_after: column(row, "stock_after")?,
        reference_id: column(row, "reference_id")?,
        reference_kind,
        notes: column(row, "notes")?,
        occurred_at: column::<DateTime<Utc>>(row, "occurred_at")?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") => StoreError::LockTimeout(msg),
                // deadlock, serialization failure, unique violation
                Some("40P01") | Some("40001") | Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{operation}: {err}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("{operation}: {err}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
