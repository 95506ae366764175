//! Transactional storage boundary.
//!
//! Every workflow operation runs inside one [`UnitOfWork`]: a store transaction
//! holding exclusive row locks until it commits or rolls back. Services never
//! commit; the [`Engine`](crate::Engine) owns the begin/commit boundary.
//!
//! ## Locking contract
//!
//! - `lock_*` methods take an exclusive, unit-of-work-scoped lock on the row
//!   (re-entrant within the same unit of work) and return its current state.
//! - `find_*` methods read without locking; results are advisory.
//! - Saving a product or an existing order requires holding its lock.
//! - Lock waits are bounded; an expired wait is [`StoreError::LockTimeout`].
//! - Callers locking several products do so in ascending `ProductId` order.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use motoshop_core::ProductId;
use motoshop_events::EventEnvelope;
use motoshop_inventory::{HistoryRange, Product, StockMovement};
use motoshop_purchasing::{PurchaseOrder, PurchaseOrderId};
use motoshop_sales::{SalesOrder, SalesOrderId};

/// Storage operation error.
///
/// These are **infrastructure errors** as opposed to domain errors (validation,
/// stock, order state).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection or pool failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Waiting for a row lock exceeded the configured timeout.
    #[error("lock wait timed out: {0}")]
    LockTimeout(String),

    /// Unique violation, deadlock or serialization failure.
    #[error("conflicting concurrent write: {0}")]
    Conflict(String),

    /// A stored row or payload could not be decoded.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// A row was written without holding its lock.
    #[error("row written without holding its lock: {0}")]
    Unlocked(String),

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Transient failures may succeed when the whole operation is retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::LockTimeout(_) | StoreError::Conflict(_)
        )
    }
}

/// A store able to open units of work.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

/// One atomic store transaction.
///
/// Dropping a unit of work without calling [`UnitOfWork::commit`] rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Unlocked read of a product.
    async fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Lock a product row for the rest of the unit of work.
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Insert a new product; the row is locked by this unit of work afterwards.
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Persist a locked product's state.
    async fn save_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Append a movement of a locked product.
    async fn append_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;

    /// Movements of a product within `range`, newest first.
    async fn movements(
        &mut self,
        id: ProductId,
        range: &HistoryRange,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// Products below their minimum stock, lowest stock first.
    async fn low_stock_products(&mut self) -> Result<Vec<Product>, StoreError>;

    async fn find_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError>;

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError>;

    /// Insert a new purchase order with its lines; the row is locked afterwards.
    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError>;

    /// Persist a locked purchase order's header (status, notes, totals).
    async fn update_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError>;

    async fn find_sales_order(&mut self, id: SalesOrderId)
    -> Result<Option<SalesOrder>, StoreError>;

    async fn lock_sales_order(&mut self, id: SalesOrderId)
    -> Result<Option<SalesOrder>, StoreError>;

    /// Insert a new sales order with its lines; the row is locked afterwards.
    async fn insert_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError>;

    /// Persist a locked sales order's header (status, discount, notes, totals).
    async fn update_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError>;

    /// Lock the numbering counter for `prefix` and advance it.
    ///
    /// The first use of a prefix is seeded from the highest sequence already
    /// issued under it. The advance only becomes visible on commit.
    async fn next_order_sequence(&mut self, prefix: &str) -> Result<u32, StoreError>;

    /// Stage an event for publication after a successful commit.
    fn stage_event(&mut self, event: EventEnvelope<JsonValue>);

    /// Commit every write, release all locks and hand back the staged events.
    async fn commit(self: Box<Self>) -> Result<Vec<EventEnvelope<JsonValue>>, StoreError>;

    /// Discard every write and staged event, releasing all locks.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
