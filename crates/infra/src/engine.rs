//! Engine facade: the operations offered to the presentation layer.
//!
//! Each operation is one unit of work:
//!
//! ```text
//! begin
//!   ↓
//! workflow / ledger call (locks, checks, movements, order rows, staged events)
//!   ↓
//! Ok  → commit → publish staged events
//! Err → rollback (nothing written, nothing published)
//! ```
//!
//! Business failures are logged at `warn`, infrastructure failures at `error`.
//! A failed publish is logged and otherwise ignored: the data is committed and
//! the bus is at-least-once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{error, info, instrument, warn};

use motoshop_core::{DomainError, Money, ProductId};
use motoshop_events::{EventBus, EventEnvelope, InMemoryEventBus};
use motoshop_inventory::{
    HistoryRange, MovementKind, NewProduct, Product, ReferenceKind, StockMovement,
};
use motoshop_purchasing::{PurchaseOrder, PurchaseOrderId};
use motoshop_sales::{SalesOrder, SalesOrderId};

use crate::clock::{Clock, SystemClock};
use crate::error::{EngineError, EngineResult};
use crate::ledger::{StockAdjustment, StockLedger};
use crate::numbering::OrderNumberGenerator;
use crate::store::{Store, UnitOfWork};
use crate::workflow::{NewPurchaseOrder, NewSalesOrder, PurchaseOrderWorkflow, SalesOrderWorkflow};

/// Bus type used when an engine is built without one.
pub type DefaultBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// Transaction owner composing the store, the ledger and both order workflows.
///
/// - `S`: storage backend ([`InMemoryStore`](crate::InMemoryStore),
///   [`PostgresStore`](crate::PostgresStore))
/// - `B`: bus receiving committed events (optional)
pub struct Engine<S, B = DefaultBus> {
    store: S,
    bus: Option<B>,
    clock: Arc<dyn Clock>,
    ledger: StockLedger,
    purchases: PurchaseOrderWorkflow,
    sales: SalesOrderWorkflow,
}

impl<S> Engine<S>
where
    S: Store,
{
    /// Engine without a bus; committed events are dropped.
    pub fn new(store: S) -> Self {
        Self::assemble(store, None, Arc::new(SystemClock))
    }
}

impl<S, B> Engine<S, B>
where
    S: Store,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn with_bus(store: S, bus: B) -> Self {
        Self::assemble(store, Some(bus), Arc::new(SystemClock))
    }

    /// Replace the time source (movement timestamps, default order dates).
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self::assemble(self.store, self.bus, clock)
    }

    fn assemble(store: S, bus: Option<B>, clock: Arc<dyn Clock>) -> Self {
        let ledger = StockLedger::new(Arc::clone(&clock));
        let numbers = OrderNumberGenerator::new();
        Self {
            purchases: PurchaseOrderWorkflow::new(ledger.clone(), numbers, Arc::clone(&clock)),
            sales: SalesOrderWorkflow::new(ledger.clone(), numbers, Arc::clone(&clock)),
            ledger,
            store,
            bus,
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ---- purchase orders -------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(supplier_id = %request.supplier_id, lines = request.lines.len())
    )]
    pub async fn create_purchase_order(
        &self,
        request: NewPurchaseOrder,
    ) -> EngineResult<PurchaseOrder> {
        let mut uow = self.begin().await?;
        let result = self.purchases.create(uow.as_mut(), request).await;
        self.finish(uow, result).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm_purchase_order(
        &self,
        order_id: PurchaseOrderId,
    ) -> EngineResult<PurchaseOrder> {
        let mut uow = self.begin().await?;
        let result = self.purchases.confirm(uow.as_mut(), order_id).await;
        self.finish(uow, result).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn receive_purchase_order(
        &self,
        order_id: PurchaseOrderId,
    ) -> EngineResult<PurchaseOrder> {
        let mut uow = self.begin().await?;
        let result = self.purchases.receive(uow.as_mut(), order_id).await;
        self.finish(uow, result).await
    }

    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn cancel_purchase_order(
        &self,
        order_id: PurchaseOrderId,
        reason: Option<String>,
    ) -> EngineResult<PurchaseOrder> {
        let mut uow = self.begin().await?;
        let result = self.purchases.cancel(uow.as_mut(), order_id, reason).await;
        self.finish(uow, result).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn purchase_order(&self, order_id: PurchaseOrderId) -> EngineResult<PurchaseOrder> {
        let mut uow = self.begin().await?;
        let result = self.purchases.get(uow.as_mut(), order_id).await;
        self.finish_read(uow, result).await
    }

    // ---- sales orders ----------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(
            customer_id = %request.customer_id,
            lines = request.lines.len(),
            confirm_now = request.confirm_now
        )
    )]
    pub async fn create_sales_order(&self, request: NewSalesOrder) -> EngineResult<SalesOrder> {
        let mut uow = self.begin().await?;
        let result = self.sales.create(uow.as_mut(), request).await;
        self.finish(uow, result).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm_sales_order(&self, order_id: SalesOrderId) -> EngineResult<SalesOrder> {
        let mut uow = self.begin().await?;
        let result = self.sales.confirm(uow.as_mut(), order_id).await;
        self.finish(uow, result).await
    }

    #[instrument(skip(self), fields(order_id = %order_id, amount = %amount))]
    pub async fn apply_discount(
        &self,
        order_id: SalesOrderId,
        amount: Money,
    ) -> EngineResult<SalesOrder> {
        let mut uow = self.begin().await?;
        let result = self.sales.apply_discount(uow.as_mut(), order_id, amount).await;
        self.finish(uow, result).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn deliver_sales_order(&self, order_id: SalesOrderId) -> EngineResult<SalesOrder> {
        let mut uow = self.begin().await?;
        let result = self.sales.deliver(uow.as_mut(), order_id).await;
        self.finish(uow, result).await
    }

    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn cancel_sales_order(
        &self,
        order_id: SalesOrderId,
        reason: Option<String>,
    ) -> EngineResult<SalesOrder> {
        let mut uow = self.begin().await?;
        let result = self.sales.cancel(uow.as_mut(), order_id, reason).await;
        self.finish(uow, result).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn sales_order(&self, order_id: SalesOrderId) -> EngineResult<SalesOrder> {
        let mut uow = self.begin().await?;
        let result = self.sales.get(uow.as_mut(), order_id).await;
        self.finish_read(uow, result).await
    }

    // ---- stock -----------------------------------------------------------

    #[instrument(
        skip(self, request),
        fields(product_id = %request.product_id, kind = %request.kind, quantity = request.quantity)
    )]
    pub async fn adjust_stock(&self, request: StockAdjustment) -> EngineResult<StockMovement> {
        let mut uow = self.begin().await?;
        let result = self.ledger.adjust_stock(uow.as_mut(), request).await;
        self.finish(uow, result).await
    }

    /// Advisory: the answer may be stale by the time the caller acts on it.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn check_available(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> EngineResult<bool> {
        let mut uow = self.begin().await?;
        let result = self
            .ledger
            .check_available(uow.as_mut(), product_id, quantity)
            .await;
        self.finish_read(uow, result).await
    }

    /// Movements of a product, newest first, bounds inclusive.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn movement_history(
        &self,
        product_id: ProductId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<StockMovement>> {
        let range = HistoryRange::new(from, to)?;
        let mut uow = self.begin().await?;
        let result = self
            .ledger
            .movement_history(uow.as_mut(), product_id, &range)
            .await;
        self.finish_read(uow, result).await
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn product(&self, product_id: ProductId) -> EngineResult<Product> {
        let mut uow = self.begin().await?;
        let result: EngineResult<Product> = match uow.find_product(product_id).await {
            Ok(Some(product)) => Ok(product),
            Ok(None) => Err(DomainError::not_found(format!("product {product_id}")).into()),
            Err(err) => Err(err.into()),
        };
        self.finish_read(uow, result).await
    }

    /// Products below their minimum stock, lowest stock first.
    #[instrument(skip(self))]
    pub async fn low_stock_products(&self) -> EngineResult<Vec<Product>> {
        let mut uow = self.begin().await?;
        let result = uow.low_stock_products().await.map_err(EngineError::from);
        self.finish_read(uow, result).await
    }

    /// Catalog hook: register a product at zero stock, then post its opening
    /// balance as an `IN` movement.
    #[instrument(skip(self, new), fields(product_id = %new.product_id, sku = %new.sku))]
    pub async fn register_product(
        &self,
        new: NewProduct,
        opening_stock: i64,
    ) -> EngineResult<Product> {
        if opening_stock < 0 {
            return Err(DomainError::invalid_argument(format!(
                "opening stock cannot be negative, got {opening_stock}"
            ))
            .into());
        }
        let product = Product::register(new)?;

        let mut uow = self.begin().await?;
        let result = self
            .register_in(uow.as_mut(), product, opening_stock)
            .await;
        self.finish(uow, result).await
    }

    async fn register_in(
        &self,
        uow: &mut dyn UnitOfWork,
        product: Product,
        opening_stock: i64,
    ) -> EngineResult<Product> {
        let product_id = product.id_typed();
        uow.insert_product(&product).await?;
        if opening_stock > 0 {
            self.ledger
                .adjust_stock(
                    uow,
                    StockAdjustment::new(product_id, opening_stock, MovementKind::In)
                        .with_reference(product.sku(), ReferenceKind::OpeningBalance)
                        .with_notes("Opening balance"),
                )
                .await?;
        }
        let registered = uow
            .find_product(product_id)
            .await?
            .ok_or_else(|| DomainError::invariant("registered product vanished"))?;
        info!(
            product_id = %product_id,
            opening_stock,
            "product registered"
        );
        Ok(registered)
    }

    // ---- unit-of-work boundary ------------------------------------------

    async fn begin(&self) -> EngineResult<Box<dyn UnitOfWork>> {
        self.store.begin().await.map_err(|err| {
            let err = EngineError::from(err);
            log_failure(&err);
            err
        })
    }

    /// Commit on success (then publish), roll back on failure.
    async fn finish<T>(
        &self,
        uow: Box<dyn UnitOfWork>,
        result: EngineResult<T>,
    ) -> EngineResult<T> {
        match result {
            Ok(value) => match uow.commit().await {
                Ok(events) => {
                    self.publish(events);
                    Ok(value)
                }
                Err(err) => {
                    let err = EngineError::from(err);
                    log_failure(&err);
                    Err(err)
                }
            },
            Err(err) => {
                rollback(uow).await;
                log_failure(&err);
                Err(err)
            }
        }
    }

    /// Read-only operations never commit.
    async fn finish_read<T>(
        &self,
        uow: Box<dyn UnitOfWork>,
        result: EngineResult<T>,
    ) -> EngineResult<T> {
        rollback(uow).await;
        if let Err(err) = &result {
            log_failure(err);
        }
        result
    }

    fn publish(&self, events: Vec<EventEnvelope<JsonValue>>) {
        let Some(bus) = &self.bus else {
            return;
        };
        for envelope in events {
            let event_type = envelope.event_type().to_string();
            if let Err(err) = bus.publish(envelope) {
                warn!(
                    event_type = %event_type,
                    error = ?err,
                    "event publication failed after commit"
                );
            }
        }
    }
}

async fn rollback(uow: Box<dyn UnitOfWork>) {
    if let Err(err) = uow.rollback().await {
        error!(error = %err, "rollback failed");
    }
}

fn log_failure(err: &EngineError) {
    if err.is_business() {
        warn!(kind = ?err.kind(), error = %err, "operation rejected");
    } else {
        error!(
            kind = ?err.kind(),
            retryable = err.is_retryable(),
            error = %err,
            "operation failed"
        );
    }
}
