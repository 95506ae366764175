use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use motoshop_core::{
    Aggregate, AggregateRoot, CustomerId, DomainError, Money, NewLine, OrderKind, OrderLine,
    OrderNumber, price_lines, quantities_by_product,
};
use motoshop_inventory::{MovementKind, ReferenceKind};
use motoshop_sales::{
    ApplyDiscount, CancelSalesOrder, ConfirmSalesOrder, CreateSalesOrder, DeliverSalesOrder,
    SalesOrder, SalesOrderCommand, SalesOrderEvent, SalesOrderId,
};

use crate::clock::Clock;
use crate::error::EngineResult;
use crate::ledger::{StockAdjustment, StockLedger};
use crate::numbering::OrderNumberGenerator;
use crate::outbox;
use crate::store::UnitOfWork;

/// Input for creating a sales order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSalesOrder {
    pub customer_id: CustomerId,
    pub lines: Vec<NewLine>,
    pub discount: Option<Money>,
    /// Confirm (and deduct stock) in the same unit of work.
    pub confirm_now: bool,
    /// Defaults to today per the engine clock.
    pub order_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl NewSalesOrder {
    pub fn new(customer_id: CustomerId, lines: Vec<NewLine>) -> Self {
        Self {
            customer_id,
            lines,
            discount: None,
            confirm_now: false,
            order_date: None,
            notes: None,
        }
    }
}

/// Sales order lifecycle: `pending -> confirmed -> delivered`, cancellable
/// until delivered.
///
/// Stock leaves on confirmation (one `OUT` per line, after a locked hard check)
/// and comes back if a confirmed order is cancelled (one `IN` per line).
#[derive(Debug, Clone)]
pub struct SalesOrderWorkflow {
    ledger: StockLedger,
    numbers: OrderNumberGenerator,
    clock: Arc<dyn Clock>,
}

impl SalesOrderWorkflow {
    pub fn new(ledger: StockLedger, numbers: OrderNumberGenerator, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            numbers,
            clock,
        }
    }

    pub async fn create(
        &self,
        uow: &mut dyn UnitOfWork,
        request: NewSalesOrder,
    ) -> EngineResult<SalesOrder> {
        price_lines(&request.lines)?;

        // Soft check: unlocked, only to fail fast. Confirmation re-checks under lock.
        let required = quantities_by_product(
            request.lines.iter().map(|l| (l.product_id, l.quantity)),
        )?;
        for (product_id, quantity) in &required {
            let product = uow
                .find_product(*product_id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
            product.ensure_available(*quantity)?;
        }

        let order_date = request.order_date.unwrap_or_else(|| self.clock.today());
        let order_number = self.numbers.next(uow, OrderKind::Sales, order_date).await?;

        let order_id = SalesOrderId::generate();
        let mut order = SalesOrder::empty(order_id);
        let events = order.execute(&SalesOrderCommand::Create(CreateSalesOrder {
            order_id,
            order_number,
            customer_id: request.customer_id,
            order_date,
            lines: request.lines,
            discount: request.discount.unwrap_or(Money::ZERO),
            notes: request.notes,
            occurred_at: self.clock.now(),
        }))?;

        uow.insert_sales_order(&order).await?;
        stage(uow, &order, &events)?;

        info!(
            order_id = %order_id,
            order_number = order.order_number().map(|n| n.as_str()),
            total = %order.total(),
            "sales order created"
        );

        if request.confirm_now {
            return self.confirm(uow, order_id).await;
        }
        Ok(order)
    }

    /// Hard check under lock, then one `OUT` per line and `confirmed`.
    pub async fn confirm(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: SalesOrderId,
    ) -> EngineResult<SalesOrder> {
        let mut order = locked(uow, order_id).await?;
        let events = order.handle(&SalesOrderCommand::Confirm(ConfirmSalesOrder {
            order_id,
            occurred_at: self.clock.now(),
        }))?;

        for event in &events {
            if let SalesOrderEvent::Confirmed(confirmed) = event {
                let required = quantities_by_product(
                    confirmed.lines.iter().map(|l| (l.product_id, l.quantity)),
                )?;
                self.ledger.lock_and_verify(uow, &required).await?;
                self.post_lines(
                    uow,
                    &confirmed.order_number,
                    &confirmed.lines,
                    MovementKind::Out,
                    ReferenceKind::SalesOrder,
                    format!("Sale - order {}", confirmed.order_number),
                )
                .await?;
            }
        }

        for event in &events {
            order.apply(event);
        }
        uow.update_sales_order(&order).await?;
        stage(uow, &order, &events)?;
        info!(order_id = %order_id, "sales order confirmed");
        Ok(order)
    }

    pub async fn apply_discount(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: SalesOrderId,
        amount: Money,
    ) -> EngineResult<SalesOrder> {
        let mut order = locked(uow, order_id).await?;
        let events = order.execute(&SalesOrderCommand::ApplyDiscount(ApplyDiscount {
            order_id,
            amount,
            occurred_at: self.clock.now(),
        }))?;

        uow.update_sales_order(&order).await?;
        stage(uow, &order, &events)?;
        info!(order_id = %order_id, discount = %amount, total = %order.total(), "discount applied");
        Ok(order)
    }

    /// Mark a confirmed order delivered; stock already left at confirmation.
    pub async fn deliver(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: SalesOrderId,
    ) -> EngineResult<SalesOrder> {
        let mut order = locked(uow, order_id).await?;
        let events = order.execute(&SalesOrderCommand::Deliver(DeliverSalesOrder {
            order_id,
            occurred_at: self.clock.now(),
        }))?;

        uow.update_sales_order(&order).await?;
        stage(uow, &order, &events)?;
        info!(order_id = %order_id, "sales order delivered");
        Ok(order)
    }

    /// Cancel a pending or confirmed order, returning a confirmed order's stock.
    pub async fn cancel(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: SalesOrderId,
        reason: Option<String>,
    ) -> EngineResult<SalesOrder> {
        let mut order = locked(uow, order_id).await?;
        let events = order.handle(&SalesOrderCommand::Cancel(CancelSalesOrder {
            order_id,
            reason,
            occurred_at: self.clock.now(),
        }))?;

        for event in &events {
            if let SalesOrderEvent::Cancelled(cancelled) = event {
                if cancelled.restock {
                    self.ledger
                        .lock_products(uow, cancelled.lines.iter().map(|l| l.product_id))
                        .await?;
                    self.post_lines(
                        uow,
                        &cancelled.order_number,
                        &cancelled.lines,
                        MovementKind::In,
                        ReferenceKind::SalesOrderCancellation,
                        format!("Return for cancellation of order {}", cancelled.order_number),
                    )
                    .await?;
                }
            }
        }

        for event in &events {
            order.apply(event);
        }
        uow.update_sales_order(&order).await?;
        stage(uow, &order, &events)?;
        info!(order_id = %order_id, "sales order cancelled");
        Ok(order)
    }

    pub async fn get(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: SalesOrderId,
    ) -> EngineResult<SalesOrder> {
        Ok(uow
            .find_sales_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("sales order {order_id}")))?)
    }

    async fn post_lines(
        &self,
        uow: &mut dyn UnitOfWork,
        order_number: &OrderNumber,
        lines: &[OrderLine],
        kind: MovementKind,
        reference_kind: ReferenceKind,
        note: String,
    ) -> EngineResult<()> {
        for line in lines {
            self.ledger
                .adjust_stock(
                    uow,
                    StockAdjustment::new(line.product_id, line.quantity, kind)
                        .with_reference(order_number.as_str(), reference_kind)
                        .with_notes(note.clone()),
                )
                .await?;
        }
        Ok(())
    }
}

async fn locked(uow: &mut dyn UnitOfWork, order_id: SalesOrderId) -> EngineResult<SalesOrder> {
    Ok(uow
        .lock_sales_order(order_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("sales order {order_id}")))?)
}

fn stage(
    uow: &mut dyn UnitOfWork,
    order: &SalesOrder,
    events: &[SalesOrderEvent],
) -> EngineResult<()> {
    outbox::stage(
        uow,
        *order.id().0.as_uuid(),
        outbox::SALES_ORDER_AGGREGATE,
        order.version(),
        events,
    )?;
    Ok(())
}
