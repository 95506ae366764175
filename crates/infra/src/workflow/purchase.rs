use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use motoshop_core::{
    Aggregate, AggregateRoot, DomainError, NewLine, OrderKind, SupplierId, price_lines,
};
use motoshop_inventory::{MovementKind, ReferenceKind};
use motoshop_purchasing::{
    CancelPurchaseOrder, ConfirmPurchaseOrder, CreatePurchaseOrder, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderEvent, PurchaseOrderId, ReceivePurchaseOrder,
};

use crate::clock::Clock;
use crate::error::EngineResult;
use crate::ledger::{StockAdjustment, StockLedger};
use crate::numbering::OrderNumberGenerator;
use crate::outbox;
use crate::store::UnitOfWork;

/// Input for creating a purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_id: SupplierId,
    pub lines: Vec<NewLine>,
    /// Defaults to today per the engine clock.
    pub order_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl NewPurchaseOrder {
    pub fn new(supplier_id: SupplierId, lines: Vec<NewLine>) -> Self {
        Self {
            supplier_id,
            lines,
            order_date: None,
            notes: None,
        }
    }
}

/// Purchase order lifecycle: `pending -> confirmed -> received`, cancellable
/// until received. Receiving posts one `IN` movement per line.
#[derive(Debug, Clone)]
pub struct PurchaseOrderWorkflow {
    ledger: StockLedger,
    numbers: OrderNumberGenerator,
    clock: Arc<dyn Clock>,
}

impl PurchaseOrderWorkflow {
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
        request: NewPurchaseOrder,
    ) -> EngineResult<PurchaseOrder> {
        // Shape errors surface before any lookup or number is consumed.
        price_lines(&request.lines)?;
        for line in &request.lines {
            if uow.find_product(line.product_id).await?.is_none() {
                return Err(DomainError::not_found(format!("product {}", line.product_id)).into());
            }
        }

        let order_date = request.order_date.unwrap_or_else(|| self.clock.today());
        let order_number = self
            .numbers
            .next(uow, OrderKind::Purchase, order_date)
            .await?;

        let order_id = PurchaseOrderId::generate();
        let mut order = PurchaseOrder::empty(order_id);
        let events = order.execute(&PurchaseOrderCommand::Create(CreatePurchaseOrder {
            order_id,
            order_number,
            supplier_id: request.supplier_id,
            order_date,
            lines: request.lines,
            notes: request.notes,
            occurred_at: self.clock.now(),
        }))?;

        uow.insert_purchase_order(&order).await?;
        stage(uow, &order, &events)?;

        info!(
            order_id = %order_id,
            order_number = order.order_number().map(|n| n.as_str()),
            total = %order.total(),
            "purchase order created"
        );
        Ok(order)
    }

    pub async fn confirm(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: PurchaseOrderId,
    ) -> EngineResult<PurchaseOrder> {
        let mut order = locked(uow, order_id).await?;
        let events = order.execute(&PurchaseOrderCommand::Confirm(ConfirmPurchaseOrder {
            order_id,
            occurred_at: self.clock.now(),
        }))?;

        uow.update_purchase_order(&order).await?;
        stage(uow, &order, &events)?;
        info!(order_id = %order_id, "purchase order confirmed");
        Ok(order)
    }

    /// Receive the goods: one `IN` movement per line, then `received`.
    pub async fn receive(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: PurchaseOrderId,
    ) -> EngineResult<PurchaseOrder> {
        let mut order = locked(uow, order_id).await?;
        let events = order.handle(&PurchaseOrderCommand::Receive(ReceivePurchaseOrder {
            order_id,
            occurred_at: self.clock.now(),
        }))?;

        for event in &events {
            if let PurchaseOrderEvent::GoodsReceived(received) = event {
                self.ledger
                    .lock_products(uow, received.lines.iter().map(|l| l.product_id))
                    .await?;
                let note = format!("Receipt of purchase order {}", received.order_number);
                for line in &received.lines {
                    self.ledger
                        .adjust_stock(
                            uow,
                            StockAdjustment::new(line.product_id, line.quantity, MovementKind::In)
                                .with_reference(
                                    received.order_number.as_str(),
                                    ReferenceKind::PurchaseOrder,
                                )
                                .with_notes(note.clone()),
                        )
                        .await?;
                }
            }
        }

        for event in &events {
            order.apply(event);
        }
        uow.update_purchase_order(&order).await?;
        stage(uow, &order, &events)?;
        info!(
            order_id = %order_id,
            lines = order.lines().len(),
            "purchase order received"
        );
        Ok(order)
    }

    /// Cancel a pending or confirmed order; no stock effect.
    pub async fn cancel(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: PurchaseOrderId,
        reason: Option<String>,
    ) -> EngineResult<PurchaseOrder> {
        let mut order = locked(uow, order_id).await?;
        let events = order.execute(&PurchaseOrderCommand::Cancel(CancelPurchaseOrder {
            order_id,
            reason,
            occurred_at: self.clock.now(),
        }))?;

        uow.update_purchase_order(&order).await?;
        stage(uow, &order, &events)?;
        info!(order_id = %order_id, "purchase order cancelled");
        Ok(order)
    }

    pub async fn get(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: PurchaseOrderId,
    ) -> EngineResult<PurchaseOrder> {
        Ok(uow
            .find_purchase_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("purchase order {order_id}")))?)
    }
}

async fn locked(
    uow: &mut dyn UnitOfWork,
    order_id: PurchaseOrderId,
) -> EngineResult<PurchaseOrder> {
    Ok(uow
        .lock_purchase_order(order_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("purchase order {order_id}")))?)
}

fn stage(
    uow: &mut dyn UnitOfWork,
    order: &PurchaseOrder,
    events: &[PurchaseOrderEvent],
) -> EngineResult<()> {
    outbox::stage(
        uow,
        *order.id().0.as_uuid(),
        outbox::PURCHASE_ORDER_AGGREGATE,
        order.version(),
        events,
    )?;
    Ok(())
}
