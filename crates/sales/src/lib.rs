//! Sales domain module (sales orders).
//!
//! This crate contains the sales order lifecycle rules (discount bounds, which
//! transitions move stock), implemented purely as deterministic domain logic.
//! Stock checks and movements are orchestrated by `motoshop-infra`.

pub mod order;

pub use order::{
    ApplyDiscount, CancelSalesOrder, ConfirmSalesOrder, CreateSalesOrder, DeliverSalesOrder,
    DiscountApplied, SalesOrder, SalesOrderCancelled, SalesOrderCommand, SalesOrderConfirmed,
    SalesOrderCreated, SalesOrderDelivered, SalesOrderEvent, SalesOrderId, SalesOrderSnapshot,
    SalesOrderStatus,
};
