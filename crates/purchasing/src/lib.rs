//! Purchasing domain module (purchase orders).
//!
//! This crate contains the purchase order lifecycle rules, implemented purely as
//! deterministic domain logic (no IO, no storage). Receiving goods into stock is
//! orchestrated by `motoshop-infra`.

pub mod order;

pub use order::{
    CancelPurchaseOrder, ConfirmPurchaseOrder, CreatePurchaseOrder, GoodsReceived, PurchaseOrder,
    PurchaseOrderCancelled, PurchaseOrderCommand, PurchaseOrderConfirmed, PurchaseOrderCreated,
    PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderSnapshot, PurchaseOrderStatus,
    ReceivePurchaseOrder,
};
