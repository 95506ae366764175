//! Order workflows: state transitions plus the stock movements they imply,
//! executed inside the caller's unit of work.

pub mod purchase;
pub mod sales;

pub use purchase::{NewPurchaseOrder, PurchaseOrderWorkflow};
pub use sales::{NewSalesOrder, SalesOrderWorkflow};
