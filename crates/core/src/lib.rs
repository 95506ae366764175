//! `motoshop-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod order;
pub mod order_number;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, CustomerId, ProductId, SupplierId};
pub use order::{NewLine, OrderLine, append_cancellation_reason, price_lines, quantities_by_product};
pub use order_number::{OrderKind, OrderNumber};
pub use value_object::{Money, ValueObject};
