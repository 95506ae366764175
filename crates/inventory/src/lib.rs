//! Inventory domain module: products and their stock movements.
//!
//! This crate contains the stock rules (what a movement does to a product's
//! stock, when it is refused), implemented purely as deterministic domain logic
//! (no IO, no storage). Locking and persistence live in `motoshop-infra`.

pub mod movement;
pub mod product;

pub use movement::{
    HistoryRange, MovementId, MovementKind, PostMovement, ReferenceKind, StockMovement,
    replay_stock,
};
pub use product::{NewProduct, Product, ProductSnapshot};
