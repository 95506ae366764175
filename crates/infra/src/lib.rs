//! Infrastructure layer: transactional stores, the stock ledger, order
//! workflows and the `Engine` facade that owns the unit-of-work boundary.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod numbering;
pub mod outbox;
pub mod store;
pub mod workflow;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{DefaultBus, Engine};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use ledger::{StockAdjustment, StockLedger};
pub use numbering::OrderNumberGenerator;
pub use store::{InMemoryStore, PostgresStore, Store, StoreError, UnitOfWork};
pub use workflow::{NewPurchaseOrder, NewSalesOrder, PurchaseOrderWorkflow, SalesOrderWorkflow};
