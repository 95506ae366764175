use chrono::{DateTime, Utc};

/// A domain event: an immutable fact about a product's stock or an order's lifecycle.
///
/// Events are versioned for schema evolution and only ever appended.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "inventory.stock.out", "sales.order.confirmed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
