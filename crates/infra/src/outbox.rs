//! Staging of domain events for publication after commit.

use serde::Serialize;
use uuid::Uuid;

use motoshop_events::{Event, EventEnvelope};

use crate::store::{StoreError, UnitOfWork};

pub const PRODUCT_AGGREGATE: &str = "inventory.product";
pub const PURCHASE_ORDER_AGGREGATE: &str = "purchasing.order";
pub const SALES_ORDER_AGGREGATE: &str = "sales.order";

/// Stage `events` just applied to an aggregate now at `version`.
///
/// Sequence numbers are the aggregate versions the events produced, so the
/// last event gets `version`.
pub fn stage<E>(
    uow: &mut dyn UnitOfWork,
    aggregate_id: Uuid,
    aggregate_type: &str,
    version: u64,
    events: &[E],
) -> Result<(), StoreError>
where
    E: Event + Serialize,
{
    let first = version.saturating_sub(events.len() as u64) + 1;
    for (offset, event) in events.iter().enumerate() {
        let envelope =
            EventEnvelope::from_typed(aggregate_id, aggregate_type, first + offset as u64, event)
                .map_err(|e| StoreError::Corrupt(format!("event serialization failed: {e}")))?;
        uow.stage_event(envelope);
    }
    Ok(())
}
