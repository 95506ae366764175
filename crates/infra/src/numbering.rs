//! Order Number Generator: `<OC|OV>-<YYYYMMDD>-<NNNN>`, sequential per kind and day.

use chrono::NaiveDate;
use tracing::debug;

use motoshop_core::{OrderKind, OrderNumber};

use crate::error::EngineResult;
use crate::store::UnitOfWork;

/// Issues order numbers from the store's per-prefix counter.
///
/// The counter row stays locked until the caller's unit of work ends, so
/// concurrent creations for the same kind and day are serialized and a
/// rolled-back creation gives its number back.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderNumberGenerator;

impl OrderNumberGenerator {
    pub fn new() -> Self {
        Self
    }

    pub async fn next(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: OrderKind,
        date: NaiveDate,
    ) -> EngineResult<OrderNumber> {
        let prefix = kind.prefix(date);
        let sequence = uow.next_order_sequence(&prefix).await?;
        let number = OrderNumber::format(&prefix, sequence);
        debug!(order_number = %number, "order number issued");
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, Store};

    #[tokio::test]
    async fn numbers_are_sequential_per_kind_and_day() {
        let store = InMemoryStore::new();
        let generator = OrderNumberGenerator::new();
        let day = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let next_day = NaiveDate::from_ymd_opt(2024, 3, 16).unwrap();

        let mut uow = store.begin().await.unwrap();
        let a = generator.next(uow.as_mut(), OrderKind::Sales, day).await.unwrap();
        let b = generator.next(uow.as_mut(), OrderKind::Sales, day).await.unwrap();
        let c = generator.next(uow.as_mut(), OrderKind::Purchase, day).await.unwrap();
        let d = generator.next(uow.as_mut(), OrderKind::Sales, next_day).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(a.as_str(), "OV-20240315-0001");
        assert_eq!(b.as_str(), "OV-20240315-0002");
        assert_eq!(c.as_str(), "OC-20240315-0001");
        assert_eq!(d.as_str(), "OV-20240316-0001");
    }
}
