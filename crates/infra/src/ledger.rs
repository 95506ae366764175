//! Stock Ledger: the only component allowed to change a product's stock.
//!
//! Every change is an append-only [`StockMovement`] written in the same unit of
//! work as the new stock value, so `current_stock` always equals the signed sum
//! of a product's movements.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use motoshop_core::{Aggregate, AggregateRoot, DomainError, ProductId};
use motoshop_inventory::{
    HistoryRange, MovementId, MovementKind, PostMovement, Product, ReferenceKind, StockMovement,
};

use crate::clock::Clock;
use crate::error::EngineResult;
use crate::outbox;
use crate::store::UnitOfWork;

/// A requested stock change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub quantity: i64,
    pub kind: MovementKind,
    pub reference_id: Option<String>,
    pub reference_kind: Option<ReferenceKind>,
    pub notes: Option<String>,
}

impl StockAdjustment {
    pub fn new(product_id: ProductId, quantity: i64, kind: MovementKind) -> Self {
        Self {
            product_id,
            quantity,
            kind,
            reference_id: None,
            reference_kind: None,
            notes: None,
        }
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>, kind: ReferenceKind) -> Self {
        self.reference_id = Some(reference_id.into());
        self.reference_kind = Some(kind);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct StockLedger {
    clock: Arc<dyn Clock>,
}

impl StockLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Lock the product, apply the movement and persist both in `uow`.
    ///
    /// `Out` fails with `InsufficientStock` when stock is short; `Adjust` sets the
    /// stock to exactly `quantity`.
    pub async fn adjust_stock(
        &self,
        uow: &mut dyn UnitOfWork,
        request: StockAdjustment,
    ) -> EngineResult<StockMovement> {
        if request.quantity <= 0 {
            return Err(DomainError::invalid_argument(format!(
                "quantity must be positive, got {}",
                request.quantity
            ))
            .into());
        }

        let mut product = uow
            .lock_product(request.product_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("product {}", request.product_id)))?;

        let cmd = PostMovement {
            movement_id: MovementId::new(),
            product_id: request.product_id,
            kind: request.kind,
            quantity: request.quantity,
            reference_id: request.reference_id,
            reference_kind: request.reference_kind,
            notes: request.notes,
            occurred_at: self.clock.now(),
        };
        let events = product.execute(&cmd)?;
        let movement = events
            .first()
            .cloned()
            .ok_or_else(|| DomainError::invariant("movement was not recorded"))?;

        uow.append_movement(&movement).await?;
        uow.save_product(&product).await?;
        outbox::stage(
            uow,
            *product.id().as_uuid(),
            outbox::PRODUCT_AGGREGATE,
            product.version(),
            &events,
        )?;

        debug!(
            product_id = %movement.product_id,
            kind = %movement.kind,
            quantity = movement.quantity,
            stock_before = movement.stock_before,
            stock_after = movement.stock_after,
            reference_id = movement.reference_id.as_deref(),
            "stock movement posted"
        );
        Ok(movement)
    }

    /// Advisory, non-locking availability check. Unknown products are never available.
    pub async fn check_available(
        &self,
        uow: &mut dyn UnitOfWork,
        product_id: ProductId,
        quantity: i64,
    ) -> EngineResult<bool> {
        Ok(uow
            .find_product(product_id)
            .await?
            .is_some_and(|p| p.has_available(quantity)))
    }

    /// Movements of a product within `range`, newest first.
    pub async fn movement_history(
        &self,
        uow: &mut dyn UnitOfWork,
        product_id: ProductId,
        range: &HistoryRange,
    ) -> EngineResult<Vec<StockMovement>> {
        Ok(uow.movements(product_id, range).await?)
    }

    /// Lock every product in ascending id order, failing on unknown products.
    pub async fn lock_products(
        &self,
        uow: &mut dyn UnitOfWork,
        product_ids: impl IntoIterator<Item = ProductId>,
    ) -> EngineResult<Vec<Product>> {
        let ordered: BTreeSet<ProductId> = product_ids.into_iter().collect();
        let mut locked = Vec::with_capacity(ordered.len());
        for product_id in ordered {
            let product = uow
                .lock_product(product_id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
            locked.push(product);
        }
        Ok(locked)
    }

    /// Hard check ahead of a multi-line deduction.
    ///
    /// Locks every required product (ascending id order) and verifies each can
    /// cover its aggregated quantity. Nothing is mutated; the first shortfall is
    /// returned as `InsufficientStock`.
    pub async fn lock_and_verify(
        &self,
        uow: &mut dyn UnitOfWork,
        requirements: &BTreeMap<ProductId, i64>,
    ) -> EngineResult<()> {
        let locked = self.lock_products(uow, requirements.keys().copied()).await?;
        for product in &locked {
            let required = requirements.get(&product.id_typed()).copied().unwrap_or(0);
            product.ensure_available(required)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::ErrorKind;
    use crate::store::{InMemoryStore, Store};
    use chrono::{TimeZone, Utc};
    use motoshop_core::Money;
    use motoshop_inventory::{NewProduct, replay_stock};
    use proptest::prelude::*;

    fn ledger() -> StockLedger {
        StockLedger::new(Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap(),
        )))
    }

    async fn seeded(store: &InMemoryStore, sku: &str, opening: i64) -> ProductId {
        let product = Product::register(NewProduct {
            product_id: ProductId::new(),
            sku: sku.to_string(),
            name: sku.to_string(),
            minimum_stock: 0,
            purchase_cost: Money::from_minor(500),
            sale_price: Money::from_minor(900),
        })
        .unwrap();
        let product_id = product.id_typed();

        let mut uow = store.begin().await.unwrap();
        uow.insert_product(&product).await.unwrap();
        if opening > 0 {
            ledger()
                .adjust_stock(
                    uow.as_mut(),
                    StockAdjustment::new(product_id, opening, MovementKind::In),
                )
                .await
                .unwrap();
        }
        uow.commit().await.unwrap();
        product_id
    }

    #[tokio::test]
    async fn adjust_stock_stages_one_event_per_movement() {
        let store = InMemoryStore::new();
        let p = seeded(&store, "PAD-FRONT", 0).await;

        let mut uow = store.begin().await.unwrap();
        let movement = ledger()
            .adjust_stock(
                uow.as_mut(),
                StockAdjustment::new(p, 4, MovementKind::In)
                    .with_reference("OC-20240315-0001", ReferenceKind::PurchaseOrder),
            )
            .await
            .unwrap();
        let events = uow.commit().await.unwrap();

        assert_eq!(movement.stock_after, 4);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "inventory.stock.in");
        assert_eq!(events[0].aggregate_type(), outbox::PRODUCT_AGGREGATE);
        assert_eq!(events[0].sequence_number(), 1);
    }

    #[tokio::test]
    async fn lock_and_verify_reports_shortfall_without_mutating() {
        let store = InMemoryStore::new();
        let a = seeded(&store, "CABLE-A", 5).await;
        let b = seeded(&store, "CABLE-B", 1).await;

        let mut uow = store.begin().await.unwrap();
        let requirements = BTreeMap::from([(a, 2), (b, 3)]);
        let err = ledger()
            .lock_and_verify(uow.as_mut(), &requirements)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert!(matches!(
            err.as_domain(),
            Some(DomainError::InsufficientStock { available: 1, requested: 3, .. })
        ));
        uow.rollback().await.unwrap();

        let mut reader = store.begin().await.unwrap();
        let stock_a = reader.find_product(a).await.unwrap().unwrap().current_stock();
        assert_eq!(stock_a, 5);
        assert_eq!(store.movement_count(), 2);
    }

    #[tokio::test]
    async fn lock_products_fails_on_unknown_product() {
        let store = InMemoryStore::new();
        let a = seeded(&store, "BOLT", 1).await;

        let mut uow = store.begin().await.unwrap();
        let err = ledger()
            .lock_products(uow.as_mut(), [ProductId::new(), a])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[derive(Debug, Clone)]
    struct Step {
        kind: MovementKind,
        quantity: i64,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        (
            prop_oneof![
                Just(MovementKind::In),
                Just(MovementKind::Out),
                Just(MovementKind::Adjust)
            ],
            1i64..20,
        )
            .prop_map(|(kind, quantity)| Step { kind, quantity })
    }

    proptest! {
        #[test]
        fn committed_stock_matches_replayed_movements(
            steps in prop::collection::vec(step_strategy(), 1..25)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let store = InMemoryStore::new();
                let p = seeded(&store, "PROP", 0).await;
                let ledger = ledger();

                for step in &steps {
                    let mut uow = store.begin().await.unwrap();
                    let result = ledger
                        .adjust_stock(
                            uow.as_mut(),
                            StockAdjustment::new(p, step.quantity, step.kind),
                        )
                        .await;
                    match result {
                        Ok(_) => {
                            uow.commit().await.unwrap();
                        }
                        Err(err) => {
                            assert_eq!(err.kind(), ErrorKind::InsufficientStock);
                            uow.rollback().await.unwrap();
                        }
                    }
                }

                let mut reader = store.begin().await.unwrap();
                let product = reader.find_product(p).await.unwrap().unwrap();
                let history = reader.movements(p, &HistoryRange::all()).await.unwrap();
                assert!(product.current_stock() >= 0);
                assert_eq!(product.current_stock(), replay_stock(&history));
            });
        }
    }
}
