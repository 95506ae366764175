use serde::{Deserialize, Serialize};

use motoshop_core::{Aggregate, AggregateRoot, DomainError, DomainResult, Money, ProductId};

use crate::movement::{MovementKind, PostMovement, StockMovement};

/// Catalog data needed to register a product with the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    /// Reorder threshold (informational only).
    pub minimum_stock: i64,
    pub purchase_cost: Money,
    pub sale_price: Money,
}

/// Persisted form of a [`Product`], used by storage backends to rehydrate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub current_stock: i64,
    pub minimum_stock: i64,
    pub purchase_cost: Money,
    pub sale_price: Money,
    pub version: u64,
}

/// Aggregate root: Product (its stock level, evolved only by movements).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    current_stock: i64,
    minimum_stock: i64,
    purchase_cost: Money,
    sale_price: Money,
    version: u64,
}

impl Product {
    /// Validate catalog data and create a product with zero stock.
    ///
    /// Opening stock must be posted as a movement so history and stock agree.
    pub fn register(new: NewProduct) -> DomainResult<Self> {
        if new.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if new.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if new.minimum_stock < 0 {
            return Err(DomainError::validation("minimum_stock cannot be negative"));
        }
        if new.purchase_cost.is_negative() || new.sale_price.is_negative() {
            return Err(DomainError::validation("prices cannot be negative"));
        }

        Ok(Self {
            id: new.product_id,
            sku: new.sku,
            name: new.name,
            current_stock: 0,
            minimum_stock: new.minimum_stock,
            purchase_cost: new.purchase_cost,
            sale_price: new.sale_price,
            version: 0,
        })
    }

    pub fn restore(snapshot: ProductSnapshot) -> Self {
        Self {
            id: snapshot.product_id,
            sku: snapshot.sku,
            name: snapshot.name,
            current_stock: snapshot.current_stock,
            minimum_stock: snapshot.minimum_stock,
            purchase_cost: snapshot.purchase_cost,
            sale_price: snapshot.sale_price,
            version: snapshot.version,
        }
    }

    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot {
            product_id: self.id,
            sku: self.sku.clone(),
            name: self.name.clone(),
            current_stock: self.current_stock,
            minimum_stock: self.minimum_stock,
            purchase_cost: self.purchase_cost,
            sale_price: self.sale_price,
            version: self.version,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_stock(&self) -> i64 {
        self.current_stock
    }

    pub fn minimum_stock(&self) -> i64 {
        self.minimum_stock
    }

    pub fn purchase_cost(&self) -> Money {
        self.purchase_cost
    }

    pub fn sale_price(&self) -> Money {
        self.sale_price
    }

    pub fn has_available(&self, quantity: i64) -> bool {
        self.current_stock >= quantity
    }

    pub fn is_below_minimum(&self) -> bool {
        self.current_stock < self.minimum_stock
    }

    /// Fail with `InsufficientStock` unless `quantity` units can be taken out.
    pub fn ensure_available(&self, quantity: i64) -> DomainResult<()> {
        if self.has_available(quantity) {
            Ok(())
        } else {
            Err(DomainError::insufficient_stock(
                self.id,
                self.current_stock,
                quantity,
            ))
        }
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Product {
    type Command = PostMovement;
    type Event = StockMovement;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        self.current_stock = event.stock_after;

        // Deterministic version tracking: +1 per applied movement.
        self.version += 1;
    }

    fn handle(&self, cmd: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if cmd.product_id != self.id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::invalid_argument("quantity must be positive"));
        }

        let stock_after = match cmd.kind {
            MovementKind::In => self
                .current_stock
                .checked_add(cmd.quantity)
                .ok_or_else(|| DomainError::invalid_argument("stock overflow"))?,
            MovementKind::Out => {
                self.ensure_available(cmd.quantity)?;
                self.current_stock - cmd.quantity
            }
            MovementKind::Adjust => cmd.quantity,
        };

        Ok(vec![StockMovement {
            movement_id: cmd.movement_id,
            product_id: cmd.product_id,
            kind: cmd.kind,
            quantity: cmd.quantity,
            stock_before: self.current_stock,
            stock_after,
            reference_id: cmd.reference_id.clone(),
            reference_kind: cmd.reference_kind,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{MovementId, ReferenceKind, replay_stock};
    use chrono::{DateTime, Utc};

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_product() -> Product {
        Product::register(NewProduct {
            product_id: ProductId::new(),
            sku: "BRK-PAD-01".to_string(),
            name: "Brake pads".to_string(),
            minimum_stock: 4,
            purchase_cost: Money::from_minor(1500),
            sale_price: Money::from_minor(2500),
        })
        .unwrap()
    }

    fn post(product: &Product, kind: MovementKind, quantity: i64) -> PostMovement {
        PostMovement {
            movement_id: MovementId::new(),
            product_id: product.id_typed(),
            kind,
            quantity,
            reference_id: None,
            reference_kind: None,
            notes: None,
            occurred_at: test_time(),
        }
    }

    #[test]
    fn register_starts_with_zero_stock() {
        let product = test_product();
        assert_eq!(product.current_stock(), 0);
        assert_eq!(product.version(), 0);
        assert!(product.is_below_minimum());
    }

    #[test]
    fn register_rejects_blank_name() {
        let err = Product::register(NewProduct {
            product_id: ProductId::new(),
            sku: "X".to_string(),
            name: "  ".to_string(),
            minimum_stock: 0,
            purchase_cost: Money::ZERO,
            sale_price: Money::ZERO,
        })
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn out_then_overdraw_matches_ledger_scenario() {
        let mut product = test_product();
        product.execute(&post(&product, MovementKind::In, 10)).unwrap();

        let events = product.execute(&post(&product, MovementKind::Out, 5)).unwrap();
        assert_eq!(product.current_stock(), 5);
        assert_eq!(events[0].quantity, 5);
        assert_eq!(events[0].signed_delta(), -5);

        let err = product.handle(&post(&product, MovementKind::Out, 8)).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                product_id: product.id_typed(),
                available: 5,
                requested: 8,
            }
        );
        assert_eq!(product.current_stock(), 5);
    }

    #[test]
    fn adjust_sets_an_absolute_level() {
        let mut product = test_product();
        product.execute(&post(&product, MovementKind::In, 10)).unwrap();
        let events = product.execute(&post(&product, MovementKind::Adjust, 3)).unwrap();

        assert_eq!(product.current_stock(), 3);
        assert_eq!(events[0].stock_before, 10);
        assert_eq!(events[0].signed_delta(), -7);
    }

    #[test]
    fn non_positive_quantity_is_an_invalid_argument() {
        let product = test_product();
        for quantity in [0, -2] {
            let err = product
                .handle(&post(&product, MovementKind::In, quantity))
                .unwrap_err();
            assert!(matches!(err, DomainError::InvalidArgument(_)));
        }
    }

    #[test]
    fn movement_carries_reference_and_notes() {
        let product = test_product();
        let mut cmd = post(&product, MovementKind::In, 2);
        cmd.reference_id = Some("OC-20240315-0001".to_string());
        cmd.reference_kind = Some(ReferenceKind::PurchaseOrder);
        cmd.notes = Some("Receipt of purchase order OC-20240315-0001".to_string());

        let events = product.handle(&cmd).unwrap();
        assert_eq!(events[0].reference_id.as_deref(), Some("OC-20240315-0001"));
        assert_eq!(events[0].reference_kind, Some(ReferenceKind::PurchaseOrder));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let product = test_product();
        let before = product.clone();
        let _ = product.handle(&post(&product, MovementKind::In, 7)).unwrap();
        assert_eq!(product, before);
    }

    #[test]
    fn snapshot_restores_identical_state() {
        let mut product = test_product();
        product.execute(&post(&product, MovementKind::In, 9)).unwrap();
        assert_eq!(Product::restore(product.snapshot()), product);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn kind_strategy() -> impl Strategy<Value = MovementKind> {
            prop_oneof![
                Just(MovementKind::In),
                Just(MovementKind::Out),
                Just(MovementKind::Adjust),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: whatever sequence of movements is attempted, stock never goes
            /// negative and always equals the sum of the accepted movements.
            #[test]
            fn stock_equals_sum_of_accepted_movements(
                attempts in prop::collection::vec((kind_strategy(), -5i64..50i64), 1..40)
            ) {
                let mut product = test_product();
                let mut history: Vec<StockMovement> = Vec::new();

                for (kind, quantity) in attempts {
                    let cmd = post(&product, kind, quantity);
                    if let Ok(events) = product.execute(&cmd) {
                        history.extend(events);
                    }
                    prop_assert!(product.current_stock() >= 0);
                    prop_assert_eq!(product.current_stock(), replay_stock(&history));
                    prop_assert_eq!(product.version(), history.len() as u64);
                }
            }
        }
    }
}
