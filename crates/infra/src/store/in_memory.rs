use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::OwnedMutexGuard;

use motoshop_core::{ProductId, order_number::sequence_of};
use motoshop_events::EventEnvelope;
use motoshop_inventory::{HistoryRange, Product, ProductSnapshot, StockMovement};
use motoshop_purchasing::{PurchaseOrder, PurchaseOrderId, PurchaseOrderSnapshot};
use motoshop_sales::{SalesOrder, SalesOrderId, SalesOrderSnapshot};

use super::{Store, StoreError, UnitOfWork};
use crate::config::EngineConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Product(ProductId),
    PurchaseOrder(PurchaseOrderId),
    SalesOrder(SalesOrderId),
    Counter(String),
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LockKey::Product(id) => write!(f, "product {id}"),
            LockKey::PurchaseOrder(id) => write!(f, "purchase order {id}"),
            LockKey::SalesOrder(id) => write!(f, "sales order {id}"),
            LockKey::Counter(prefix) => write!(f, "order number counter {prefix}"),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, ProductSnapshot>,
    movements: Vec<StockMovement>,
    purchase_orders: HashMap<PurchaseOrderId, PurchaseOrderSnapshot>,
    sales_orders: HashMap<SalesOrderId, SalesOrderSnapshot>,
    order_numbers: HashSet<String>,
    counters: HashMap<String, u32>,
}

impl Tables {
    fn highest_sequence(&self, prefix: &str) -> u32 {
        self.order_numbers
            .iter()
            .filter(|n| n.rsplit_once('-').is_some_and(|(p, _)| p == prefix))
            .filter_map(|n| sequence_of(n))
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Row locks are real (`tokio` mutexes held by the unit
/// of work until it ends), writes are staged and applied atomically on commit,
/// and writing a row the unit of work has not locked is refused.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_lock_timeout(EngineConfig::default().lock_timeout())
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_lock_timeout(config.lock_timeout())
    }

    /// Number of committed movements across all products.
    pub fn movement_count(&self) -> usize {
        self.shared
            .tables
            .read()
            .map(|t| t.movements.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(InMemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            held: HeldLocks {
                shared: Arc::clone(&self.shared),
                guards: HashMap::new(),
            },
            products: HashMap::new(),
            movements: Vec::new(),
            purchase_orders: HashMap::new(),
            sales_orders: HashMap::new(),
            new_order_numbers: Vec::new(),
            new_skus: Vec::new(),
            counters: HashMap::new(),
            events: Vec::new(),
        }))
    }
}

/// Row locks held by one unit of work.
///
/// Dropping releases every guard and prunes lock entries nobody else holds or
/// waits on.
struct HeldLocks {
    shared: Arc<Shared>,
    guards: HashMap<LockKey, OwnedMutexGuard<()>>,
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        if self.guards.is_empty() {
            return;
        }
        self.guards.clear();
        if let Ok(mut locks) = self.shared.locks.lock() {
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        }
    }
}

/// Unit of work over an [`InMemoryStore`]: locks held plus staged writes.
struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    held: HeldLocks,
    products: HashMap<ProductId, ProductSnapshot>,
    movements: Vec<StockMovement>,
    purchase_orders: HashMap<PurchaseOrderId, PurchaseOrderSnapshot>,
    sales_orders: HashMap<SalesOrderId, SalesOrderSnapshot>,
    new_order_numbers: Vec<String>,
    new_skus: Vec<String>,
    counters: HashMap<String, u32>,
    events: Vec<EventEnvelope<JsonValue>>,
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

impl InMemoryUnitOfWork {
    fn tables(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.shared.tables.read().map_err(|_| poisoned())
    }

    async fn acquire(&mut self, key: LockKey) -> Result<(), StoreError> {
        if self.held.guards.contains_key(&key) {
            return Ok(());
        }

        let mutex = {
            let mut locks = self.shared.locks.lock().map_err(|_| poisoned())?;
            Arc::clone(
                locks
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        let timeout = self.shared.lock_timeout;
        let guard = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                StoreError::LockTimeout(format!("{key} not released within {timeout:?}"))
            })?;

        self.held.guards.insert(key, guard);
        Ok(())
    }

    fn ensure_locked(&self, key: &LockKey) -> Result<(), StoreError> {
        if self.held.guards.contains_key(key) {
            Ok(())
        } else {
            Err(StoreError::Unlocked(key.to_string()))
        }
    }

    fn current_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        if let Some(staged) = self.products.get(&id) {
            return Ok(Some(Product::restore(staged.clone())));
        }
        Ok(self
            .tables()?
            .products
            .get(&id)
            .cloned()
            .map(Product::restore))
    }

    fn current_purchase_order(
        &self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        if let Some(staged) = self.purchase_orders.get(&id) {
            return Ok(Some(PurchaseOrder::restore(staged.clone())));
        }
        Ok(self
            .tables()?
            .purchase_orders
            .get(&id)
            .cloned()
            .map(PurchaseOrder::restore))
    }

    fn current_sales_order(&self, id: SalesOrderId) -> Result<Option<SalesOrder>, StoreError> {
        if let Some(staged) = self.sales_orders.get(&id) {
            return Ok(Some(SalesOrder::restore(staged.clone())));
        }
        Ok(self
            .tables()?
            .sales_orders
            .get(&id)
            .cloned()
            .map(SalesOrder::restore))
    }

    fn reserve_order_number(&mut self, number: &str) -> Result<(), StoreError> {
        let taken = self.new_order_numbers.iter().any(|n| n == number)
            || self.tables()?.order_numbers.contains(number);
        if taken {
            return Err(StoreError::Conflict(format!(
                "order number {number} already exists"
            )));
        }
        self.new_order_numbers.push(number.to_string());
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn find_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.current_product(id)
    }

    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.acquire(LockKey::Product(id)).await?;
        self.current_product(id)
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let id = product.id_typed();
        self.acquire(LockKey::Product(id)).await?;

        if self.current_product(id)?.is_some() {
            return Err(StoreError::Conflict(format!("product {id} already exists")));
        }
        let sku_taken = self.products.values().any(|p| p.sku == product.sku())
            || self
                .tables()?
                .products
                .values()
                .any(|p| p.sku == product.sku());
        if sku_taken {
            return Err(StoreError::Conflict(format!(
                "sku {} already exists",
                product.sku()
            )));
        }

        self.new_skus.push(product.sku().to_string());
        self.products.insert(id, product.snapshot());
        Ok(())
    }

    async fn save_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let id = product.id_typed();
        self.ensure_locked(&LockKey::Product(id))?;
        self.products.insert(id, product.snapshot());
        Ok(())
    }

    async fn append_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        self.ensure_locked(&LockKey::Product(movement.product_id))?;
        self.movements.push(movement.clone());
        Ok(())
    }

    async fn movements(
        &mut self,
        id: ProductId,
        range: &HistoryRange,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let mut found: Vec<StockMovement> = {
            let tables = self.tables()?;
            tables
                .movements
                .iter()
                .chain(self.movements.iter())
                .filter(|m| m.product_id == id && range.contains(m.occurred_at))
                .cloned()
                .collect()
        };

        // Newest first; equal timestamps keep reverse posting order.
        found.reverse();
        found.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(found)
    }

    async fn low_stock_products(&mut self) -> Result<Vec<Product>, StoreError> {
        let mut merged: HashMap<ProductId, ProductSnapshot> = self.tables()?.products.clone();
        merged.extend(self.products.iter().map(|(id, p)| (*id, p.clone())));

        let mut low: Vec<Product> = merged
            .into_values()
            .map(Product::restore)
            .filter(Product::is_below_minimum)
            .collect();
        low.sort_by(|a, b| {
            a.current_stock()
                .cmp(&b.current_stock())
                .then_with(|| a.sku().cmp(b.sku()))
        });
        Ok(low)
    }

    async fn find_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        self.current_purchase_order(id)
    }

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        self.acquire(LockKey::PurchaseOrder(id)).await?;
        self.current_purchase_order(id)
    }

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        let id = order.id_typed();
        self.acquire(LockKey::PurchaseOrder(id)).await?;

        if self.current_purchase_order(id)?.is_some() {
            return Err(StoreError::Conflict(format!(
                "purchase order {id} already exists"
            )));
        }
        let snapshot = order.snapshot().ok_or_else(|| {
            StoreError::Backend(format!("purchase order {id} has not been created"))
        })?;
        self.reserve_order_number(snapshot.order_number.as_str())?;

        self.purchase_orders.insert(id, snapshot);
        Ok(())
    }

    async fn update_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        let id = order.id_typed();
        self.ensure_locked(&LockKey::PurchaseOrder(id))?;
        let snapshot = order.snapshot().ok_or_else(|| {
            StoreError::Backend(format!("purchase order {id} has not been created"))
        })?;
        self.purchase_orders.insert(id, snapshot);
        Ok(())
    }

    async fn find_sales_order(
        &mut self,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        self.current_sales_order(id)
    }

    async fn lock_sales_order(
        &mut self,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        self.acquire(LockKey::SalesOrder(id)).await?;
        self.current_sales_order(id)
    }

    async fn insert_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError> {
        let id = order.id_typed();
        self.acquire(LockKey::SalesOrder(id)).await?;

        if self.current_sales_order(id)?.is_some() {
            return Err(StoreError::Conflict(format!(
                "sales order {id} already exists"
            )));
        }
        let snapshot = order
            .snapshot()
            .ok_or_else(|| StoreError::Backend(format!("sales order {id} has not been created")))?;
        self.reserve_order_number(snapshot.order_number.as_str())?;

        self.sales_orders.insert(id, snapshot);
        Ok(())
    }

    async fn update_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError> {
        let id = order.id_typed();
        self.ensure_locked(&LockKey::SalesOrder(id))?;
        let snapshot = order
            .snapshot()
            .ok_or_else(|| StoreError::Backend(format!("sales order {id} has not been created")))?;
        self.sales_orders.insert(id, snapshot);
        Ok(())
    }

    async fn next_order_sequence(&mut self, prefix: &str) -> Result<u32, StoreError> {
        self.acquire(LockKey::Counter(prefix.to_string())).await?;

        let current = match self.counters.get(prefix) {
            Some(value) => *value,
            None => {
                let tables = self.tables()?;
                tables
                    .counters
                    .get(prefix)
                    .copied()
                    .unwrap_or_else(|| tables.highest_sequence(prefix))
            }
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| {
                StoreError::Backend(format!("order number counter {prefix} exhausted"))
            })?;

        self.counters.insert(prefix.to_string(), next);
        Ok(next)
    }

    fn stage_event(&mut self, event: EventEnvelope<JsonValue>) {
        self.events.push(event);
    }

    async fn commit(self: Box<Self>) -> Result<Vec<EventEnvelope<JsonValue>>, StoreError> {
        let this = *self;
        {
            let mut tables = this.shared.tables.write().map_err(|_| poisoned())?;

            if let Some(number) = this
                .new_order_numbers
                .iter()
                .find(|n| tables.order_numbers.contains(n.as_str()))
            {
                return Err(StoreError::Conflict(format!(
                    "order number {number} already exists"
                )));
            }
            if let Some(sku) = this
                .new_skus
                .iter()
                .find(|sku| tables.products.values().any(|p| &p.sku == *sku))
            {
                return Err(StoreError::Conflict(format!("sku {sku} already exists")));
            }

            tables.products.extend(this.products);
            tables.movements.extend(this.movements);
            tables.purchase_orders.extend(this.purchase_orders);
            tables.sales_orders.extend(this.sales_orders);
            tables.order_numbers.extend(this.new_order_numbers);
            tables.counters.extend(this.counters);
        }

        // Locks are released only after the writes are visible.
        drop(this.held);
        Ok(this.events)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use motoshop_core::{Aggregate, AggregateRoot, Money};
    use motoshop_inventory::{MovementId, MovementKind, NewProduct, PostMovement};

    fn new_product(sku: &str) -> Product {
        Product::register(NewProduct {
            product_id: ProductId::new(),
            sku: sku.to_string(),
            name: format!("Part {sku}"),
            minimum_stock: 2,
            purchase_cost: Money::from_minor(1_000),
            sale_price: Money::from_minor(2_000),
        })
        .unwrap()
    }

    fn receive(product: &mut Product, quantity: i64) -> StockMovement {
        let cmd = PostMovement {
            movement_id: MovementId::new(),
            product_id: product.id_typed(),
            kind: MovementKind::In,
            quantity,
            reference_id: None,
            reference_kind: None,
            notes: None,
            occurred_at: Utc::now(),
        };
        product.execute(&cmd).unwrap().remove(0)
    }

    async fn seeded(store: &InMemoryStore, sku: &str) -> Product {
        let product = new_product(sku);
        let mut uow = store.begin().await.unwrap();
        uow.insert_product(&product).await.unwrap();
        uow.commit().await.unwrap();
        product
    }

    #[tokio::test]
    async fn rolled_back_writes_are_discarded() {
        let store = InMemoryStore::new();
        let product = seeded(&store, "OIL-10W40").await;

        let mut uow = store.begin().await.unwrap();
        let mut locked = uow.lock_product(product.id_typed()).await.unwrap().unwrap();
        let movement = receive(&mut locked, 5);
        uow.append_movement(&movement).await.unwrap();
        uow.save_product(&locked).await.unwrap();
        uow.rollback().await.unwrap();

        let mut reader = store.begin().await.unwrap();
        let current = reader.find_product(product.id_typed()).await.unwrap().unwrap();
        assert_eq!(current.current_stock(), 0);
        assert_eq!(store.movement_count(), 0);
    }

    #[tokio::test]
    async fn staged_writes_are_visible_inside_the_unit_of_work_only() {
        let store = InMemoryStore::new();
        let product = seeded(&store, "CHAIN-520").await;

        let mut uow = store.begin().await.unwrap();
        let mut locked = uow.lock_product(product.id_typed()).await.unwrap().unwrap();
        let movement = receive(&mut locked, 3);
        uow.append_movement(&movement).await.unwrap();
        uow.save_product(&locked).await.unwrap();

        let own_view = uow.find_product(product.id_typed()).await.unwrap().unwrap();
        assert_eq!(own_view.current_stock(), 3);

        let mut other = store.begin().await.unwrap();
        let other_view = other.find_product(product.id_typed()).await.unwrap().unwrap();
        assert_eq!(other_view.current_stock(), 0);

        uow.commit().await.unwrap();
        let after = other.find_product(product.id_typed()).await.unwrap().unwrap();
        assert_eq!(after.current_stock(), 3);
    }

    #[tokio::test]
    async fn writing_an_unlocked_product_is_refused() {
        let store = InMemoryStore::new();
        let product = seeded(&store, "SPARK-PLUG").await;

        let mut uow = store.begin().await.unwrap();
        let mut unlocked = uow.find_product(product.id_typed()).await.unwrap().unwrap();
        let movement = receive(&mut unlocked, 1);

        assert!(matches!(
            uow.append_movement(&movement).await,
            Err(StoreError::Unlocked(_))
        ));
        assert!(matches!(
            uow.save_product(&unlocked).await,
            Err(StoreError::Unlocked(_))
        ));
    }

    #[tokio::test]
    async fn lock_wait_times_out_while_another_unit_holds_the_row() {
        let store = InMemoryStore::with_lock_timeout(Duration::from_millis(50));
        let product = seeded(&store, "AIR-FILTER").await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_product(product.id_typed()).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_product(product.id_typed()).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
        assert!(err.is_transient());

        // Locks are re-entrant for the holder and released on commit.
        holder.lock_product(product.id_typed()).await.unwrap();
        holder.commit().await.unwrap();
        assert!(waiter.lock_product(product.id_typed()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn order_sequence_is_only_consumed_on_commit() {
        let store = InMemoryStore::new();

        let mut first = store.begin().await.unwrap();
        assert_eq!(first.next_order_sequence("OV-20240315").await.unwrap(), 1);
        assert_eq!(first.next_order_sequence("OV-20240315").await.unwrap(), 2);
        first.rollback().await.unwrap();

        let mut second = store.begin().await.unwrap();
        assert_eq!(second.next_order_sequence("OV-20240315").await.unwrap(), 1);
        assert_eq!(second.next_order_sequence("OC-20240315").await.unwrap(), 1);
        second.commit().await.unwrap();

        let mut third = store.begin().await.unwrap();
        assert_eq!(third.next_order_sequence("OV-20240315").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn low_stock_lists_lowest_first() {
        let store = InMemoryStore::new();
        let empty = seeded(&store, "A-EMPTY").await;
        let mut uow = store.begin().await.unwrap();
        let mut stocked = new_product("B-STOCKED");
        uow.insert_product(&stocked).await.unwrap();
        let movement = receive(&mut stocked, 1);
        uow.append_movement(&movement).await.unwrap();
        uow.save_product(&stocked).await.unwrap();
        uow.commit().await.unwrap();

        let mut reader = store.begin().await.unwrap();
        let low = reader.low_stock_products().await.unwrap();
        let ids: Vec<_> = low.iter().map(|p| *p.id()).collect();
        assert_eq!(ids, vec![empty.id_typed(), stocked.id_typed()]);
    }

    #[tokio::test]
    async fn duplicate_sku_is_a_conflict() {
        let store = InMemoryStore::new();
        seeded(&store, "DUP").await;

        let mut uow = store.begin().await.unwrap();
        let err = uow.insert_product(&new_product("DUP")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn interleaved_inserts_of_one_sku_commit_only_once() {
        let store = InMemoryStore::new();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.insert_product(&new_product("BRAKE-PAD")).await.unwrap();
        second.insert_product(&new_product("BRAKE-PAD")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(msg) if msg.contains("BRAKE-PAD")));

        let mut reader = store.begin().await.unwrap();
        let low = reader.low_stock_products().await.unwrap();
        assert_eq!(low.iter().filter(|p| p.sku() == "BRAKE-PAD").count(), 1);
    }

    fn lock_entries(store: &InMemoryStore) -> usize {
        store.shared.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn lock_entries_are_pruned_when_units_end() {
        let store = InMemoryStore::new();
        let product = seeded(&store, "CLUTCH-CABLE").await;
        assert_eq!(lock_entries(&store), 0);

        let mut uow = store.begin().await.unwrap();
        uow.lock_product(product.id_typed()).await.unwrap();
        uow.next_order_sequence("OV-20240315").await.unwrap();
        assert_eq!(lock_entries(&store), 2);
        uow.commit().await.unwrap();
        assert_eq!(lock_entries(&store), 0);

        let mut rolled_back = store.begin().await.unwrap();
        rolled_back.lock_product(product.id_typed()).await.unwrap();
        rolled_back.rollback().await.unwrap();
        assert_eq!(lock_entries(&store), 0);
    }

    #[tokio::test]
    async fn lock_entry_survives_while_another_unit_waits() {
        let store = InMemoryStore::with_lock_timeout(Duration::from_secs(5));
        let product = seeded(&store, "THROTTLE-GRIP").await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_product(product.id_typed()).await.unwrap();

        let waiter_store = store.clone();
        let id = product.id_typed();
        let waiter = tokio::spawn(async move {
            let mut uow = waiter_store.begin().await.unwrap();
            uow.lock_product(id).await.unwrap();
            uow.commit().await.unwrap();
        });
        while store
            .shared
            .locks
            .lock()
            .unwrap()
            .values()
            .all(|m| Arc::strong_count(m) < 3)
        {
            tokio::task::yield_now().await;
        }

        holder.commit().await.unwrap();
        waiter.await.unwrap();
        assert_eq!(lock_entries(&store), 0);
    }
}
