//! Concurrent workflows against the in-memory store's row locks.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use motoshop_core::{CustomerId, Money, NewLine, ProductId};
use motoshop_infra::{Engine, ErrorKind, FixedClock, InMemoryStore, NewSalesOrder};
use motoshop_inventory::{NewProduct, replay_stock};
use motoshop_sales::SalesOrderStatus;

fn engine() -> Arc<Engine<InMemoryStore>> {
    let at = Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap();
    Arc::new(Engine::new(InMemoryStore::new()).with_clock(Arc::new(FixedClock(at))))
}

async fn product(engine: &Engine<InMemoryStore>, sku: &str, opening: i64) -> ProductId {
    let product_id = ProductId::new();
    engine
        .register_product(
            NewProduct {
                product_id,
                sku: sku.to_string(),
                name: sku.to_string(),
                minimum_stock: 0,
                purchase_cost: Money::from_minor(1_000),
                sale_price: Money::from_minor(2_000),
            },
            opening,
        )
        .await
        .unwrap();
    product_id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_confirmations_never_oversell() {
    let engine = engine();
    let p = product(&engine, "CARB-KIT", 5).await;

    let mut orders = Vec::new();
    for _ in 0..5 {
        let order = engine
            .create_sales_order(NewSalesOrder::new(
                CustomerId::new(),
                vec![NewLine::new(p, 2, Money::from_minor(2_000))],
            ))
            .await
            .unwrap();
        orders.push(order.id_typed());
    }

    let handles: Vec<_> = orders
        .into_iter()
        .map(|order_id| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.confirm_sales_order(order_id).await })
        })
        .collect();

    let mut confirmed = 0;
    let mut short = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => {
                assert_eq!(order.status(), SalesOrderStatus::Confirmed);
                confirmed += 1;
            }
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::InsufficientStock);
                short += 1;
            }
        }
    }

    assert_eq!(confirmed, 2);
    assert_eq!(short, 3);

    let product = engine.product(p).await.unwrap();
    assert_eq!(product.current_stock(), 1);
    let history = engine.movement_history(p, None, None).await.unwrap();
    assert_eq!(replay_stock(&history), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creations_get_unique_increasing_numbers() {
    let engine = engine();
    let p = product(&engine, "VALVE", 100).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .create_sales_order(NewSalesOrder::new(
                        CustomerId::new(),
                        vec![NewLine::new(p, 1, Money::from_minor(700))],
                    ))
                    .await
            })
        })
        .collect();

    let mut sequences = Vec::new();
    for handle in handles {
        let order = handle.await.unwrap().unwrap();
        let number = order.order_number().unwrap();
        assert_eq!(number.prefix(), "OV-20240315");
        sequences.push(number.sequence().unwrap());
    }

    let unique: HashSet<u32> = sequences.iter().copied().collect();
    assert_eq!(unique.len(), 10);
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=10).collect::<Vec<u32>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_line_orders_do_not_deadlock() {
    let engine = engine();
    let a = product(&engine, "FORK-SEAL", 10).await;
    let b = product(&engine, "FORK-OIL", 10).await;

    let forward = engine
        .create_sales_order(NewSalesOrder::new(
            CustomerId::new(),
            vec![
                NewLine::new(a, 1, Money::from_minor(900)),
                NewLine::new(b, 1, Money::from_minor(1_100)),
            ],
        ))
        .await
        .unwrap();
    let backward = engine
        .create_sales_order(NewSalesOrder::new(
            CustomerId::new(),
            vec![
                NewLine::new(b, 2, Money::from_minor(1_100)),
                NewLine::new(a, 2, Money::from_minor(900)),
            ],
        ))
        .await
        .unwrap();

    let e1 = Arc::clone(&engine);
    let e2 = Arc::clone(&engine);
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { e1.confirm_sales_order(forward.id_typed()).await }),
        tokio::spawn(async move { e2.confirm_sales_order(backward.id_typed()).await }),
    );
    r1.unwrap().unwrap();
    r2.unwrap().unwrap();

    assert_eq!(engine.product(a).await.unwrap().current_stock(), 7);
    assert_eq!(engine.product(b).await.unwrap().current_stock(), 7);
}
