#![cfg(feature = "storage-rocksdb")]

mod common;

use assert_cmd::cargo_bin;
use common::{FakeProvider, reference_order, test_app_with_stores};
use marketpay::application::orchestrator::PaymentExtra;
use marketpay::domain::order::OrderStatus;
use marketpay::domain::payment::{PaymentMethod, PaymentStatus};
use marketpay::infrastructure::rocksdb::RocksDBStore;
use std::process::Command;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: create an order and settle it by card
    let order_id = {
        let store = RocksDBStore::open(&db_path).unwrap();
        let app = test_app_with_stores(
            FakeProvider::capturing(),
            Arc::new(store.clone()),
            Arc::new(store),
        )
        .await;
        let order = app
            .engine
            .aggregator
            .create_order(reference_order(1))
            .await
            .unwrap();
        app.engine
            .orchestrator
            .process_payment(order.id, PaymentMethod::Card, PaymentExtra::default())
            .await
            .unwrap();
        app.engine
            .state_machine
            .transition(order.id, OrderStatus::Confirmed, None)
            .await
            .unwrap();
        order.id
    };

    // 2. Second run: the order, its payment and its sequences survive
    {
        let store = RocksDBStore::open(&db_path).unwrap();
        let app = test_app_with_stores(
            FakeProvider::capturing(),
            Arc::new(store.clone()),
            Arc::new(store),
        )
        .await;
        let details = app.engine.aggregator.get_order(order_id).await.unwrap();
        assert_eq!(details.order.status, OrderStatus::Confirmed);
        assert_eq!(details.order.payment_status, PaymentStatus::Paid);
        assert_eq!(details.items.len(), 2);

        let next = app
            .engine
            .aggregator
            .create_order(reference_order(2))
            .await
            .unwrap();
        assert!(next.id > order_id);
    }

    // 3. The stats command reads the same database
    let output = Command::new(cargo_bin!("marketpay"))
        .arg("stats")
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("method,CARD,1,145000"));
    assert!(stdout.contains("status,PAID,1,145000"));
}
