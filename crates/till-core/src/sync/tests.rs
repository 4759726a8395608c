//! End-to-end queue, processor and reconciliation scenarios.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::config::SyncConfig;
use crate::db::{CollectionStore, DeadLetterRepository, SyncQueueRepository};
use crate::models::{Product, ProductDraft, SyncAction, Versioned};
use crate::services::DatabaseService;

struct Harness {
    db: DatabaseService,
    remote: InMemoryRemoteStore,
    processor: SyncProcessor,
}

async fn harness(config: SyncConfig) -> Harness {
    let db = DatabaseService::open_in_memory().await.unwrap();
    let remote = InMemoryRemoteStore::new();
    let gateway = UpsertGateway::new(Arc::new(remote.clone()), config.push_timeout);
    let processor = SyncProcessor::new(db.clone(), gateway, &config);
    Harness {
        db,
        remote,
        processor,
    }
}

async fn enqueue(db: &DatabaseService, action_type: &str, payload: serde_json::Value) {
    let guard = db.lock().await;
    SyncQueueRepository::new(guard.connection())
        .enqueue(action_type, &payload)
        .await
        .unwrap();
}

async fn queue_len(db: &DatabaseService) -> usize {
    let guard = db.lock().await;
    SyncQueueRepository::new(guard.connection())
        .count()
        .await
        .unwrap()
}

fn product(id: &str, version: u64, updated_at: &str, stock: i64) -> Product {
    let mut product = Product::from_draft(ProductDraft {
        name: "Cola".to_string(),
        size: Some("330ml".to_string()),
        price: 2.0,
        cost_price: 1.0,
        stock,
        category: None,
    });
    product.id = id.to_string();
    product.created_at = Some("2024-01-01T00:00:00.000Z".to_string());
    product.version = Some(version);
    product.updated_at = Some(updated_at.to_string());
    product
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_mutations_drain_with_one_call_each() {
    let h = harness(SyncConfig::default()).await;
    h.remote.set_offline(true);
    for n in 0..4 {
        enqueue(&h.db, "SALE", json!({ "id": format!("S{n}") })).await;
    }

    let report = h.processor.run_pass().await.unwrap();
    assert_eq!(report.retried, 4);
    assert_eq!(queue_len(&h.db).await, 4);

    h.remote.set_offline(false);
    h.remote.clear_calls();
    let report = h.processor.run_pass().await.unwrap();
    assert_eq!(report.succeeded, 4);
    assert_eq!(h.remote.write_count(), 4);
    assert_eq!(queue_len(&h.db).await, 0);

    // Nothing left to push.
    h.processor.run_pass().await.unwrap();
    assert_eq!(h.remote.write_count(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn five_consecutive_failures_dead_letter_exactly_once() {
    let h = harness(SyncConfig::default()).await;
    h.remote.set_offline(true);
    enqueue(&h.db, "SHIFT", json!({ "id": "SH1" })).await;

    for _ in 0..4 {
        let report = h.processor.run_pass().await.unwrap();
        assert_eq!(report.retried, 1);
    }
    let report = h.processor.run_pass().await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(queue_len(&h.db).await, 0);

    // Dead letters are never picked up by later passes.
    h.remote.set_offline(false);
    h.remote.clear_calls();
    let report = h.processor.run_pass().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert!(h.remote.calls().is_empty());

    let guard = h.db.lock().await;
    let failed = DeadLetterRepository::new(guard.connection())
        .list()
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].action_type, "SHIFT");
    assert_eq!(failed[0].retry_count, 5);
    assert_eq!(failed[0].total_retries, 5);
    assert!(failed[0].can_retry);
    assert!(failed[0].last_error.contains("offline"));
    drop(guard);

    assert_eq!(h.processor.status().dead_letters, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_type_is_dropped_without_remote_call() {
    let h = harness(SyncConfig::default()).await;
    enqueue(&h.db, "FOO", json!({ "id": "x" })).await;

    let report = h.processor.run_pass().await.unwrap();
    assert_eq!(report.dropped_unknown, 1);
    assert_eq!(report.dead_lettered, 0);
    assert!(h.remote.calls().is_empty());
    assert_eq!(queue_len(&h.db).await, 0);
    assert_eq!(h.processor.status().dead_letters, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_remote_counts_as_failure() {
    let config = SyncConfig::default().with_push_timeout(Duration::from_millis(20));
    let h = harness(config).await;
    h.remote.set_latency(Some(Duration::from_millis(500)));
    enqueue(&h.db, "SALE", json!({ "id": "S1" })).await;

    let report = h.processor.run_pass().await.unwrap();
    assert_eq!(report.retried, 1);
    assert!(h
        .processor
        .status()
        .last_error
        .unwrap()
        .contains("timed out"));
}

#[tokio::test(flavor = "multi_thread")]
async fn two_devices_converge_on_newest_version() {
    let remote = InMemoryRemoteStore::new();
    let config = SyncConfig::default();

    // Device A edits P1 up to v5 and syncs.
    let device_a = DatabaseService::open_in_memory().await.unwrap();
    let gateway_a = UpsertGateway::new(Arc::new(remote.clone()), config.push_timeout);
    let processor_a = SyncProcessor::new(device_a.clone(), gateway_a, &config);
    let newest = product("P1", 5, "2024-01-02T09:00:00.000Z", 4);
    {
        let guard = device_a.lock().await;
        let conn = guard.connection();
        CollectionStore::new(conn).put(&newest).await.unwrap();
        SyncQueueRepository::new(conn)
            .enqueue_action(SyncAction::Product, &newest)
            .await
            .unwrap();
    }
    processor_a.run_pass().await.unwrap();

    // Device B was offline with a stale v4 edit queued.
    let device_b = DatabaseService::open_in_memory().await.unwrap();
    let stale = product("P1", 4, "2024-01-02T10:00:00.000Z", 9);
    {
        let guard = device_b.lock().await;
        let conn = guard.connection();
        CollectionStore::new(conn).put(&stale).await.unwrap();
        SyncQueueRepository::new(conn)
            .enqueue_action(SyncAction::Product, &stale)
            .await
            .unwrap();
    }

    let reconciler = Reconciler::new(device_b.clone(), Arc::new(remote.clone()), &config);
    let report = reconciler.reconcile::<Product>().await.unwrap();
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.requeued, 0);

    let gateway_b = UpsertGateway::new(Arc::new(remote.clone()), config.push_timeout);
    let processor_b = SyncProcessor::new(device_b.clone(), gateway_b, &config);
    let pass = processor_b.run_pass().await.unwrap();
    assert_eq!(pass.attempted, 0);

    let remote_copy: Product =
        serde_json::from_value(remote.row("products", "P1").unwrap()).unwrap();
    assert_eq!(remote_copy.version(), Some(5));
    assert_eq!(remote_copy.stock, 4);

    let guard = device_b.lock().await;
    let local: Product = CollectionStore::new(guard.connection())
        .get("P1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local, newest);
}

#[tokio::test(flavor = "multi_thread")]
async fn newer_local_edit_is_requeued_and_uploaded() {
    let remote = InMemoryRemoteStore::new();
    let config = SyncConfig::default();
    remote.seed(
        "products",
        [serde_json::to_value(product("P1", 2, "2024-01-01T10:00:00.000Z", 9)).unwrap()],
    );

    let db = DatabaseService::open_in_memory().await.unwrap();
    let local = product("P1", 3, "2024-01-01T11:00:00.000Z", 7);
    {
        let guard = db.lock().await;
        CollectionStore::new(guard.connection())
            .put(&local)
            .await
            .unwrap();
    }

    let reconciler = Reconciler::new(db.clone(), Arc::new(remote.clone()), &config);
    let report = reconciler.reconcile::<Product>().await.unwrap();
    assert_eq!(report.requeued, 1);

    let gateway = UpsertGateway::new(Arc::new(remote.clone()), config.push_timeout);
    let processor = SyncProcessor::new(db, gateway, &config);
    processor.run_pass().await.unwrap();

    let remote_copy: Product =
        serde_json::from_value(remote.row("products", "P1").unwrap()).unwrap();
    assert_eq!(remote_copy, local);
}
