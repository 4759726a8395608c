//! Domain mutation scenarios against an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;
use crate::config::SyncConfig;
use crate::sync::{InMemoryRemoteStore, PassOutcome, SyncProcessor, UpsertGateway};
use crate::db::{CollectionStore, SyncQueueRepository};
use crate::error::Error;
use crate::models::{
    permissions, BusinessSettings, Collection, Product, ProductDraft, ProductSaleLog,
    RequestStatus, Role, Sale, SaleLineInput, SaleRequest, SaleStatus, UserDraft, Versioned,
};

const ADMIN_PIN: &str = "1111";
const CASHIER_PIN: &str = "2222";

async fn setup() -> TillService {
    let db = DatabaseService::open_in_memory().await.unwrap();
    let service = TillService::open(db).await.unwrap();
    service
        .create_user(UserDraft {
            name: "Admin".to_string(),
            pin: ADMIN_PIN.to_string(),
            role: Role::Cashier,
            permissions: Vec::new(),
        })
        .await
        .unwrap();
    service.login(ADMIN_PIN).await.unwrap();
    service
}

async fn add_cashier(service: &TillService) {
    service
        .create_user(UserDraft {
            name: "Cashier".to_string(),
            pin: CASHIER_PIN.to_string(),
            role: Role::Cashier,
            permissions: Vec::new(),
        })
        .await
        .unwrap();
}

async fn seed_product(service: &TillService, id: &str, price: f64, cost: f64, stock: i64) {
    let mut product = Product::from_draft(ProductDraft {
        name: format!("Item {id}"),
        size: None,
        price,
        cost_price: cost,
        stock,
        category: None,
    });
    product.id = id.to_string();
    product.touch();
    {
        let db = service.database().lock().await;
        CollectionStore::new(db.connection())
            .put(&product)
            .await
            .unwrap();
    }
    service.reload().await.unwrap();
}

async fn stored_product(service: &TillService, id: &str) -> Product {
    let db = service.database().lock().await;
    CollectionStore::new(db.connection())
        .get(id)
        .await
        .unwrap()
        .unwrap()
}

async fn queue_types(service: &TillService) -> Vec<String> {
    let db = service.database().lock().await;
    SyncQueueRepository::new(db.connection())
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.action_type)
        .collect()
}

async fn count(service: &TillService, collection: Collection) -> usize {
    let db = service.database().lock().await;
    CollectionStore::new(db.connection())
        .count(collection)
        .await
        .unwrap()
}

fn line(product_id: &str, quantity: i64) -> SaleLineInput {
    SaleLineInput {
        product_id: product_id.to_string(),
        quantity,
        price_at_sale: None,
        cost_at_sale: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sale_updates_stock_totals_logs_and_queue() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;
    let before = queue_types(&service).await.len();

    let sale = service
        .process_sale(SaleRequest::new(vec![line("P1", 2)]))
        .await
        .unwrap();

    assert_eq!(sale.total_amount, 20.0);
    assert_eq!(sale.total_cost, 10.0);
    assert_eq!(sale.status, SaleStatus::Completed);
    assert_eq!(stored_product(&service, "P1").await.stock, 8);
    assert_eq!(service.product("P1").await.unwrap().stock, 8);

    let log_id = format!("{}-P1", sale.id);
    let db = service.database().lock().await;
    let log: Option<ProductSaleLog> = CollectionStore::new(db.connection())
        .get(&log_id)
        .await
        .unwrap();
    drop(db);
    assert_eq!(log.unwrap().quantity, 2);

    let types = queue_types(&service).await;
    let mut added = types[before..].to_vec();
    added.sort();
    assert_eq!(added, vec!["AUDIT_LOG", "PRODUCT", "PRODUCT_SALE_LOG", "SALE"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_sale_writes_nothing() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;
    seed_product(&service, "P2", 4.0, 2.0, 1).await;
    let queued = queue_types(&service).await.len();

    let error = service
        .process_sale(SaleRequest::new(vec![line("P1", 2), line("P2", 3)]))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        Error::InsufficientStock {
            available: 1,
            requested: 3,
            ..
        }
    ));

    assert_eq!(stored_product(&service, "P1").await.stock, 10);
    assert_eq!(count(&service, Collection::Sales).await, 0);
    assert_eq!(count(&service, Collection::ProductSaleLogs).await, 0);
    assert_eq!(queue_types(&service).await.len(), queued);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_cost_price_aborts_sale() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;
    seed_product(&service, "FREE", 3.0, 0.0, 10).await;
    let queued = queue_types(&service).await.len();

    let error = service
        .process_sale(SaleRequest::new(vec![line("P1", 1), line("FREE", 1)]))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::MissingCostPrice(ref id) if id == "FREE"));
    assert!(error.is_validation());

    assert_eq!(stored_product(&service, "P1").await.stock, 10);
    assert_eq!(queue_types(&service).await.len(), queued);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replayed_sale_is_recorded_once() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;

    let request = SaleRequest::new(vec![line("P1", 2)]).with_sale_id("S-1");
    let first = service.process_sale(request.clone()).await.unwrap();
    let queued = queue_types(&service).await.len();

    let second = service.process_sale(request).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(stored_product(&service, "P1").await.stock, 8);
    assert_eq!(count(&service, Collection::ProductSaleLogs).await, 1);
    assert_eq!(queue_types(&service).await.len(), queued);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_product_lines_merge_into_one_log() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;

    let sale = service
        .process_sale(SaleRequest::new(vec![line("P1", 1), line("P1", 2)]))
        .await
        .unwrap();

    assert_eq!(sale.items.len(), 1);
    assert_eq!(sale.items[0].quantity, 3);
    assert_eq!(stored_product(&service, "P1").await.stock, 7);
    assert!(service.check_integrity().await.unwrap().is_clean());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_approved_void_restores_stock_and_deletes_logs() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;
    let sale = service
        .process_sale(SaleRequest::new(vec![line("P1", 2)]))
        .await
        .unwrap();

    let request = service.request_void(&sale.id, "wrong item").await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    // Nothing changes until the request is approved.
    assert_eq!(stored_product(&service, "P1").await.stock, 8);

    let resolved = service.resolve_void(&request.id, true).await.unwrap();
    assert_eq!(resolved.status, RequestStatus::Approved);

    let voided: Sale = service.sale(&sale.id).await.unwrap();
    assert!(voided.is_voided());
    assert!(voided.voided_at.is_some());
    assert_eq!(stored_product(&service, "P1").await.stock, 10);
    assert_eq!(count(&service, Collection::ProductSaleLogs).await, 0);
    assert!(queue_types(&service)
        .await
        .contains(&"DELETE_PRODUCT_SALE_LOG".to_string()));
    assert!(service.check_integrity().await.unwrap().is_clean());

    let again = service.resolve_void(&request.id, true).await.unwrap_err();
    assert!(matches!(again, Error::InvalidState { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_void_changes_nothing_else() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;
    let sale = service
        .process_sale(SaleRequest::new(vec![line("P1", 2)]))
        .await
        .unwrap();

    let request = service.request_void(&sale.id, "changed mind").await.unwrap();
    let resolved = service.resolve_void(&request.id, false).await.unwrap();

    assert_eq!(resolved.status, RequestStatus::Rejected);
    assert!(!service.sale(&sale.id).await.unwrap().is_voided());
    assert_eq!(stored_product(&service, "P1").await.stock, 8);
    assert_eq!(count(&service, Collection::ProductSaleLogs).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_void_restock_skips_deleted_products() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;
    seed_product(&service, "P2", 4.0, 2.0, 10).await;
    let sale = service
        .process_sale(SaleRequest::new(vec![line("P1", 1), line("P2", 1)]))
        .await
        .unwrap();
    service.delete_product("P2").await.unwrap();

    let request = service.request_void(&sale.id, "refund").await.unwrap();
    service.resolve_void(&request.id, true).await.unwrap();

    assert_eq!(stored_product(&service, "P1").await.stock, 10);
    assert!(service.product("P2").await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stock_change_two_phase() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 8).await;

    let shrink = service
        .request_stock_change("P1", -20, "breakage")
        .await
        .unwrap();
    let error = service
        .resolve_stock_change(&shrink.id, true)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        Error::InsufficientStock {
            available: 8,
            requested: 20,
            ..
        }
    ));
    let pending = service.stock_change_requests().await;
    assert!(pending
        .iter()
        .any(|request| request.id == shrink.id && request.status == RequestStatus::Pending));

    let restock = service
        .request_stock_change("P1", 5, "delivery")
        .await
        .unwrap();
    let resolved = service
        .resolve_stock_change(&restock.id, true)
        .await
        .unwrap();
    assert_eq!(resolved.status, RequestStatus::Approved);
    assert_eq!(stored_product(&service, "P1").await.stock, 13);

    let rejected = service
        .resolve_stock_change(&shrink.id, false)
        .await
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(stored_product(&service, "P1").await.stock, 13);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_first_user_becomes_bootstrap_admin() {
    let db = DatabaseService::open_in_memory().await.unwrap();
    let service = TillService::open(db).await.unwrap();

    let admin = service
        .create_user(UserDraft {
            name: "Owner".to_string(),
            pin: ADMIN_PIN.to_string(),
            role: Role::Cashier,
            permissions: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(admin.role, Role::Admin);

    let error = service
        .create_user(UserDraft {
            name: "Second".to_string(),
            pin: CASHIER_PIN.to_string(),
            role: Role::Cashier,
            permissions: Vec::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(error, Error::NotAuthenticated));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_permissions_are_enforced() {
    let service = setup().await;
    add_cashier(&service).await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;
    let sale = service
        .process_sale(SaleRequest::new(vec![line("P1", 1)]))
        .await
        .unwrap();

    service.logout().await;
    service.login(CASHIER_PIN).await.unwrap();

    let error = service
        .save_product(ProductDraft {
            name: "Tea".to_string(),
            size: None,
            price: 3.0,
            cost_price: 1.0,
            stock: 1,
            category: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(error, Error::PermissionDenied(ref p) if p == permissions::PRODUCT_MANAGE));

    // Cashiers may request but not approve.
    let request = service.request_void(&sale.id, "typo").await.unwrap();
    let error = service.resolve_void(&request.id, true).await.unwrap_err();
    assert!(matches!(error, Error::PermissionDenied(ref p) if p == permissions::VOID_APPROVE));

    service.logout().await;
    let error = service
        .update_settings(BusinessSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::NotAuthenticated));
    assert!(matches!(
        service.login("9999").await,
        Err(Error::InvalidPin)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_product_update_is_rejected() {
    let service = setup().await;
    let product = service
        .save_product(ProductDraft {
            name: "  Cola ".to_string(),
            size: Some("330ml".to_string()),
            price: 2.0,
            cost_price: 1.0,
            stock: 10,
            category: None,
        })
        .await
        .unwrap();
    assert_eq!(product.name, "Cola");
    assert_eq!(product.version, Some(1));

    let mut edit = product.clone();
    edit.price = 2.5;
    let updated = service.update_product(edit.clone(), 1).await.unwrap();
    assert_eq!(updated.version, Some(2));
    assert_eq!(updated.created_at, product.created_at);

    let error = service.update_product(edit, 1).await.unwrap_err();
    assert!(matches!(
        error,
        Error::VersionConflict {
            expected: 1,
            actual: 2,
            ..
        }
    ));
    assert_eq!(stored_product(&service, &product.id).await.price, 2.5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_product_replaces_queued_upserts() {
    let service = setup().await;
    let product = service
        .save_product(ProductDraft {
            name: "Cola".to_string(),
            size: None,
            price: 2.0,
            cost_price: 1.0,
            stock: 10,
            category: None,
        })
        .await
        .unwrap();

    service.delete_product(&product.id).await.unwrap();

    let types = queue_types(&service).await;
    assert!(!types.contains(&"PRODUCT".to_string()));
    assert!(types.contains(&"DELETE_PRODUCT".to_string()));
    assert!(service.product(&product.id).await.is_none());
    assert!(matches!(
        service.delete_product(&product.id).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shift_lifecycle_tags_sales() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;

    let shift = service.open_shift(50.0).await.unwrap();
    assert!(matches!(
        service.open_shift(10.0).await,
        Err(Error::InvalidState { .. })
    ));

    let sale = service
        .process_sale(SaleRequest::new(vec![line("P1", 1)]))
        .await
        .unwrap();
    assert_eq!(sale.shift_id.as_deref(), Some(shift.id.as_str()));

    let closed = service.close_shift(60.0).await.unwrap();
    assert_eq!(closed.id, shift.id);
    assert_eq!(closed.closing_cash, Some(60.0));
    assert!(service.active_shift().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_settings_update_bumps_version() {
    let service = setup().await;
    let mut settings = service.settings().await;
    settings.business_name = "Corner Shop".to_string();
    settings.currency = "eur".to_string();

    let saved = service.update_settings(settings.clone()).await.unwrap();
    assert_eq!(saved.currency, "EUR");
    assert_eq!(saved.version, Some(1));

    let saved = service.update_settings(settings).await.unwrap();
    assert_eq!(saved.version, Some(2));
    assert_eq!(service.settings().await, saved);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_integrity_reports_missing_log() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;
    let sale = service
        .process_sale(SaleRequest::new(vec![line("P1", 1)]))
        .await
        .unwrap();
    {
        let db = service.database().lock().await;
        CollectionStore::new(db.connection())
            .delete(Collection::ProductSaleLogs, &format!("{}-P1", sale.id))
            .await
            .unwrap();
    }

    let report = service.check_integrity().await.unwrap();
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].sale_id, sale.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mutations_write_audit_entries() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;
    service
        .process_sale(SaleRequest::new(vec![line("P1", 1)]))
        .await
        .unwrap();

    let actions: Vec<String> = service
        .audit_logs()
        .await
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert!(actions.contains(&"USER_CREATED".to_string()));
    assert!(actions.contains(&"LOGIN".to_string()));
    assert!(actions.contains(&"SALE_COMPLETED".to_string()));
    assert_eq!(count(&service, Collection::AuditLogs).await, actions.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_overflowing_stock_change_is_rejected() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;

    for change in [i64::MIN, i64::MAX] {
        assert!(matches!(
            service.request_stock_change("P1", change, "typo").await,
            Err(Error::InvalidInput(_))
        ));
    }
    assert!(service.stock_change_requests().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_approving_change_past_stock_range_writes_nothing() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, i64::MAX).await;
    let request = service
        .request_stock_change("P1", 1, "delivery")
        .await
        .unwrap();
    let before = queue_types(&service).await.len();

    assert!(matches!(
        service.resolve_stock_change(&request.id, true).await,
        Err(Error::InvalidInput(_))
    ));
    assert_eq!(stored_product(&service, "P1").await.stock, i64::MAX);
    assert_eq!(
        service.stock_change_requests().await[0].status,
        RequestStatus::Pending
    );
    assert_eq!(queue_types(&service).await.len(), before);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sale_with_overflowing_quantity_is_rejected() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;

    let result = service
        .process_sale(SaleRequest::new(vec![line("P1", i64::MAX), line("P1", 1)]))
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert_eq!(stored_product(&service, "P1").await.stock, 10);
    assert_eq!(count(&service, Collection::Sales).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_infinite_cost_counts_as_missing() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;

    let mut sale_line = line("P1", 1);
    sale_line.cost_at_sale = Some(f64::INFINITY);
    let result = service.process_sale(SaleRequest::new(vec![sale_line])).await;
    assert!(matches!(result, Err(Error::MissingCostPrice(_))));
    assert_eq!(count(&service, Collection::Sales).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_offline_mutations_push_once_per_queued_entry() {
    let service = setup().await;
    seed_product(&service, "P1", 10.0, 5.0, 10).await;
    seed_product(&service, "P2", 4.0, 2.0, 3).await;

    let sale = service
        .process_sale(SaleRequest::new(vec![line("P1", 2), line("P2", 1)]))
        .await
        .unwrap();
    let stock = service
        .request_stock_change("P1", 5, "delivery")
        .await
        .unwrap();
    service.resolve_stock_change(&stock.id, true).await.unwrap();
    let void = service.request_void(&sale.id, "wrong items").await.unwrap();
    service.resolve_void(&void.id, true).await.unwrap();

    let mut p2 = service.product("P2").await.unwrap();
    let version = p2.version.unwrap_or(0);
    p2.name = "Renamed".to_string();
    service.update_product(p2, version).await.unwrap();
    service.delete_product("P2").await.unwrap();

    let queued = {
        let db = service.database().lock().await;
        SyncQueueRepository::new(db.connection()).list().await.unwrap()
    };
    assert!(!queued
        .iter()
        .any(|item| item.action_type == "PRODUCT" && item.entity_id() == Some("P2")));
    assert!(queued
        .iter()
        .any(|item| item.action_type == "DELETE_PRODUCT" && item.entity_id() == Some("P2")));

    let remote = InMemoryRemoteStore::new();
    let gateway = UpsertGateway::new(Arc::new(remote.clone()), Duration::from_secs(5));
    let processor =
        SyncProcessor::new(service.database().clone(), gateway, &SyncConfig::default());
    let report = processor.run_pass().await.unwrap();

    assert_eq!(report.outcome, PassOutcome::Completed);
    assert_eq!(report.attempted, queued.len());
    assert_eq!(report.succeeded, queued.len());
    assert_eq!(remote.write_count(), queued.len());
    assert!(queue_types(&service).await.is_empty());
    assert!(remote.row("products", "P2").is_none());
    assert!(remote.row("products", "P1").is_some());
}
