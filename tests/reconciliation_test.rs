mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{checkout_payload, read_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use uuid::Uuid;

use payflow_api::config::ReconciliationConfig;
use payflow_api::entities::{
    order::Entity as OrderEntity,
    payment_transaction::{Entity as PaymentTransactionEntity, PaymentStatus},
    product::Entity as ProductEntity,
};
use payflow_api::services::ledger::{NewOrder, NewOrderLine};
use payflow_api::tasks::run_pending_sweep;

async fn place_order(app: &TestApp, product_id: Uuid, quantity: i32) -> (Uuid, String) {
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(checkout_payload(product_id, quantity)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    (
        Uuid::parse_str(body["order_id"].as_str().unwrap()).unwrap(),
        body["tracking_id"].as_str().unwrap().to_string(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_passes_over_one_payment_apply_exactly_one_transition() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("SKU-MUG", dec!(1250.00), 10)
        .await;
    let (_, tracking_id) = place_order(&app, product.id, 2).await;
    app.mount_transaction_status(&tracking_id, 1, "Completed")
        .await;

    // Every pass starts from the same stale PENDING snapshot, the situation a
    // webhook burst plus a sweep tick produces.
    let stale = PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("payment transaction row");
    assert_eq!(stale.status, PaymentStatus::Pending.as_str());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let reconciler = app.state.services.reconciler.clone();
        let snapshot = stale.clone();
        handles.push(tokio::spawn(async move {
            reconciler.reconcile(&snapshot).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.new_status, PaymentStatus::Completed);
        if outcome.transitioned {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    // One winner means one stock decrement, no matter how many passes raced.
    let shelf = ProductEntity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shelf.stock_quantity, 8);
}

#[tokio::test]
async fn a_pass_that_agrees_with_the_gateway_changes_nothing() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("SKU-TEE", dec!(899.00), 6)
        .await;
    let (_, tracking_id) = place_order(&app, product.id, 1).await;
    app.mount_transaction_status(&tracking_id, 1, "Completed")
        .await;

    let pending = PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let first = app
        .state
        .services
        .reconciler
        .reconcile(&pending)
        .await
        .unwrap();
    assert!(first.transitioned);

    let settled = PaymentTransactionEntity::find_by_id(pending.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let second = app
        .state
        .services
        .reconciler
        .reconcile(&settled)
        .await
        .unwrap();

    assert_eq!(second.new_status, PaymentStatus::Completed);
    assert!(!second.transitioned);

    let shelf = ProductEntity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shelf.stock_quantity, 5);
}

#[tokio::test]
async fn an_unrecognized_gateway_answer_keeps_the_payment_pending() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("SKU-CAP", dec!(450.00), 4)
        .await;
    let (_, tracking_id) = place_order(&app, product.id, 1).await;
    app.mount_transaction_status(&tracking_id, 7, "Awaiting Payment")
        .await;

    let pending = PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let outcome = app
        .state
        .services
        .reconciler
        .reconcile(&pending)
        .await
        .unwrap();

    assert_eq!(outcome.new_status, PaymentStatus::Pending);
    assert!(!outcome.transitioned);

    let row = PaymentTransactionEntity::find_by_id(pending.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Pending.as_str());
    assert_eq!(row.gateway_status_code, None);
}

#[tokio::test]
async fn a_silent_gateway_aborts_the_pass_without_touching_the_ledger() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("SKU-PEN", dec!(99.00), 9)
        .await;
    let (_, _tracking_id) = place_order(&app, product.id, 1).await;
    // No status stub: the gateway answers 404 for the query.

    let pending = PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let err = app
        .state
        .services
        .reconciler
        .reconcile(&pending)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        payflow_api::errors::ServiceError::StatusUnavailable(_)
    ));

    let row = PaymentTransactionEntity::find_by_id(pending.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Pending.as_str());
}

#[tokio::test]
async fn cancelled_payments_finalize_without_stock_movement() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("SKU-BAG", dec!(3200.00), 4)
        .await;
    let (order_id, tracking_id) = place_order(&app, product.id, 1).await;
    app.mount_transaction_status(&tracking_id, 3, "Cancelled by buyer")
        .await;

    let pending = PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let outcome = app
        .state
        .services
        .reconciler
        .reconcile(&pending)
        .await
        .unwrap();

    assert_eq!(outcome.new_status, PaymentStatus::Cancelled);
    assert!(outcome.transitioned);

    let order = OrderEntity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, "failed");

    let shelf = ProductEntity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shelf.stock_quantity, 4);
}

#[tokio::test]
async fn manual_sync_reports_each_order_separately() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("SKU-MUG", dec!(1250.00), 10)
        .await;
    let (order_id, tracking_id) = place_order(&app, product.id, 1).await;
    app.mount_transaction_status(&tracking_id, 1, "Completed")
        .await;

    let unknown_order = Uuid::new_v4();
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/sync",
            Some(json!({ "order_ids": [order_id, unknown_order] })),
        )
        .await;

    // Per-order failures stay inside their rows; the batch itself is a 200.
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let results = body["results"].as_array().expect("results array");
    assert_eq!(results.len(), 2);

    let synced = &results[0];
    assert_eq!(synced["orderId"].as_str(), Some(order_id.to_string().as_str()));
    assert_eq!(synced["oldStatus"], json!("PENDING"));
    assert_eq!(synced["newStatus"], json!("COMPLETED"));
    assert_eq!(synced["updated"], json!(true));
    assert!(synced.get("error").is_none());

    let missed = &results[1];
    assert_eq!(
        missed["orderId"].as_str(),
        Some(unknown_order.to_string().as_str())
    );
    assert_eq!(missed["oldStatus"], json!(null));
    assert_eq!(missed["newStatus"], json!(null));
    assert_eq!(missed["updated"], json!(false));
    assert!(missed["error"]
        .as_str()
        .unwrap()
        .contains("No payment transaction"));

    let row = PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Completed.as_str());
}

#[tokio::test]
async fn manual_sync_rejects_an_empty_batch() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/sync",
            Some(json!({ "order_ids": [] })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn background_sweep_settles_overdue_pending_payments() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("SKU-TEE", dec!(899.00), 5)
        .await;
    let (order_id, tracking_id) = place_order(&app, product.id, 1).await;
    app.mount_transaction_status(&tracking_id, 1, "Completed")
        .await;
    let checkout_txn = PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("payment transaction row");

    // A payment the gateway never accepted has no tracking id; the sweep must
    // leave it alone since there is nothing to query.
    let (_, orphan) = app
        .state
        .services
        .ledger
        .create_order_with_transaction(
            NewOrder {
                order_number: "PF-20260824-ORPHAN01".to_string(),
                customer_name: "Amina Odhiambo".to_string(),
                customer_email: "amina@example.com".to_string(),
                customer_phone: None,
                currency: "KES".to_string(),
                total_amount: dec!(899.00),
                notes: None,
            },
            vec![NewOrderLine {
                product_id: product.id,
                sku: product.sku.clone(),
                name: product.name.clone(),
                quantity: 1,
                unit_price: dec!(899.00),
            }],
        )
        .await
        .unwrap();

    let sweep = tokio::spawn(run_pending_sweep(
        app.state.services.ledger.clone(),
        app.state.services.reconciler.clone(),
        ReconciliationConfig {
            sweep_enabled: true,
            sweep_interval_secs: 1,
            min_pending_age_secs: 0,
        },
    ));

    let mut settled = false;
    for _ in 0..40 {
        let row = PaymentTransactionEntity::find_by_id(checkout_txn.id)
            .one(&*app.state.db)
            .await
            .unwrap()
            .unwrap();
        if row.status == PaymentStatus::Completed.as_str() {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    sweep.abort();
    assert!(settled, "sweep never settled the pending payment");

    let order = OrderEntity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, "completed");

    let shelf = ProductEntity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shelf.stock_quantity, 4);

    let untouched = PaymentTransactionEntity::find_by_id(orphan.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.status, PaymentStatus::Pending.as_str());
}
