mod common;

use std::str::FromStr;

use axum::http::{Method, StatusCode};
use common::{
    checkout_payload, mount_gateway_auth, read_json, TestApp, SUBMIT_ORDER_PATH,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use payflow_api::entities::{
    order::Entity as OrderEntity,
    payment_transaction::{Entity as PaymentTransactionEntity, PaymentStatus},
};

#[tokio::test]
async fn creating_a_checkout_order_opens_a_payment_session() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("SKU-MUG", dec!(1250.00), 10)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(checkout_payload(product.id, 2)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["success"], json!(true));

    let order_number = body["order_number"].as_str().expect("order_number");
    assert!(order_number.starts_with("PF-"), "got {order_number}");

    let tracking_id = body["tracking_id"].as_str().expect("tracking_id");
    assert!(tracking_id.starts_with("trk-"), "got {tracking_id}");
    let iframe_url = body["iframe_url"].as_str().expect("iframe_url");
    assert!(iframe_url.contains(tracking_id));

    let total = Decimal::from_str(body["total_amount"].as_str().expect("total_amount")).unwrap();
    assert_eq!(total, dec!(2500.00));
    assert_eq!(body["currency"], json!("KES"));

    // The ledger holds a PENDING transaction keyed by the gateway's ids.
    let order_id = Uuid::parse_str(body["order_id"].as_str().unwrap()).unwrap();
    let order = OrderEntity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("order row");
    assert_eq!(order.order_number, order_number);
    assert_eq!(order.payment_status, "pending");

    let transaction = PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("payment transaction row");
    assert_eq!(transaction.order_id, order_id);
    assert_eq!(transaction.status, PaymentStatus::Pending.as_str());
    assert_eq!(transaction.merchant_reference, order_number);
    assert_eq!(transaction.tracking_id.as_deref(), Some(tracking_id));
    assert_eq!(transaction.amount, dec!(2500.00));
}

#[tokio::test]
async fn fetching_an_order_reports_its_payment_state() {
    let app = TestApp::new().await;
    let product = app
        .seed_product("SKU-TEE", dec!(899.00), 5)
        .await;

    let created = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(checkout_payload(product.id, 3)),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = read_json(created).await;
    let order_id = created["order_id"].as_str().unwrap().to_string();
    let tracking_id = created["tracking_id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/checkout/orders/{}", order_id),
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["success"], json!(true));

    let data = &body["data"];
    assert_eq!(data["order_id"].as_str(), Some(order_id.as_str()));
    assert_eq!(data["customer_name"], json!("Amina Odhiambo"));
    assert_eq!(data["payment_status"], json!("pending"));
    assert_eq!(data["items"].as_array().map(Vec::len), Some(1));
    assert_eq!(data["items"][0]["sku"], json!("SKU-TEE"));
    assert_eq!(data["items"][0]["quantity"], json!(3));

    let payment = &data["payment"];
    assert_eq!(payment["status"], json!("PENDING"));
    assert_eq!(payment["tracking_id"].as_str(), Some(tracking_id.as_str()));
    assert!(payment["redirect_url"].as_str().unwrap().contains(&tracking_id));
}

#[tokio::test]
async fn fetching_an_unknown_order_is_a_404() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/checkout/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert_eq!(body["error"], json!("Not Found"));
}

#[tokio::test]
async fn gateway_rejection_fails_the_payment_and_surfaces_the_gateway_code() {
    let app = TestApp::with_empty_gateway().await;
    mount_gateway_auth(&app.gateway).await;
    // The gateway answers 200 but embeds a rejection in the body.
    Mock::given(method("POST"))
        .and(path(SUBMIT_ORDER_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "order_tracking_id": null,
            "redirect_url": null,
            "error": {
                "error_type": "api_error",
                "code": "500.004.1001",
                "message": "Invalid currency code"
            },
            "status": "400"
        })))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let product = app
        .seed_product("SKU-CAP", dec!(450.00), 4)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(checkout_payload(product.id, 1)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["error_code"], json!("500.004.1001"));
    assert_eq!(body["user_message"], json!("Invalid currency code"));
    assert_eq!(body["support_contact"], json!("support@payflow.dev"));

    // A definitive rejection finalizes the transaction as FAILED.
    let transaction = PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("payment transaction row");
    assert_eq!(transaction.status, PaymentStatus::Failed.as_str());
    assert!(transaction.tracking_id.is_none());

    let order = OrderEntity::find_by_id(transaction.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, "failed");
}

#[tokio::test]
async fn gateway_outage_keeps_the_payment_pending_for_later_retry() {
    let app = TestApp::with_empty_gateway().await;
    mount_gateway_auth(&app.gateway).await;
    // Transport-level trouble: retried up to the configured budget of 2.
    Mock::given(method("POST"))
        .and(path(SUBMIT_ORDER_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&app.gateway)
        .await;

    let product = app
        .seed_product("SKU-BAG", dec!(3200.00), 2)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(checkout_payload(product.id, 1)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = read_json(response).await;
    assert_eq!(body["error_code"], json!("GATEWAY_UNAVAILABLE"));
    assert_eq!(body["support_contact"], json!("support@payflow.dev"));

    // Unlike a rejection, an outage is not a verdict: the transaction stays
    // PENDING with no tracking id and a later submission can pick it up.
    let transaction = PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("payment transaction row");
    assert_eq!(transaction.status, PaymentStatus::Pending.as_str());
    assert!(transaction.tracking_id.is_none());
}

#[tokio::test]
async fn unknown_products_are_rejected_before_touching_the_gateway() {
    let app = TestApp::with_empty_gateway().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(checkout_payload(Uuid::new_v4(), 1)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"], json!("Bad Request"));
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("is not available"));

    assert!(PaymentTransactionEntity::find()
        .one(&*app.state.db)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn ordering_more_than_the_shelf_holds_is_rejected() {
    let app = TestApp::with_empty_gateway().await;
    let product = app
        .seed_product("SKU-LOW", dec!(150.00), 1)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(checkout_payload(product.id, 5)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Only 1 units of SKU-LOW available"));
}

#[tokio::test]
async fn checkout_rejects_an_empty_cart() {
    let app = TestApp::with_empty_gateway().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(json!({
                "first_name": "Amina",
                "last_name": "Odhiambo",
                "email": "amina@example.com",
                "items": []
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
