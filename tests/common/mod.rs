#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    Router,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

use payflow_api::{
    config::{AppConfig, GatewayConfig},
    db,
    entities::product,
    events::{self, EventSender},
    gateway::{GatewayClient, GatewayTokenCache, PaymentGateway},
    handlers::AppServices,
    logging::{setup_logger, LoggerConfig},
    AppState,
};

pub const TOKEN_PATH: &str = "/api/Auth/RequestToken";
pub const REGISTER_IPN_PATH: &str = "/api/URLSetup/RegisterIPN";
pub const SUBMIT_ORDER_PATH: &str = "/api/Transactions/SubmitOrderRequest";
pub const TRANSACTION_STATUS_PATH: &str = "/api/Transactions/GetTransactionStatus";

/// Helper harness for spinning up an application backed by a private SQLite
/// database and a wiremock stand-in for the payment gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: MockServer,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: tempfile::TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state and the
    /// standard happy-path gateway stubs (token, IPN registration, order
    /// submission) already mounted.
    pub async fn new() -> Self {
        let app = Self::with_empty_gateway().await;
        mount_gateway_auth(&app.gateway).await;
        mount_accepting_submission(&app.gateway).await;
        app
    }

    /// Construct a test application whose gateway mock starts without any
    /// stubs, for tests that need full control over gateway behavior.
    pub async fn with_empty_gateway() -> Self {
        let gateway = MockServer::start().await;

        let db_dir = tempfile::TempDir::new().expect("create temp dir for test database");
        let db_path = db_dir.path().join("payflow_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "redis://127.0.0.1:6379".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway = test_gateway_config(&gateway.uri());
        cfg.reconciliation.sweep_enabled = false;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx, None));

        let redis_client = Arc::new(
            redis::Client::open(cfg.redis_url.clone()).expect("invalid redis url for tests"),
        );

        let token_cache = Arc::new(GatewayTokenCache::new(Duration::from_secs(
            cfg.gateway.token_refresh_margin_secs,
        )));
        let gateway_client: Arc<dyn PaymentGateway> =
            Arc::new(GatewayClient::new(cfg.gateway.clone(), token_cache));

        let base_logger = setup_logger(LoggerConfig::quiet());
        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            gateway_client,
            &cfg,
            base_logger,
        );

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
            redis: redis_client,
        };

        let router = Router::new()
            .merge(payflow_api::callback_routes())
            .nest("/api/v1", payflow_api::api_v1_routes())
            .layer(axum::middleware::from_fn(
                payflow_api::tracing::request_id_middleware,
            ))
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Send a request against the router with an optional JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Insert a catalog product the checkout flow can price against.
    pub async fn seed_product(&self, sku: &str, price: Decimal, stock: i32) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("Test Product {}", sku)),
            description: Set(Some("Seeded for integration tests".to_string())),
            sku: Set(sku.to_string()),
            price: Set(price),
            currency: Set("KES".to_string()),
            stock_quantity: Set(stock),
            is_active: Set(true),
            image_url: Set(None),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product for tests")
    }

    /// Stub the gateway status endpoint for one tracking id.
    pub async fn mount_transaction_status(
        &self,
        tracking_id: &str,
        status_code: i32,
        description: &str,
    ) {
        Mock::given(method("GET"))
            .and(path(TRANSACTION_STATUS_PATH))
            .and(query_param("orderTrackingId", tracking_id))
            .respond_with(transaction_status_template(status_code, description))
            .mount(&self.gateway)
            .await;
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Gateway tuning for tests: short retry budget so failure paths finish fast.
pub fn test_gateway_config(base_url: &str) -> GatewayConfig {
    GatewayConfig {
        base_url: base_url.to_string(),
        callback_url: "http://127.0.0.1:18080/callback".to_string(),
        request_timeout_secs: 5,
        retry_attempts: 2,
        retry_delay_ms: 25,
        ..GatewayConfig::default()
    }
}

/// Stub the credential exchange and notification URL registration.
pub async fn mount_gateway_auth(gateway: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "test-bearer-token",
            "expiryDate": (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
            "error": null,
            "status": "200"
        })))
        .mount(gateway)
        .await;

    Mock::given(method("POST"))
        .and(path(REGISTER_IPN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ipn_id": "ipn-test-0001",
            "url": "http://127.0.0.1:18080/callback",
            "status": "200"
        })))
        .mount(gateway)
        .await;
}

/// Stub order submission to accept everything, minting a unique tracking id
/// per order the way the real gateway does.
pub async fn mount_accepting_submission(gateway: &MockServer) {
    let responder = AcceptOrderResponder {
        base_url: gateway.uri(),
    };
    Mock::given(method("POST"))
        .and(path(SUBMIT_ORDER_PATH))
        .respond_with(responder)
        .mount(gateway)
        .await;
}

/// Response template for the status endpoint, shaped like the real payload.
pub fn transaction_status_template(status_code: i32, description: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "status_code": status_code,
        "payment_status_description": description,
        "payment_method": "Visa",
        "confirmation_code": "CONF-778899",
        "merchant_reference": null,
        "amount": null,
        "currency": null,
        "message": "Request processed successfully"
    }))
}

struct AcceptOrderResponder {
    base_url: String,
}

impl Respond for AcceptOrderResponder {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let merchant_reference = request
            .body_json::<Value>()
            .ok()
            .and_then(|body| body.get("id").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_default();
        let tracking_id = format!("trk-{}", Uuid::new_v4().simple());
        ResponseTemplate::new(200).set_body_json(json!({
            "order_tracking_id": tracking_id,
            "merchant_reference": merchant_reference,
            "redirect_url": format!("{}/hosted/{}", self.base_url, tracking_id),
            "status": "200"
        }))
    }
}

/// A well-formed checkout request for one product.
pub fn checkout_payload(product_id: Uuid, quantity: i32) -> Value {
    json!({
        "first_name": "Amina",
        "last_name": "Odhiambo",
        "email": "amina@example.com",
        "phone": "+254700000001",
        "items": [
            {
                "product_id": product_id.to_string(),
                "quantity": quantity
            }
        ]
    })
}

/// Read and parse a JSON response body.
pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("parse response body")
}

/// Read a plain-text response body.
pub async fn read_text(response: axum::response::Response) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(bytes.to_vec()).expect("response body should be utf-8")
}
