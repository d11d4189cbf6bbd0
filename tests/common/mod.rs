//! Test utilities and fixtures for Bravos integration tests

#![allow(dead_code)]

use axum::routing::{get, post};
use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// Re-export the main library crate
pub use bravos::config::{Config, RateLimits};
pub use bravos::db::{init_db, queries, AppState};
pub use bravos::email::EmailService;
pub use bravos::fulfillment::process_fulfillment;
pub use bravos::handlers::admin::{export_order, list_orders, mark_montink};
pub use bravos::handlers::public::{
    create_order, create_payment, create_preference, get_order, order_events,
};
pub use bravos::handlers::webhooks::{handle_mercadopago_webhook, process_webhook};
pub use bravos::middleware::{admin_auth, ADMIN_TOKEN_HEADER};
pub use bravos::models::*;
pub use bravos::notifier::StatusNotifier;
pub use bravos::payments::MERCADOPAGO_PROVIDER;

pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";

/// Config wired for tests: fixed secrets, no live provider endpoints.
/// Port 9 is the discard service, so stray calls fail fast.
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: ":memory:".to_string(),
        mp_webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
        mp_access_token: Some("TEST-access-token".to_string()),
        mp_api_base: "http://127.0.0.1:9".to_string(),
        montink_api_base: "http://127.0.0.1:9".to_string(),
        montink_api_key: None,
        resend_api_key: None,
        email_from: "store@test.local".to_string(),
        admin_token: Some(TEST_ADMIN_TOKEN.to_string()),
        rate_limit: RateLimits::default(),
        sse_heartbeat_secs: 30,
        dev_mode: false,
    }
}

/// Create an AppState for testing with an in-memory database.
///
/// Uses a named shared-cache memory database so every pooled connection
/// (including ones opened by detached tasks) sees the same data.
pub fn create_test_app_state() -> AppState {
    create_test_app_state_with(test_config())
}

pub fn create_test_app_state_with(config: Config) -> AppState {
    let db_name = format!(
        "file:bravos-test-{}?mode=memory&cache=shared",
        uuid::Uuid::new_v4()
    );
    let manager = SqliteConnectionManager::file(db_name);
    let pool = Pool::builder().max_size(4).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    AppState {
        db: pool,
        config: Arc::new(config),
        http: reqwest::Client::new(),
        notifier: StatusNotifier::new(),
        email: Arc::new(EmailService::new(None, "store@test.local".to_string())),
    }
}

/// Create a Router with all API endpoints (without rate limiting for tests)
pub fn app(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/admin/orders", get(list_orders))
        .route(
            "/api/admin/orders/{external_reference}/export",
            get(export_order),
        )
        .route(
            "/api/orders/{external_reference}/mark-montink",
            post(mark_montink),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            admin_auth,
        ));

    Router::new()
        .route("/api/checkout/create-order", post(create_order))
        .route("/api/orders/{external_reference}", get(get_order))
        .route("/api/orders/{external_reference}/events", get(order_events))
        .route("/api/mp/create-payment", post(create_payment))
        .route("/api/mp/create-preference", post(create_preference))
        .route("/api/mp/webhooks", post(handle_mercadopago_webhook))
        .merge(admin)
        .with_state(state)
}

/// Checkout payload with one item and a full shipping block.
pub fn sample_checkout() -> CreateOrder {
    CreateOrder {
        payer_email: "buyer@example.com".to_string(),
        payer_name: Some("Test Buyer".to_string()),
        coupon_code: None,
        subtotal_cents: 10000,
        discount_cents: 0,
        shipping_cents: 1500,
        total_cents: 11500,
        shipping: Some(ShippingDetails {
            cep: Some("01310-100".to_string()),
            address1: Some("Av Paulista".to_string()),
            number: Some("1000".to_string()),
            complement: None,
            district: Some("Bela Vista".to_string()),
            city: Some("Sao Paulo".to_string()),
            state: Some("SP".to_string()),
            service: Some("sedex".to_string()),
            deadline_days: Some(5),
        }),
        items: vec![CreateOrderItem {
            product_id: "tee-classic".to_string(),
            name: Some("Classic Tee".to_string()),
            quantity: 2,
            unit_price_cents: 5000,
            size: Some("M".to_string()),
            color: Some("black".to_string()),
        }],
    }
}

/// Insert a PENDING order directly through the queries layer.
pub fn create_test_order(state: &AppState) -> Order {
    let mut conn = state.db.get().unwrap();
    let tx = conn.transaction().unwrap();
    let order = queries::create_order(&tx, &sample_checkout()).unwrap();
    tx.commit().unwrap();
    order
}

/// Build a valid `x-signature` header for a webhook delivery.
///
/// Mirrors the provider's manifest rules: alphanumeric data ids are
/// lowercased, absent pieces are omitted.
pub fn sign_webhook(
    secret: &str,
    data_id: Option<&str>,
    request_id: Option<&str>,
    ts: &str,
) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut manifest = String::new();
    if let Some(data_id) = data_id.filter(|s| !s.is_empty()) {
        let id = if data_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            data_id.to_lowercase()
        } else {
            data_id.to_string()
        };
        manifest.push_str(&format!("id:{};", id));
    }
    if let Some(request_id) = request_id.filter(|s| !s.is_empty()) {
        manifest.push_str(&format!("request-id:{};", request_id));
    }
    manifest.push_str(&format!("ts:{};", ts));

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(manifest.as_bytes());
    format!("ts={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
}

/// Standard payment notification body.
pub fn payment_webhook_body(payment_id: &str) -> String {
    json!({
        "action": "payment.updated",
        "type": "payment",
        "data": { "id": payment_id }
    })
    .to_string()
}

/// Spawn a minimal Mercado Pago stand-in that answers payment fetches.
/// Returns the base URL to point `mp_api_base` at.
pub async fn spawn_mp_stub(status: axum::http::StatusCode, payment: serde_json::Value) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().route(
        "/v1/payments/{id}",
        get(move || {
            let payment = payment.clone();
            async move { (status, axum::Json(payment)) }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Fetch the ledger row for an event id, if any.
pub fn get_ledger_row(state: &AppState, event_id: &str) -> Option<WebhookEvent> {
    let conn = state.db.get().unwrap();
    queries::get_webhook_event_by_event_id(&conn, MERCADOPAGO_PROVIDER, event_id).unwrap()
}

/// Total number of ledger rows, across all event ids.
pub fn count_ledger_rows(state: &AppState) -> i64 {
    let conn = state.db.get().unwrap();
    conn.query_row("SELECT COUNT(*) FROM webhook_events", [], |row| row.get(0))
        .unwrap()
}

/// Reload an order by id.
pub fn reload_order(state: &AppState, order_id: &str) -> Order {
    let conn = state.db.get().unwrap();
    queries::get_order(&conn, order_id).unwrap().unwrap()
}

/// Poll the ledger until the event leaves `received`, or panic after 2s.
/// Used when processing runs detached behind the webhook endpoint.
pub async fn wait_for_terminal_event(state: &AppState, event_id: &str) -> WebhookEvent {
    for _ in 0..200 {
        if let Some(event) = get_ledger_row(state, event_id) {
            if event.status != WebhookEventStatus::Received {
                return event;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("event {} never reached a terminal state", event_id);
}

/// Give detached tasks (fulfillment, email) a chance to finish.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Receive one status frame from a notifier subscription, with a deadline.
pub async fn recv_status(rx: &mut tokio::sync::broadcast::Receiver<OrderStatus>) -> OrderStatus {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for status update")
        .expect("status channel closed")
}
