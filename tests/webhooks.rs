//! Mercado Pago webhook tests: the synchronous signature gate, the
//! idempotency ledger, and payment reconciliation.

use axum::{
    body::{Body, Bytes},
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::*;

/// Current Unix timestamp as a string, for signature manifests.
fn now_ts() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Build a signed webhook request carrying the payment id in both the
/// query string and the body, the way Mercado Pago delivers it.
fn signed_webhook_request(payment_id: &str, secret: &str) -> Request<Body> {
    let ts = now_ts();
    let signature = sign_webhook(secret, Some(payment_id), Some("req-1"), &ts);
    Request::builder()
        .method("POST")
        .uri(format!("/api/mp/webhooks?data.id={}", payment_id))
        .header("content-type", "application/json")
        .header("x-signature", signature)
        .header("x-request-id", "req-1")
        .body(Body::from(payment_webhook_body(payment_id)))
        .unwrap()
}

/// Clone a state with the provider base URL pointed at a stub server.
fn with_mp_base(state: &AppState, base: String) -> AppState {
    let mut config = (*state.config).clone();
    config.mp_api_base = base;
    AppState {
        config: std::sync::Arc::new(config),
        ..state.clone()
    }
}

// ============ Signature Gate (Phase A) ============

#[tokio::test]
async fn webhook_without_configured_secret_is_rejected() {
    let mut config = test_config();
    config.mp_webhook_secret = None;
    let state = create_test_app_state_with(config);
    let app = app(state.clone());

    let response = app
        .oneshot(signed_webhook_request("123", TEST_WEBHOOK_SECRET))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Webhook secret not configured");

    // Nothing reaches the ledger when the gate rejects.
    settle().await;
    assert_eq!(count_ledger_rows(&state), 0);
}

#[tokio::test]
async fn webhook_with_invalid_signature_is_rejected() {
    let state = create_test_app_state();
    let app = app(state.clone());

    let response = app
        .oneshot(signed_webhook_request("123", "wrong-secret"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Invalid signature");

    settle().await;
    assert_eq!(count_ledger_rows(&state), 0);
}

#[tokio::test]
async fn webhook_without_signature_header_is_rejected() {
    let state = create_test_app_state();
    let app = app(state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/mp/webhooks?data.id=123")
                .header("content-type", "application/json")
                .body(Body::from(payment_webhook_body("123")))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    settle().await;
    assert_eq!(count_ledger_rows(&state), 0);
}

#[tokio::test]
async fn signature_falls_back_to_body_data_id_when_query_is_absent() {
    let state = create_test_app_state();
    let app = app(state.clone());

    let ts = now_ts();
    let signature = sign_webhook(TEST_WEBHOOK_SECRET, Some("ABC999"), None, &ts);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/mp/webhooks")
                .header("content-type", "application/json")
                .header("x-signature", signature)
                .body(Body::from(payment_webhook_body("ABC999")))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // The delivery was accepted and landed in the ledger; the payment
    // fetch itself fails here (no provider is listening), which is fine.
    let event = wait_for_terminal_event(&state, "ABC999").await;
    assert_eq!(event.event_type, "payment");
}

// ============ Reconciliation (Phase B) ============

#[tokio::test]
async fn payment_webhook_reconciles_order_end_to_end() {
    let state = create_test_app_state();
    let order = create_test_order(&state);
    let stub = spawn_mp_stub(
        StatusCode::OK,
        json!({
            "id": 4242424242i64,
            "status": "approved",
            "external_reference": order.external_reference,
        }),
    )
    .await;
    let state = with_mp_base(&state, stub);
    let app = app(state.clone());

    let key = StatusNotifier::channel_key(&order.external_reference, &order.payer_email);
    let mut rx = state.notifier.subscribe(&key).await;

    let response = app
        .oneshot(signed_webhook_request("4242424242", TEST_WEBHOOK_SECRET))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["received"], true);

    let event = wait_for_terminal_event(&state, "4242424242").await;
    assert_eq!(event.status, WebhookEventStatus::Processed);
    assert!(event.error_message.is_none());

    // The subscriber sees the approval first, then the failed dispatch
    // (no Montink key is configured in tests).
    assert_eq!(recv_status(&mut rx).await, OrderStatus::ReadyForMontink);
    assert_eq!(recv_status(&mut rx).await, OrderStatus::FailedMontink);

    settle().await;
    let order = reload_order(&state, &order.id);
    assert_eq!(order.status, OrderStatus::FailedMontink);
    assert_eq!(order.mp_payment_id.as_deref(), Some("4242424242"));
    assert_eq!(order.mp_status.as_deref(), Some("approved"));
    assert!(order.montink_order_id.is_none());
    assert!(order.montink_status.is_none());
}

#[tokio::test]
async fn duplicate_delivery_is_absorbed_by_the_ledger() {
    let state = create_test_app_state();
    let order = create_test_order(&state);
    let stub = spawn_mp_stub(
        StatusCode::OK,
        json!({
            "id": 555,
            "status": "approved",
            "external_reference": order.external_reference,
        }),
    )
    .await;
    let state = with_mp_base(&state, stub);

    let key = StatusNotifier::channel_key(&order.external_reference, &order.payer_email);
    let mut rx = state.notifier.subscribe(&key).await;

    let body = Bytes::from(payment_webhook_body("555"));
    process_webhook(state.clone(), body.clone()).await;
    assert_eq!(recv_status(&mut rx).await, OrderStatus::ReadyForMontink);

    process_webhook(state.clone(), body).await;
    settle().await;

    // One fulfillment attempt from the first delivery; the replay adds
    // nothing on top of it.
    assert_eq!(recv_status(&mut rx).await, OrderStatus::FailedMontink);
    assert!(matches!(
        rx.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));

    assert_eq!(count_ledger_rows(&state), 1);
    let event = get_ledger_row(&state, "555").unwrap();
    assert_eq!(event.status, WebhookEventStatus::Processed);
}

#[tokio::test]
async fn event_without_data_id_is_filed_as_ignored() {
    let state = create_test_app_state();

    let body = json!({
        "action": "payment.updated",
        "type": "payment",
        "data": { "id": "" }
    })
    .to_string();
    process_webhook(state.clone(), Bytes::from(body)).await;

    let conn = state.db.get().unwrap();
    let (event_id, status): (String, String) = conn
        .query_row("SELECT event_id, status FROM webhook_events", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert!(event_id.starts_with("empty-"));
    assert_eq!(status, "ignored");
}

#[tokio::test]
async fn merchant_order_event_is_acknowledged() {
    let state = create_test_app_state();

    let body = json!({ "type": "merchant_order", "data": { "id": "mo-8821" } }).to_string();
    process_webhook(state.clone(), Bytes::from(body)).await;

    let event = get_ledger_row(&state, "mo-8821").unwrap();
    assert_eq!(event.event_type, "merchant_order");
    assert_eq!(event.status, WebhookEventStatus::Processed);
    assert!(event.error_message.is_none());
}

#[tokio::test]
async fn unknown_event_type_is_ignored() {
    let state = create_test_app_state();

    let body = json!({ "type": "plan", "data": { "id": "p-1" } }).to_string();
    process_webhook(state.clone(), Bytes::from(body)).await;

    let event = get_ledger_row(&state, "p-1").unwrap();
    assert_eq!(event.status, WebhookEventStatus::Ignored);
}

#[tokio::test]
async fn payment_for_unknown_reference_is_marked_failed() {
    let state = create_test_app_state();
    let stub = spawn_mp_stub(
        StatusCode::OK,
        json!({
            "id": 909,
            "status": "approved",
            "external_reference": "ORD-GHOST",
        }),
    )
    .await;
    let state = with_mp_base(&state, stub);

    process_webhook(state.clone(), Bytes::from(payment_webhook_body("909"))).await;

    let event = get_ledger_row(&state, "909").unwrap();
    assert_eq!(event.status, WebhookEventStatus::Failed);
    assert!(event.error_message.unwrap().contains("ORD-GHOST"));

    let conn = state.db.get().unwrap();
    let orders: i64 = conn
        .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
        .unwrap();
    assert_eq!(orders, 0);
}

#[tokio::test]
async fn provider_fetch_error_is_marked_failed() {
    let state = create_test_app_state();
    let order = create_test_order(&state);
    let stub = spawn_mp_stub(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "message": "internal error" }),
    )
    .await;
    let state = with_mp_base(&state, stub);

    process_webhook(state.clone(), Bytes::from(payment_webhook_body("611"))).await;

    let event = get_ledger_row(&state, "611").unwrap();
    assert_eq!(event.status, WebhookEventStatus::Failed);
    assert!(event
        .error_message
        .unwrap()
        .contains("failed to fetch payment"));

    // The order is untouched; a later successful fetch can still settle it.
    let order = reload_order(&state, &order.id);
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.mp_payment_id.is_none());
}

#[tokio::test]
async fn unknown_payment_status_leaves_order_status_alone() {
    let state = create_test_app_state();
    let order = create_test_order(&state);
    let stub = spawn_mp_stub(
        StatusCode::OK,
        json!({
            "id": 777,
            "status": "authorized",
            "external_reference": order.external_reference,
        }),
    )
    .await;
    let state = with_mp_base(&state, stub);

    let key = StatusNotifier::channel_key(&order.external_reference, &order.payer_email);
    let mut rx = state.notifier.subscribe(&key).await;

    process_webhook(state.clone(), Bytes::from(payment_webhook_body("777"))).await;

    let event = get_ledger_row(&state, "777").unwrap();
    assert_eq!(event.status, WebhookEventStatus::Processed);

    // The raw provider status is still recorded for the audit trail.
    let order = reload_order(&state, &order.id);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.mp_status.as_deref(), Some("authorized"));
    assert_eq!(order.mp_payment_id.as_deref(), Some("777"));

    // Subscribers hear the unchanged status; no fulfillment is queued.
    assert_eq!(recv_status(&mut rx).await, OrderStatus::Pending);
    settle().await;
    assert!(matches!(
        rx.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn missing_access_token_is_marked_failed() {
    let mut config = test_config();
    config.mp_access_token = None;
    let state = create_test_app_state_with(config);

    process_webhook(state.clone(), Bytes::from(payment_webhook_body("313"))).await;

    let event = get_ledger_row(&state, "313").unwrap();
    assert_eq!(event.status, WebhookEventStatus::Failed);
    assert_eq!(
        event.error_message.as_deref(),
        Some("MP_ACCESS_TOKEN not configured")
    );
}

#[tokio::test]
async fn payment_without_external_reference_is_ignored() {
    let state = create_test_app_state();
    let stub = spawn_mp_stub(
        StatusCode::OK,
        json!({
            "id": 606,
            "status": "approved",
            "external_reference": "   ",
        }),
    )
    .await;
    let state = with_mp_base(&state, stub);

    process_webhook(state.clone(), Bytes::from(payment_webhook_body("606"))).await;

    let event = get_ledger_row(&state, "606").unwrap();
    assert_eq!(event.status, WebhookEventStatus::Ignored);
    assert_eq!(
        event.error_message.as_deref(),
        Some("external reference missing")
    );
}

#[tokio::test]
async fn fulfillment_skips_orders_not_awaiting_dispatch() {
    let state = create_test_app_state();
    let order = create_test_order(&state);

    let key = StatusNotifier::channel_key(&order.external_reference, &order.payer_email);
    let mut rx = state.notifier.subscribe(&key).await;

    process_fulfillment(&state, &order.id).await.unwrap();

    let unchanged = reload_order(&state, &order.id);
    assert_eq!(unchanged.status, OrderStatus::Pending);
    assert!(unchanged.montink_order_id.is_none());
    assert!(unchanged.montink_status.is_none());
    assert_eq!(
        rx.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    );
}
