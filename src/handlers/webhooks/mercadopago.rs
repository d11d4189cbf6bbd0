//! Mercado Pago webhook intake and reconciliation.
//!
//! The endpoint runs in two phases. Phase A is synchronous and decides only
//! between 401 and 200: secret configured, signature valid. Phase B runs
//! detached after the 200 is on the wire: idempotency ledger, payment fetch,
//! order reconciliation, fulfillment dispatch, status notification. Nothing
//! in Phase B can change the response the provider saw.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::email;
use crate::error::{AppError, Result};
use crate::extractors::Query;
use crate::fulfillment;
use crate::models::{OrderStatus, WebhookEventStatus};
use crate::payments::{
    verify_webhook_signature, MercadoPagoClient, PaymentId, MERCADOPAGO_PROVIDER,
};
use crate::util::spawn_detached;

#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    /// Mercado Pago sends the resource id as a literal `data.id` query key.
    #[serde(default, rename = "data.id")]
    pub data_id: Option<String>,
}

/// Body envelope for Mercado Pago notifications. Only the fields the
/// pipeline depends on; everything else stays in the stored raw payload.
#[derive(Debug, Default, Deserialize)]
struct WebhookBody {
    #[serde(default, rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    #[serde(default)]
    id: Option<serde_json::Value>,
}

/// Event kinds this endpoint understands, decoded once at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebhookKind {
    Payment,
    MerchantOrder,
    Unknown,
}

impl WebhookKind {
    fn from_type(event_type: &str) -> Self {
        match event_type {
            "payment" => Self::Payment,
            "merchant_order" => Self::MerchantOrder,
            _ => Self::Unknown,
        }
    }
}

/// Provider ids arrive as strings or numbers depending on the event shape.
/// Null and empty string both count as absent.
fn stringify_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::String(_) | serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Axum handler for Mercado Pago webhooks (Phase A).
pub async fn handle_mercadopago_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(secret) = state.config.mp_webhook_secret.clone() else {
        tracing::warn!("Webhook rejected: MP_WEBHOOK_SECRET not configured");
        return unauthorized("Webhook secret not configured");
    };

    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let request_id = headers.get("x-request-id").and_then(|v| v.to_str().ok());

    // The manifest id comes from the query string, falling back to the
    // body's data.id when the query key is absent.
    let body_data_id = data_id_from_body(&body);
    let data_id = query.data_id.as_deref().or(body_data_id.as_deref());

    if !verify_webhook_signature(&secret, signature, request_id, data_id) {
        tracing::warn!("Webhook rejected: invalid or missing x-signature");
        return unauthorized("Invalid signature");
    }

    // Respond 200 to Mercado Pago immediately; everything else is Phase B.
    spawn_detached("webhook-processing", async move {
        process_webhook(state, body).await;
    });

    (StatusCode::OK, Json(serde_json::json!({ "received": true })))
}

fn unauthorized(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": message })),
    )
}

fn data_id_from_body(body: &Bytes) -> Option<String> {
    let parsed: WebhookBody = serde_json::from_slice(body).ok()?;
    parsed
        .data
        .and_then(|data| data.id.as_ref().and_then(stringify_id))
}

/// Phase B entry point: ledger insert plus kind dispatch, with a catch-all
/// log. Runs detached in production; tests call it directly.
pub async fn process_webhook(state: AppState, body: Bytes) {
    if let Err(e) = ingest_event(&state, &body).await {
        tracing::error!(error = %e, "Webhook processing error");
    }
}

async fn ingest_event(state: &AppState, body: &Bytes) -> Result<()> {
    // Tolerate malformed bodies: a verified delivery we cannot read is
    // filed as ignored below, not bounced with a 4xx it will never see.
    let parsed: WebhookBody = serde_json::from_slice(body).unwrap_or_default();
    let event_type = parsed.event_type.as_deref().unwrap_or("unknown").to_string();
    let event_id = parsed
        .data
        .as_ref()
        .and_then(|data| data.id.as_ref())
        .and_then(stringify_id);
    let payload = String::from_utf8_lossy(body).into_owned();

    // Anonymous events cannot be correlated to anything; file and forget.
    let Some(event_id) = event_id else {
        let synthetic = format!("empty-{}", chrono::Utc::now().timestamp_millis());
        let conn = state.db.get()?;
        queries::record_ignored_event(
            &conn,
            MERCADOPAGO_PROVIDER,
            &synthetic,
            &event_type,
            &payload,
        )?;
        tracing::info!(event_type = %event_type, "Webhook ignored: event id empty");
        return Ok(());
    };

    let ledger_id = {
        let conn = state.db.get()?;
        queries::try_record_webhook_event(
            &conn,
            MERCADOPAGO_PROVIDER,
            &event_id,
            &event_type,
            &payload,
        )?
    };

    // Duplicate delivery: the unique constraint already absorbed it.
    let Some(ledger_id) = ledger_id else {
        tracing::info!(
            event_type = %event_type,
            event_id = %event_id,
            "Webhook already processed"
        );
        return Ok(());
    };

    tracing::info!(event_type = %event_type, event_id = %event_id, "Webhook received");

    match WebhookKind::from_type(&event_type) {
        WebhookKind::Payment => reconcile_payment(state, &event_id, &ledger_id).await?,
        WebhookKind::MerchantOrder => {
            // No order mutation yet; acknowledged so a future handler can
            // tell fresh deliveries from replays.
            let conn = state.db.get()?;
            queries::finish_webhook_event(&conn, &ledger_id, WebhookEventStatus::Processed, None)?;
            tracing::info!(event_id = %event_id, "Merchant order processed");
        }
        WebhookKind::Unknown => {
            let conn = state.db.get()?;
            queries::finish_webhook_event(&conn, &ledger_id, WebhookEventStatus::Ignored, None)?;
            tracing::info!(
                event_type = %event_type,
                event_id = %event_id,
                "Unhandled event type"
            );
        }
    }

    Ok(())
}

/// Reconcile a payment event against the orders table.
///
/// Known failure modes assign the ledger row its terminal state themselves.
/// Anything unexpected lands here and is recorded as `failed` with the
/// error text.
async fn reconcile_payment(state: &AppState, payment_id: &str, ledger_id: &str) -> Result<()> {
    match reconcile_payment_inner(state, payment_id, ledger_id).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let message = match &e {
                AppError::Upstream(inner) => inner.clone(),
                other => other.to_string(),
            };
            tracing::error!(
                payment_id = %payment_id,
                error = %message,
                "Error processing payment event"
            );
            let conn = state.db.get()?;
            queries::finish_webhook_event(
                &conn,
                ledger_id,
                WebhookEventStatus::Failed,
                Some(&message),
            )?;
            Ok(())
        }
    }
}

async fn reconcile_payment_inner(
    state: &AppState,
    payment_id: &str,
    ledger_id: &str,
) -> Result<()> {
    let Some(access_token) = state.config.mp_access_token.as_deref() else {
        tracing::error!("MP_ACCESS_TOKEN not configured");
        let conn = state.db.get()?;
        queries::finish_webhook_event(
            &conn,
            ledger_id,
            WebhookEventStatus::Failed,
            Some("MP_ACCESS_TOKEN not configured"),
        )?;
        return Ok(());
    };

    // The webhook poke is untrusted; fetch the payment for the real status.
    let client = MercadoPagoClient::new(state.http.clone(), &state.config.mp_api_base, access_token);
    let payment = client.get_payment(payment_id).await?;

    let mp_payment_id = payment.id.as_ref().map(PaymentId::as_string);
    let mp_status = payment.status.clone();

    let external_reference = payment
        .external_reference
        .as_deref()
        .map(str::trim)
        .filter(|reference| !reference.is_empty());
    let Some(external_reference) = external_reference else {
        let conn = state.db.get()?;
        queries::finish_webhook_event(
            &conn,
            ledger_id,
            WebhookEventStatus::Ignored,
            Some("external reference missing"),
        )?;
        tracing::info!(
            payment_id = %payment_id,
            "Payment ignored: external reference missing"
        );
        return Ok(());
    };

    let order = {
        let conn = state.db.get()?;
        queries::get_order_by_reference(&conn, external_reference)?
    };
    let Some(order) = order else {
        let message = format!(
            "order not found for external reference: {}",
            external_reference
        );
        tracing::warn!(
            payment_id = %payment_id,
            external_reference = %external_reference,
            "Order not found"
        );
        let conn = state.db.get()?;
        queries::finish_webhook_event(
            &conn,
            ledger_id,
            WebhookEventStatus::Failed,
            Some(&message),
        )?;
        return Ok(());
    };

    // Unknown provider statuses leave the order status alone; the raw
    // mp_status is still written below for the audit trail.
    let new_status = mp_status.as_deref().and_then(OrderStatus::from_mp_status);
    if new_status.is_none() {
        tracing::warn!(
            payment_id = %payment_id,
            mp_status = mp_status.as_deref().unwrap_or("<none>"),
            "Unknown payment status"
        );
    }

    if let Some(new_status) = new_status {
        if order.status.is_settled() && new_status != order.status {
            tracing::warn!(
                order_id = %order.id,
                from = %order.status,
                to = %new_status,
                "Order status moving off a settled state"
            );
        }
    }

    {
        let conn = state.db.get()?;
        queries::apply_payment_update(
            &conn,
            &order.id,
            mp_payment_id.as_deref(),
            mp_status.as_deref(),
            new_status,
        )?;
    }

    if new_status == Some(OrderStatus::ReadyForMontink) {
        fulfillment::queue_fulfillment(state.clone(), order.id.clone());
        email::queue_order_confirmation(state.clone(), order.clone());
    }

    {
        let conn = state.db.get()?;
        queries::finish_webhook_event(&conn, ledger_id, WebhookEventStatus::Processed, None)?;
    }

    let resulting_status = new_status.unwrap_or(order.status);
    state
        .notifier
        .publish(external_reference, &order.payer_email, resulting_status)
        .await;

    tracing::info!(
        order_id = %order.id,
        external_reference = %external_reference,
        status = %resulting_status,
        mp_status = mp_status.as_deref().unwrap_or("<none>"),
        "Order updated"
    );

    Ok(())
}
