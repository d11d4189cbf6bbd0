use axum::extract::State;
use serde_json::Value;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::payments::MercadoPagoClient;

/// Proxy a card/PIX payment request to Mercado Pago.
///
/// The storefront never sees the access token; it sends the payment body
/// here and we attach credentials plus an idempotency key.
pub async fn create_payment(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    let client = payment_client(&state)?;
    let response = client.create_payment(&body).await?;
    Ok(Json(response))
}

/// Proxy a hosted-checkout preference request to Mercado Pago.
pub async fn create_preference(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    let client = payment_client(&state)?;
    let response = client.create_preference(&body).await?;
    Ok(Json(response))
}

fn payment_client(state: &AppState) -> Result<MercadoPagoClient> {
    let token = state
        .config
        .mp_access_token
        .as_deref()
        .ok_or_else(|| AppError::Internal("MP_ACCESS_TOKEN not configured".into()))?;
    Ok(MercadoPagoClient::new(
        state.http.clone(),
        &state.config.mp_api_base,
        token,
    ))
}
