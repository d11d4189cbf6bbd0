use axum::extract::State;
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, Result};
use crate::extractors::Json;
use crate::models::{CreateOrder, OrderStatus};
use crate::util::{mask_email, validate_email_format};

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub external_reference: String,
    pub status: OrderStatus,
}

/// Create a PENDING order from the storefront checkout payload.
///
/// The order row and its items are inserted in one transaction; the buyer
/// then pays through the MP proxy endpoints using `external_reference` to
/// tie the payment back to this order.
pub async fn create_order(
    State(state): State<AppState>,
    Json(input): Json<CreateOrder>,
) -> Result<Json<CreateOrderResponse>> {
    validate_email_format(&input.payer_email)?;
    if input.items.is_empty() {
        return Err(AppError::BadRequest(msg::EMPTY_ITEMS.into()));
    }
    if input.items.iter().any(|item| item.quantity < 1) {
        return Err(AppError::BadRequest(
            "item quantity must be at least 1".into(),
        ));
    }

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;
    let order = queries::create_order(&tx, &input)?;
    tx.commit()?;

    tracing::info!(
        order_id = %order.id,
        external_reference = %order.external_reference,
        payer = %mask_email(&order.payer_email),
        total_cents = order.total_cents,
        "Order created"
    );

    Ok(Json(CreateOrderResponse {
        order_id: order.id,
        external_reference: order.external_reference,
        status: order.status,
    }))
}
