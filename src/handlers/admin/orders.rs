use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::models::{Order, OrderStatus};
use crate::pagination::{Paginated, PaginationQuery};

#[derive(Debug, Default, Deserialize)]
pub struct OrderListFilter {
    /// Filter by order status (e.g. `READY_FOR_MONTINK`)
    #[serde(default)]
    pub status: Option<String>,
}

/// List orders newest-first, optionally filtered by status.
pub async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<OrderListFilter>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<Order>>> {
    let status = filter
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(|_| AppError::BadRequest(msg::INVALID_STATUS.into()))?;

    let conn = state.db.get()?;
    let limit = pagination.limit();
    let offset = pagination.offset();
    let (orders, total) = queries::list_orders_paginated(&conn, status, limit, offset)?;

    Ok(Json(Paginated::new(orders, total, limit, offset)))
}

/// Download an order with its items as a JSON attachment.
///
/// This is the internal shape (raw payer email, provider ids included),
/// for support escalations and manual Montink submissions.
pub async fn export_order(
    State(state): State<AppState>,
    Path(external_reference): Path<String>,
) -> Result<Response> {
    let conn = state.db.get()?;
    let order = queries::get_order_by_reference(&conn, &external_reference)?
        .or_not_found(msg::ORDER_NOT_FOUND)?;
    let items = queries::get_order_items(&conn, &order.id)?;

    let filename = format!("order-{}.json", order.external_reference);
    let body = serde_json::to_string_pretty(&serde_json::json!({
        "order": order,
        "items": items,
    }))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkMontinkRequest {
    /// Montink order id obtained out of band, if any
    #[serde(default)]
    pub montink_order_id: Option<String>,
}

/// Manually mark an order as sent to Montink.
///
/// Recovery path for orders stuck in FAILED_MONTINK after an operator
/// submitted them by hand. Accepts an empty JSON body.
pub async fn mark_montink(
    State(state): State<AppState>,
    Path(external_reference): Path<String>,
    Json(input): Json<MarkMontinkRequest>,
) -> Result<Json<Order>> {
    let conn = state.db.get()?;
    let order = queries::get_order_by_reference(&conn, &external_reference)?
        .or_not_found(msg::ORDER_NOT_FOUND)?;

    let updated = queries::set_montink_result(
        &conn,
        &order.id,
        OrderStatus::SentToMontink,
        input.montink_order_id.as_deref(),
        Some("manual"),
    )?
    .or_not_found(msg::ORDER_NOT_FOUND)?;

    tracing::info!(
        order_id = %updated.id,
        external_reference = %updated.external_reference,
        montink_order_id = ?input.montink_order_id,
        "Order manually marked as sent to Montink"
    );

    state
        .notifier
        .publish(
            &updated.external_reference,
            &updated.payer_email,
            updated.status,
        )
        .await;

    Ok(Json(updated))
}
