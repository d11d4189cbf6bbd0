use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::models::{Order, OrderItem, OrderStatus};
use crate::notifier::StatusNotifier;
use crate::util::mask_email;

#[derive(Debug, Default, Deserialize)]
pub struct OrderLookupQuery {
    #[serde(default)]
    pub email: Option<String>,
}

/// Public view of an order. The payer email only appears masked; internal
/// ids (row ids, raw provider payloads) stay out entirely.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub external_reference: String,
    pub status: OrderStatus,
    pub totals: OrderTotals,
    pub shipping: ShippingView,
    pub items: Vec<OrderItemView>,
    pub mp_payment_id: Option<String>,
    pub mp_status: Option<String>,
    pub montink_order_id: Option<String>,
    pub montink_status: Option<String>,
    pub payer_email_masked: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderTotals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct ShippingView {
    pub cep: Option<String>,
    pub address1: Option<String>,
    pub number: Option<String>,
    pub complement: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub service: Option<String>,
    pub deadline_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemView {
    pub product_id: String,
    pub name: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub size: Option<String>,
    pub color: Option<String>,
}

impl OrderResponse {
    pub fn new(order: Order, items: Vec<OrderItem>) -> Self {
        Self {
            order_id: order.id,
            external_reference: order.external_reference,
            status: order.status,
            totals: OrderTotals {
                subtotal_cents: order.subtotal_cents,
                discount_cents: order.discount_cents,
                shipping_cents: order.shipping_cents,
                total_cents: order.total_cents,
            },
            shipping: ShippingView {
                cep: order.shipping_cep,
                address1: order.shipping_address1,
                number: order.shipping_number,
                complement: order.shipping_complement,
                district: order.shipping_district,
                city: order.shipping_city,
                state: order.shipping_state,
                service: order.shipping_service,
                deadline_days: order.shipping_deadline_days,
            },
            items: items
                .into_iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    name: item.name,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                    size: item.size,
                    color: item.color,
                })
                .collect(),
            mp_payment_id: order.mp_payment_id,
            mp_status: order.mp_status,
            montink_order_id: order.montink_order_id,
            montink_status: order.montink_status,
            payer_email_masked: mask_email(&order.payer_email),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Look up an order by its public reference.
///
/// When `?email=` is present, a mismatch with the payer email answers 404
/// exactly like a missing order, so the endpoint cannot be used to probe
/// which references exist.
pub async fn get_order(
    State(state): State<AppState>,
    Path(external_reference): Path<String>,
    Query(query): Query<OrderLookupQuery>,
) -> Result<Json<OrderResponse>> {
    let conn = state.db.get()?;
    let order = queries::get_order_by_reference(&conn, &external_reference)?
        .or_not_found(msg::ORDER_NOT_FOUND)?;

    if let Some(ref email) = query.email {
        if email.trim().to_lowercase() != order.payer_email {
            return Err(AppError::NotFound(msg::ORDER_NOT_FOUND.into()));
        }
    }

    let items = queries::get_order_items(&conn, &order.id)?;
    Ok(Json(OrderResponse::new(order, items)))
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderEventsQuery {
    #[serde(default)]
    pub email: Option<String>,
}

/// SSE stream of order status changes.
///
/// Subscribes to the `<reference>:<email>` channel without checking that
/// the order exists: publishes only happen with the stored payer email, so
/// a subscriber with the wrong pair just never receives an update.
pub async fn order_events(
    State(state): State<AppState>,
    Path(external_reference): Path<String>,
    Query(query): Query<OrderEventsQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let email = query
        .email
        .ok_or_else(|| AppError::BadRequest(msg::EMAIL_REQUIRED.into()))?;

    let key = StatusNotifier::channel_key(&external_reference, &email);
    let mut rx = state.notifier.subscribe(&key).await;
    tracing::debug!(external_reference = %external_reference, "SSE subscriber connected");

    let stream = async_stream::stream! {
        yield Ok(Event::default().data(json!({"type": "connected"}).to_string()));

        loop {
            match rx.recv().await {
                Ok(status) => {
                    let frame = json!({"type": "status_update", "status": status});
                    yield Ok(Event::default().data(frame.to_string()));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        external_reference = %external_reference,
                        skipped,
                        "SSE subscriber lagged, skipping missed updates"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.sse_heartbeat_secs.into()))
            .text("heartbeat"),
    ))
}
