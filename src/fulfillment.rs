//! Montink fulfillment dispatch.
//!
//! When reconciliation lands an order on READY_FOR_MONTINK, a detached task
//! posts it to the Montink production API and records the outcome on the
//! order row. The webhook path never waits on this.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{Order, OrderItem, OrderStatus};
use crate::util::spawn_detached;

/// Retry delays in seconds for transient Montink failures.
const RETRY_DELAYS: &[u64] = &[2, 8];

/// Per-request budget for Montink calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Queue fulfillment for an order without blocking the caller.
///
/// Panics in the detached task are caught and logged, never propagated to
/// the webhook path that queued the work.
pub fn queue_fulfillment(state: AppState, order_id: String) {
    spawn_detached("fulfillment", async move {
        if let Err(e) = process_fulfillment(&state, &order_id).await {
            tracing::error!(order_id = %order_id, error = %e, "Fulfillment dispatch failed");
        }
    });
}

/// Drive one fulfillment attempt end to end.
///
/// Reloads the order first and dispatches only from READY_FOR_MONTINK, so a
/// duplicate queue or a manual override in between becomes a no-op instead
/// of a second production order.
pub async fn process_fulfillment(state: &AppState, order_id: &str) -> Result<()> {
    let (order, items) = {
        let conn = state.db.get()?;
        let Some(order) = queries::get_order(&conn, order_id)? else {
            tracing::warn!(order_id = %order_id, "Fulfillment queued for unknown order");
            return Ok(());
        };
        let items = queries::get_order_items(&conn, order_id)?;
        (order, items)
    };

    if order.status != OrderStatus::ReadyForMontink {
        tracing::info!(
            order_id = %order.id,
            status = %order.status,
            "Order not ready for fulfillment, skipping"
        );
        return Ok(());
    }

    let Some(api_key) = state.config.montink_api_key.as_deref() else {
        tracing::error!(order_id = %order.id, "Montink API key not configured");
        record_failure(state, &order).await?;
        return Ok(());
    };

    let client = MontinkClient::new(
        state.http.clone(),
        &state.config.montink_api_base,
        api_key,
    );
    match client.create_order(&order, &items).await {
        Ok(response) => {
            {
                let conn = state.db.get()?;
                queries::set_montink_result(
                    &conn,
                    &order.id,
                    OrderStatus::SentToMontink,
                    Some(&response.id),
                    response.status.as_deref(),
                )?;
            }
            tracing::info!(
                order_id = %order.id,
                montink_order_id = %response.id,
                "Order dispatched to Montink"
            );
            state
                .notifier
                .publish(
                    &order.external_reference,
                    &order.payer_email,
                    OrderStatus::SentToMontink,
                )
                .await;
        }
        Err(e) => {
            tracing::error!(order_id = %order.id, error = %e, "Montink dispatch failed");
            record_failure(state, &order).await?;
        }
    }
    Ok(())
}

async fn record_failure(state: &AppState, order: &Order) -> Result<()> {
    {
        let conn = state.db.get()?;
        queries::set_montink_result(&conn, &order.id, OrderStatus::FailedMontink, None, None)?;
    }
    state
        .notifier
        .publish(
            &order.external_reference,
            &order.payer_email,
            OrderStatus::FailedMontink,
        )
        .await;
    Ok(())
}

/// Montink's acknowledgement of a created production order.
#[derive(Debug, Deserialize)]
pub struct MontinkOrderResponse {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
struct MontinkOrderPayload<'a> {
    external_reference: &'a str,
    customer: MontinkCustomer<'a>,
    shipping: MontinkShipping<'a>,
    items: Vec<MontinkItem<'a>>,
}

#[derive(Debug, Serialize)]
struct MontinkCustomer<'a> {
    name: Option<&'a str>,
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct MontinkShipping<'a> {
    cep: Option<&'a str>,
    address1: Option<&'a str>,
    number: Option<&'a str>,
    complement: Option<&'a str>,
    district: Option<&'a str>,
    city: Option<&'a str>,
    state: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct MontinkItem<'a> {
    product_id: &'a str,
    quantity: i64,
    size: Option<&'a str>,
    color: Option<&'a str>,
}

impl<'a> MontinkOrderPayload<'a> {
    fn from_order(order: &'a Order, items: &'a [OrderItem]) -> Self {
        Self {
            external_reference: &order.external_reference,
            customer: MontinkCustomer {
                name: order.payer_name.as_deref(),
                email: &order.payer_email,
            },
            shipping: MontinkShipping {
                cep: order.shipping_cep.as_deref(),
                address1: order.shipping_address1.as_deref(),
                number: order.shipping_number.as_deref(),
                complement: order.shipping_complement.as_deref(),
                district: order.shipping_district.as_deref(),
                city: order.shipping_city.as_deref(),
                state: order.shipping_state.as_deref(),
            },
            items: items
                .iter()
                .map(|item| MontinkItem {
                    product_id: &item.product_id,
                    quantity: item.quantity,
                    size: item.size.as_deref(),
                    color: item.color.as_deref(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MontinkClient {
    client: Client,
    api_base: String,
    api_key: String,
}

impl MontinkClient {
    pub fn new(client: Client, api_base: &str, api_key: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Create a production order. Transient failures (network, 5xx, 429)
    /// are retried; a 4xx from Montink is final and surfaces immediately.
    pub async fn create_order(
        &self,
        order: &Order,
        items: &[OrderItem],
    ) -> Result<MontinkOrderResponse> {
        let payload = MontinkOrderPayload::from_order(order, items);
        let mut last_error: Option<AppError> = None;

        for (attempt, delay_secs) in std::iter::once(&0u64).chain(RETRY_DELAYS).enumerate() {
            if *delay_secs > 0 {
                tracing::warn!(
                    attempt,
                    delay_secs,
                    order_id = %order.id,
                    "Retrying Montink dispatch after transient failure"
                );
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self.send_order_request(&payload).await {
                Ok(response) => return Ok(response),
                Err((error, is_transient)) => {
                    if is_transient {
                        last_error = Some(error);
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::Upstream("montink dispatch failed: all retries exhausted".into())
        }))
    }

    /// Send a single order creation request.
    ///
    /// Returns Ok(response) on success, or Err((AppError, is_transient)) on failure.
    async fn send_order_request(
        &self,
        payload: &MontinkOrderPayload<'_>,
    ) -> std::result::Result<MontinkOrderResponse, (AppError, bool)> {
        let response = self
            .client
            .post(format!("{}/orders", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                // Network errors are transient
                (
                    AppError::Upstream(format!("montink request failed: {}", e)),
                    true,
                )
            })?;

        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(|e| {
                (
                    AppError::Upstream(format!("failed to parse montink response: {}", e)),
                    false,
                )
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            let is_transient = status.as_u16() == 429 || status.is_server_error();

            if is_transient {
                tracing::warn!(status = %status, body = %body, "Montink returned transient error");
            } else {
                tracing::error!(status = %status, body = %body, "Montink rejected order");
            }

            Err((
                AppError::Upstream(format!("montink returned {}: {}", status.as_u16(), body)),
                is_transient,
            ))
        }
    }
}
