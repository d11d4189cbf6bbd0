//! Transactional email for order lifecycle events.
//!
//! Sends via the Resend API when a key is configured; otherwise logs and
//! skips, so checkout and reconciliation never depend on email delivery.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{Order, OrderItem};
use crate::util::spawn_detached;

/// Queue the confirmation email for an order without blocking the caller.
///
/// Item rows are loaded inside the task; a database hiccup here costs only
/// the email, never the reconciliation that queued it.
pub fn queue_order_confirmation(state: AppState, order: Order) {
    spawn_detached("order-email", async move {
        let items = {
            let conn = match state.db.get() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(
                        order_id = %order.id,
                        error = %e,
                        "Confirmation email skipped: no database connection"
                    );
                    return;
                }
            };
            match queries::get_order_items(&conn, &order.id) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(
                        order_id = %order.id,
                        error = %e,
                        "Confirmation email skipped: failed to load items"
                    );
                    return;
                }
            }
        };

        if let Err(e) = state.email.send_order_confirmation(&order, &items).await {
            tracing::warn!(order_id = %order.id, error = %e, "Order confirmation email failed");
        }
    });
}

/// Retry delays in seconds (exponential backoff: 1s, 4s, 16s)
const RETRY_DELAYS: &[u64] = &[1, 4, 16];

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Format integer cents as Brazilian reais, e.g. `R$ 129,90`.
fn format_brl(cents: i64) -> String {
    format!("R$ {},{:02}", cents / 100, (cents % 100).abs())
}

/// Result of attempting to send an order email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSendResult {
    /// Email was sent successfully via Resend
    Sent,
    /// No API key configured; the email was skipped, not failed
    NoApiKey,
}

/// Resend API request body.
#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    text: String,
    html: String,
}

/// Resend API response.
#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    #[allow(dead_code)]
    id: String,
}

/// Email service using the Resend API.
#[derive(Clone)]
pub struct EmailService {
    /// Resend API key (from ENV); None disables sending entirely
    api_key: Option<String>,
    /// "from" address for all outgoing mail
    from_email: String,
    /// HTTP client for API calls
    http_client: Client,
}

impl EmailService {
    pub fn new(api_key: Option<String>, from_email: String) -> Self {
        Self {
            api_key,
            from_email,
            http_client: Client::new(),
        }
    }

    /// Send the order confirmation email after a payment is approved.
    ///
    /// Skips quietly when no API key is configured: fulfillment must not
    /// stall because the store has email turned off.
    pub async fn send_order_confirmation(
        &self,
        order: &Order,
        items: &[OrderItem],
    ) -> Result<EmailSendResult> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!(
                order_id = %order.id,
                "No Resend API key configured, skipping order confirmation email"
            );
            return Ok(EmailSendResult::NoApiKey);
        };

        let subject = format!("Your Bravos order {} is confirmed", order.external_reference);

        let greeting = order.payer_name.as_deref().unwrap_or("there");
        let mut text = format!(
            "Hi {},\n\nPayment for order {} was approved and production is starting. Your items:\n\n",
            greeting, order.external_reference
        );
        let mut item_rows = String::new();
        for item in items {
            let label = item.name.as_deref().unwrap_or(&item.product_id);
            let variant = match (item.size.as_deref(), item.color.as_deref()) {
                (Some(size), Some(color)) => format!(" ({}, {})", size, color),
                (Some(size), None) => format!(" ({})", size),
                (None, Some(color)) => format!(" ({})", color),
                (None, None) => String::new(),
            };
            let line_total = format_brl(item.unit_price_cents * item.quantity);
            text.push_str(&format!(
                "{}x {}{} - {}\n",
                item.quantity, label, variant, line_total
            ));
            item_rows.push_str(&format!(
                "<li><strong>{}x {}</strong>{} &mdash; {}</li>\n",
                item.quantity, label, variant, line_total
            ));
        }

        text.push_str(&format!("\nSubtotal: {}\n", format_brl(order.subtotal_cents)));
        if order.discount_cents > 0 {
            let coupon = order
                .coupon_code
                .as_deref()
                .map(|c| format!(" ({})", c))
                .unwrap_or_default();
            text.push_str(&format!(
                "Discount{}: -{}\n",
                coupon,
                format_brl(order.discount_cents)
            ));
        }
        text.push_str(&format!("Shipping: {}\n", format_brl(order.shipping_cents)));
        text.push_str(&format!("Total: {}\n", format_brl(order.total_cents)));

        if let (Some(address), Some(city)) = (&order.shipping_address1, &order.shipping_city) {
            let number = order.shipping_number.as_deref().unwrap_or("s/n");
            let state = order.shipping_state.as_deref().unwrap_or("");
            text.push_str(&format!(
                "\nShipping to: {}, {} - {} {}\n",
                address, number, city, state
            ));
        }
        if let Some(deadline) = order.shipping_deadline_days {
            text.push_str(&format!(
                "Estimated delivery: {} business days after production.\n",
                deadline
            ));
        }
        text.push_str(
            "\nYou can follow your order anytime with the reference above.\n\nBravos\n",
        );

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">Order {} confirmed</h2>
<p>Hi {}, your payment was approved and production is starting.</p>
<ul style="padding-left: 20px;">
{}</ul>
<p style="color: #666;">Subtotal: {}<br>Shipping: {}<br><strong>Total: {}</strong></p>
<hr style="border: none; border-top: 1px solid #eee; margin: 30px 0;">
<p style="color: #999; font-size: 12px;">Keep the reference {} to follow your order.</p>
</body>
</html>"#,
            order.external_reference,
            greeting,
            item_rows,
            format_brl(order.subtotal_cents),
            format_brl(order.shipping_cents),
            format_brl(order.total_cents),
            order.external_reference
        );

        let request = ResendEmailRequest {
            from: &self.from_email,
            to: vec![&order.payer_email],
            subject,
            text,
            html,
        };

        self.send_request_with_retry(api_key, &request, &order.payer_email, &order.id)
            .await
    }

    /// Send a request to Resend API with exponential backoff retry.
    ///
    /// Retries on transient errors (network issues, 5xx, 429 rate limit).
    /// Fails immediately on non-transient errors (4xx except 429).
    async fn send_request_with_retry(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
        to_email: &str,
        order_id: &str,
    ) -> Result<EmailSendResult> {
        let mut last_error: Option<AppError> = None;

        for (attempt, delay_secs) in std::iter::once(&0u64).chain(RETRY_DELAYS).enumerate() {
            // Sleep before retry (skip on first attempt)
            if *delay_secs > 0 {
                tracing::warn!(
                    attempt,
                    delay_secs,
                    "Retrying email send after transient failure"
                );
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self.send_resend_request(api_key, request).await {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::info!(
                            attempt,
                            to = %to_email,
                            order_id = %order_id,
                            "Email sent successfully after retry"
                        );
                    } else {
                        tracing::info!(
                            to = %to_email,
                            order_id = %order_id,
                            "Order confirmation email sent via Resend"
                        );
                    }
                    return Ok(EmailSendResult::Sent);
                }
                Err((error, is_transient)) => {
                    if is_transient {
                        last_error = Some(error);
                        // Continue to next retry
                    } else {
                        // Non-transient error, fail immediately
                        return Err(error);
                    }
                }
            }
        }

        // All retries exhausted
        tracing::error!(
            to = %to_email,
            order_id = %order_id,
            attempts = RETRY_DELAYS.len() + 1,
            "Email send failed after all retries"
        );
        Err(last_error.unwrap_or_else(|| {
            AppError::Internal("Email service error: all retries exhausted".into())
        }))
    }

    /// Send a single request to Resend API.
    ///
    /// Returns Ok(()) on success, or Err((AppError, is_transient)) on failure.
    async fn send_resend_request(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
    ) -> std::result::Result<(), (AppError, bool)> {
        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to send request to Resend API");
                // Network errors are transient
                (
                    AppError::Internal(format!("Email service error: {}", e)),
                    true,
                )
            })?;

        let status = response.status();

        if status.is_success() {
            let _result: ResendEmailResponse = response.json().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to parse Resend API response");
                // Parse errors after success are weird but not transient
                (
                    AppError::Internal("Email service response error".into()),
                    false,
                )
            })?;
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();

            // Determine if error is transient (should retry)
            let is_transient = status.as_u16() == 429 // Rate limited
                || status.is_server_error(); // 5xx errors

            if is_transient {
                tracing::warn!(
                    status = %status,
                    body = %body,
                    "Resend API returned transient error"
                );
            } else {
                tracing::error!(
                    status = %status,
                    body = %body,
                    "Resend API returned non-transient error"
                );
            }

            Err((
                AppError::Internal(format!("Email service error: {} - {}", status, body)),
                is_transient,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_cents_as_reais() {
        assert_eq!(format_brl(12990), "R$ 129,90");
        assert_eq!(format_brl(100), "R$ 1,00");
        assert_eq!(format_brl(5), "R$ 0,05");
        assert_eq!(format_brl(0), "R$ 0,00");
    }

    #[test]
    fn test_retry_delays_configuration() {
        // Verify retry configuration is sensible
        assert_eq!(RETRY_DELAYS.len(), 3, "Should have 3 retry attempts");
        assert_eq!(RETRY_DELAYS, &[1, 4, 16], "Exponential backoff: 1s, 4s, 16s");

        // Total max wait time should be reasonable (21 seconds)
        let total_delay: u64 = RETRY_DELAYS.iter().sum();
        assert_eq!(total_delay, 21);
    }
}
