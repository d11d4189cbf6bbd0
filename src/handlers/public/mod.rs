mod checkout;
mod orders;
mod payments;

pub use checkout::*;
pub use orders::*;
pub use payments::*;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::config::RateLimits;
use crate::db::AppState;
use crate::rate_limit;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(limits: RateLimits) -> Router<AppState> {
    let relaxed = Router::new()
        .route("/health", get(health))
        .route_layer(rate_limit::relaxed_layer(limits.relaxed_rpm));

    let standard = Router::new()
        .route("/api/checkout/create-order", post(create_order))
        .route("/api/orders/{external_reference}", get(get_order))
        .route("/api/orders/{external_reference}/events", get(order_events))
        .route_layer(rate_limit::standard_layer(limits.standard_rpm));

    // MP proxies hit the provider API on every request
    let strict = Router::new()
        .route("/api/mp/create-payment", post(create_payment))
        .route("/api/mp/create-preference", post(create_preference))
        .route_layer(rate_limit::strict_layer(limits.strict_rpm));

    relaxed.merge(standard).merge(strict)
}
