mod orders;

pub use orders::*;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::config::RateLimits;
use crate::db::AppState;
use crate::middleware::admin_auth;
use crate::rate_limit;

pub fn router(state: AppState, limits: RateLimits) -> Router<AppState> {
    Router::new()
        .route("/api/admin/orders", get(list_orders))
        .route(
            "/api/admin/orders/{external_reference}/export",
            get(export_order),
        )
        .route(
            "/api/orders/{external_reference}/mark-montink",
            post(mark_montink),
        )
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .route_layer(rate_limit::standard_layer(limits.standard_rpm))
}
