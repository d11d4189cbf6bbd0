pub mod mercadopago;

pub use mercadopago::{handle_mercadopago_webhook, process_webhook};

use axum::{routing::post, Router};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/mp/webhooks", post(handle_mercadopago_webhook))
}
