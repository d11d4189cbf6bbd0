use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::AppState;

/// Header carrying the operator token for admin endpoints.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Require the admin token on every request.
///
/// Fails closed: when ADMIN_TOKEN is not configured the whole admin
/// surface answers 401 rather than opening up.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        tracing::warn!("Admin endpoint hit but ADMIN_TOKEN is not configured");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let provided = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !tokens_match(provided, expected) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

/// Compare the provided token against the configured one in constant time.
/// Length check is not constant-time, but that's fine - token length is not secret.
fn tokens_match(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.len() != expected.len() {
        return false;
    }

    provided.ct_eq(expected).into()
}
