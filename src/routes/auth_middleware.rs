use std::sync::Arc;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use tracing::warn;

use crate::models::{codes, ErrorResponse};
use crate::services::auth_service::get_auth_token;
use crate::AppState;

/// Verify the bearer token and hand the caller's identity to the handlers
pub async fn auth_middleware(
    State(app_state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    // 1. Get the auth token from the request
    let token = get_auth_token(&req).map_err(|e| {
        warn!("Request to {} without usable token: {}", req.uri().path(), e);
        ErrorResponse::with_status(StatusCode::UNAUTHORIZED, format!("{}: {}", codes::AUTH_FAILED, e))
    })?;

    // 2. Validate it
    let identity = app_state.auth.verify_token(&token).map_err(|e| {
        warn!("JWT validation failed: {}", e);
        ErrorResponse::with_status(StatusCode::UNAUTHORIZED, format!("{}: {}", codes::AUTH_FAILED, e))
    })?;

    // 3. Set the identity into request extensions for downstream handlers
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
