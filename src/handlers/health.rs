use std::sync::Arc;
use axum::{extract::State, http::StatusCode, Json};
use tracing::{debug, error};

use crate::models::{ErrorResponse, HealthResponse};
use crate::AppState;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint, probes the snapshot store
pub async fn ready_check(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ErrorResponse>)> {
    debug!("Readiness check requested");
    if let Err(e) = app_state.store.ping().await {
        error!("Readiness check failed: {}", e);
        return Err(ErrorResponse::with_status(
            StatusCode::SERVICE_UNAVAILABLE,
            "Snapshot store unreachable",
        ));
    }
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        message: "Service is ready".to_string(),
    }))
}
