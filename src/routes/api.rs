use std::sync::Arc;
use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use crate::handlers::{diagnostics, doc_delete, health_check, ready_check};
use crate::routes::auth_middleware::auth_middleware;
use crate::AppState;

/// Create API routes
pub fn create_api_routes(app_state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/documents/:document_id", delete(doc_delete))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), auth_middleware)); // Applies to all routes added above

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .merge(admin_routes)
        .with_state(app_state)
}
