pub mod api;
pub mod auth_middleware;

use std::sync::Arc;
use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::docs::ApiDoc;
use crate::websocket::websocket_handler;
use crate::AppState;
use api::create_api_routes;

/// Assemble the WebSocket endpoint, the API and the docs
pub fn create_app(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config);
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(app_state.clone())
        // Mount API routes
        .nest("/api", create_api_routes(app_state))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let Some(origins) = &config.cors_origins else {
        return if config.is_development() {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        };
    };
    let origins: Vec<HeaderValue> = origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemorySnapshotStore;
    use crate::services::auth_service::tests::{mint, SECRET};
    use axum::{body::Body, http::{Request, StatusCode}};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AppState>) {
        let config = Config {
            jwt_secret: Some(SECRET.to_string()),
            ..Config::default()
        };
        let app_state = AppState::new(config, Arc::new(MemorySnapshotStore::new())).unwrap();
        (create_app(app_state.clone()), app_state)
    }

    fn request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_and_readiness_are_public() {
        let (app, _) = app();
        let resp = app.clone().oneshot(request(Method::GET, "/api/health", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.oneshot(request(Method::GET, "/api/ready", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn diagnostics_require_the_admin_role() {
        let (app, _) = app();
        let resp = app.clone().oneshot(request(Method::GET, "/api/v1/diagnostics", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let editor = mint(SECRET, "user-1", &["editor"], 3600);
        let resp = app
            .clone()
            .oneshot(request(Method::GET, "/api/v1/diagnostics", Some(&editor)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let admin = mint(SECRET, "admin-1", &["Colabri-CloudAdmin"], 3600);
        let resp = app
            .oneshot(request(Method::GET, "/api/v1/diagnostics", Some(&admin)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn deleting_a_document_in_use_conflicts() {
        let (app, app_state) = app();
        app_state
            .registry
            .join("doc1", crate::models::Participant::new("user-1", "conn-1"))
            .await
            .unwrap();
        let admin = mint(SECRET, "admin-1", &["Colabri-CloudAdmin"], 3600);

        let resp = app
            .clone()
            .oneshot(request(Method::DELETE, "/api/v1/documents/doc1", Some(&admin)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        app_state.registry.leave("doc1", "user-1", "conn-1").await.unwrap();
        let resp = app
            .oneshot(request(Method::DELETE, "/api/v1/documents/doc1", Some(&admin)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
