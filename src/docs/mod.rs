use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Snapshot store reachable", body = HealthResponse),
        (status = 503, description = "Snapshot store unreachable", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Service diagnostics (admin only)
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Current diagnostics", body = DiagnosticsResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Delete a document's persisted state (admin only)
#[utoipa::path(
    delete,
    path = "/api/v1/documents/{document_id}",
    params(
        ("document_id" = String, Path, description = "Document identifier")
    ),
    responses(
        (status = 200, description = "Document deleted", body = DocumentDeleteResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse),
        (status = 409, description = "Participants are still connected", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn doc_delete_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        doc_delete_doc,
    ),
    components(
        schemas(HealthResponse, ErrorResponse, DiagnosticsResponse, DocumentDeleteResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
