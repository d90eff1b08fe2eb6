use std::sync::Arc;
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

use crate::auth::auth;
use crate::models::{DocumentDeleteResponse, ErrorResponse};
use crate::services::auth_service::CallerIdentity;
use crate::session::SessionError;
use crate::AppState;

/// Delete a document's durable state. Refused while anyone is connected to it.
pub async fn doc_delete(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<CallerIdentity>,
    Path(document_id): Path<String>,
) -> Result<(StatusCode, Json<DocumentDeleteResponse>), (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_admin(&identity, &app_state.config.admin_role)?;

    match app_state.registry.delete_document(&document_id).await {
        Ok(()) => {
            info!("Document '{}' deleted by {}", document_id, identity.user_id);
            Ok((StatusCode::OK, Json(DocumentDeleteResponse { success: true })))
        }
        Err(SessionError::InUse(_)) => Err(ErrorResponse::with_status(
            StatusCode::CONFLICT,
            format!("Document '{}' has connected participants", document_id),
        )),
        Err(e) => {
            error!("Failed to delete document '{}': {}", document_id, e);
            Err(ErrorResponse::with_status(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to delete document '{}'", document_id),
            ))
        }
    }
}
