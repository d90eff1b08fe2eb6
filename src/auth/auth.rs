use axum::{http::StatusCode, Json};

use crate::models::ErrorResponse;
use crate::services::auth_service::CallerIdentity;

pub fn has_role(identity: &CallerIdentity, role: &str) -> bool {
    identity.roles.iter().any(|r| r == role)
}

pub fn ensure_admin(identity: &CallerIdentity, admin_role: &str) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if has_role(identity, admin_role) {
        return Ok(());
    }
    Err(ErrorResponse::with_status(StatusCode::FORBIDDEN, "Cloud Admin access required"))
}
