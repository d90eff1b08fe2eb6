use tracing::{debug, error, warn};

use crate::models::{codes, DocumentUpdateMessage, ServerEvent};
use crate::session::SessionError;
use crate::AppState;
use super::{send_event, Connection, WsSender};

/// Handle document-update - merge into the session, then rebroadcast to the room
pub async fn handle_update_message(
    msg: DocumentUpdateMessage,
    conn: &Connection,
    app_state: &AppState,
    sender: &mut WsSender,
) -> Result<(), axum::Error> {
    if !conn.is_joined(&msg.document_id) {
        let event = ServerEvent::error(codes::NOT_JOINED, format!("Join '{}' before sending updates", msg.document_id));
        return send_event(sender, &event).await;
    }
    debug!(
        "Update for document {} from {} ({} bytes)",
        msg.document_id,
        conn.id,
        msg.update.len()
    );

    match app_state.registry.apply_update(&msg.document_id, &msg.update, &conn.id).await {
        Ok(()) => {
            let document_id = msg.document_id.clone();
            app_state
                .fanout
                .publish(&document_id, &conn.id, &ServerEvent::DocumentUpdate(msg))
                .await;
            Ok(())
        }
        Err(SessionError::MalformedUpdate(e)) => {
            warn!("Rejected update for {} from {}: {}", msg.document_id, conn.id, e);
            send_event(sender, &ServerEvent::error(codes::MALFORMED_UPDATE, e)).await
        }
        Err(e) => {
            error!("Failed to apply update for {}: {}", msg.document_id, e);
            let event = ServerEvent::error(codes::UPDATE_FAILED, format!("Update to '{}' was not applied", msg.document_id));
            send_event(sender, &event).await
        }
    }
}
