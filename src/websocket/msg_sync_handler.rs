use tracing::{debug, error, warn};

use crate::models::{codes, ServerEvent, SyncReplyMessage, SyncRequestMessage};
use crate::session::{SessionError, SessionRegistry};
use crate::AppState;
use super::{send_event, Connection, WsSender};

/// Handle sync-request - reply with what the client's state vector is missing.
///
/// A document the connection has not joined is served from a transient
/// session that is closed again if nobody else is using it.
pub async fn handle_sync_message(
    msg: SyncRequestMessage,
    conn: &Connection,
    app_state: &AppState,
    sender: &mut WsSender,
) -> Result<(), axum::Error> {
    let document_id = msg.document_id;
    let diff = diff_for(&app_state.registry, &document_id, &msg.state_vector).await;

    if !conn.is_joined(&document_id) {
        if let Err(e) = app_state.registry.close_session_if_empty(&document_id).await {
            warn!("Failed to close transient session {}: {}", document_id, e);
        }
    }

    match diff {
        Ok(diff) => {
            debug!("Sync reply for {} to {} ({} bytes)", document_id, conn.id, diff.len());
            send_event(sender, &ServerEvent::SyncReply(SyncReplyMessage { document_id, diff })).await
        }
        Err(SessionError::MalformedStateVector(e)) => {
            warn!("Bad state vector for {} from {}: {}", document_id, conn.id, e);
            send_event(sender, &ServerEvent::error(codes::MALFORMED_STATE_VECTOR, e)).await
        }
        Err(e) => {
            error!("Failed to compute sync for {}: {}", document_id, e);
            let event = ServerEvent::error(codes::SYNC_FAILED, format!("Could not sync '{}'", document_id));
            send_event(sender, &event).await
        }
    }
}

async fn diff_for(registry: &SessionRegistry, document_id: &str, state_vector: &[u8]) -> Result<Vec<u8>, SessionError> {
    loop {
        let session = registry.get_session(document_id).await?;
        match session.diff(state_vector).await {
            // Evicted between lookup and read; the next lookup reloads it
            Err(SessionError::Closed(_)) => continue,
            other => return other,
        }
    }
}
