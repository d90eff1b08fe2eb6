use tracing::{debug, error, info, warn};

use crate::models::{LeaveSessionMessage, ServerEvent, UserLeftMessage};
use crate::AppState;
use super::Connection;

/// Handle leave-session
pub async fn handle_leave_message(msg: LeaveSessionMessage, conn: &mut Connection, app_state: &AppState) {
    if !conn.is_joined(&msg.document_id) {
        debug!("Connection {} asked to leave {} without being in it", conn.id, msg.document_id);
        return;
    }
    if let Err(e) = app_state.presence.untrack_socket(&conn.id).await {
        warn!("Failed to untrack connection {}: {}", conn.id, e);
    }
    leave_document(conn, app_state).await;
}

/// Take the connection out of its document.
///
/// Unsubscribes from the room, drops presence and the participant entry
/// owned by this connection, tells the room, and closes the session if it
/// became empty.
pub async fn leave_document(conn: &mut Connection, app_state: &AppState) {
    let Some(joined) = conn.joined.take() else {
        return;
    };
    let document_id = joined.document_id;
    app_state.fanout.unsubscribe(&document_id, joined.room).await;

    if let Err(e) = app_state
        .presence
        .remove_user_presence(&document_id, &conn.user.user_id, Some(&conn.id))
        .await
    {
        warn!("Failed to remove presence of {} in {}: {}", conn.user.user_id, document_id, e);
    }

    match app_state.registry.leave(&document_id, &conn.user.user_id, &conn.id).await {
        Ok(true) => {
            info!("User {} left document {}", conn.user.user_id, document_id);
            let left = ServerEvent::UserLeft(UserLeftMessage {
                document_id: document_id.clone(),
                user_id: conn.user.user_id.clone(),
            });
            app_state.fanout.publish(&document_id, &conn.id, &left).await;
        }
        Ok(false) => debug!(
            "User {} in {} is held by another connection, nothing to leave",
            conn.user.user_id, document_id
        ),
        Err(e) => error!("Failed to leave {} for {}: {}", document_id, conn.user.user_id, e),
    }

    if let Err(e) = app_state.registry.close_session_if_empty(&document_id).await {
        error!("Failed to close session {}: {}", document_id, e);
    }
}

/// Connection teardown; runs once when the socket ends
pub async fn disconnect(mut conn: Connection, app_state: &AppState) {
    match app_state.presence.untrack_socket(&conn.id).await {
        Ok(Some(entry)) => debug!(
            "Connection {} of {} was tracked in {}",
            conn.id, entry.user_id, entry.document_id
        ),
        Ok(None) => debug!("Connection {} had no live tracking entry", conn.id),
        Err(e) => warn!("Failed to untrack connection {}: {}", conn.id, e),
    }
    leave_document(&mut conn, app_state).await;
    info!("Connection {} of {} closed", conn.id, conn.user.user_id);
}
