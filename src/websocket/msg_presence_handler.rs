use tracing::{debug, warn};

use crate::models::{codes, PresenceBroadcastMessage, PresenceUpdateMessage, ServerEvent};
use crate::AppState;
use super::{send_event, Connection, WsSender};

/// Handle presence-update - ephemeral, never merged into the document
pub async fn handle_presence_message(
    msg: PresenceUpdateMessage,
    conn: &mut Connection,
    app_state: &AppState,
    sender: &mut WsSender,
) -> Result<(), axum::Error> {
    let Some(joined) = conn.joined.as_mut().filter(|j| j.document_id == msg.document_id) else {
        let event = ServerEvent::error(codes::NOT_JOINED, format!("Join '{}' before sending presence", msg.document_id));
        return send_event(sender, &event).await;
    };

    match app_state
        .registry
        .update_presence(&msg.document_id, &conn.user.user_id, &conn.id, msg.presence_state.clone())
        .await
    {
        Ok(Some(_)) => {}
        Ok(None) => debug!("Presence from {} for {} has no session entry", conn.id, msg.document_id),
        Err(e) => warn!("Failed to store presence on session {}: {}", msg.document_id, e),
    }
    joined.participant.presence_state = msg.presence_state.clone();
    if let Err(e) = app_state
        .presence
        .set_user_presence(&msg.document_id, &joined.participant)
        .await
    {
        warn!("Failed to record presence of {} in {}: {}", conn.user.user_id, msg.document_id, e);
    }

    let event = ServerEvent::PresenceUpdate(PresenceBroadcastMessage {
        document_id: msg.document_id.clone(),
        user_id: conn.user.user_id.clone(),
        presence_state: msg.presence_state,
    });
    app_state.fanout.publish(&msg.document_id, &conn.id, &event).await;
    Ok(())
}
