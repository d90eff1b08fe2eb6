use tracing::{error, info, warn};

use crate::models::{codes, JoinSessionMessage, Participant, ServerEvent, SessionJoinedMessage, UserJoinedMessage};
use crate::AppState;
use super::msg_leave_handler::leave_document;
use super::{send_event, Connection, JoinedDocument, WsSender};

/// Handle join-session
///
/// A connection is in at most one document, so joining another one leaves
/// the current document first. The room subscription is taken before the
/// snapshot so no update applied after it can be missed.
pub async fn handle_join_message(
    msg: JoinSessionMessage,
    conn: &mut Connection,
    app_state: &AppState,
    sender: &mut WsSender,
) -> Result<(), axum::Error> {
    let document_id = msg.document_id;
    if document_id.is_empty() {
        return send_event(sender, &ServerEvent::error(codes::MALFORMED_MESSAGE, "documentId is required")).await;
    }
    info!("User {} joining document {} via {}", conn.user.user_id, document_id, conn.id);

    if conn.joined.as_ref().is_some_and(|j| j.document_id != document_id) {
        leave_document(conn, app_state).await;
    }
    let room = match conn.joined.take() {
        Some(rejoined) => rejoined.room,
        None => app_state.fanout.subscribe(&document_id).await,
    };

    let participant = Participant::new(conn.user.user_id.clone(), conn.id.clone());
    let outcome = match app_state.registry.join(&document_id, participant.clone()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Failed to join {} for {}: {}", document_id, conn.user.user_id, e);
            app_state.fanout.unsubscribe(&document_id, room).await;
            let event = ServerEvent::error(codes::JOIN_FAILED, format!("Could not open document '{}'", document_id));
            return send_event(sender, &event).await;
        }
    };

    if let Err(e) = app_state
        .presence
        .track_socket(&conn.id, &conn.user.user_id, &document_id)
        .await
    {
        warn!("Failed to track connection {}: {}", conn.id, e);
    }
    if let Err(e) = app_state.presence.set_user_presence(&document_id, &participant).await {
        warn!("Failed to record presence of {} in {}: {}", conn.user.user_id, document_id, e);
    }
    let participants = match app_state.presence.get_present_users(&document_id).await {
        Ok(present) => present,
        Err(e) => {
            warn!("Presence unavailable for {}, answering from the session: {}", document_id, e);
            outcome.participants
        }
    };

    conn.joined = Some(JoinedDocument {
        document_id: document_id.clone(),
        participant: participant.clone(),
        room,
    });

    let joined = ServerEvent::SessionJoined(SessionJoinedMessage {
        document_id: document_id.clone(),
        document_state: outcome.snapshot,
        state_vector: outcome.state_vector,
        participants,
    });
    send_event(sender, &joined).await?;

    let announce = ServerEvent::UserJoined(UserJoinedMessage {
        document_id: document_id.clone(),
        user_id: participant.user_id,
        connection_id: participant.connection_id,
        presence_state: participant.presence_state,
    });
    app_state.fanout.publish(&document_id, &conn.id, &announce).await;
    Ok(())
}
