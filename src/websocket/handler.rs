use std::sync::atomic::Ordering;
use std::sync::Arc;
use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::models::{codes, ClientEvent, ErrorResponse, ServerEvent};
use crate::services::auth_service::{get_auth_token_from_parts, CallerIdentity};
use crate::AppState;
use super::fanout::BroadcastMessage;
use super::msg_join_handler::handle_join_message;
use super::msg_leave_handler::{disconnect, handle_leave_message};
use super::msg_ping_handler::handle_ping_message;
use super::msg_presence_handler::handle_presence_message;
use super::msg_sync_handler::handle_sync_message;
use super::msg_update_handler::handle_update_message;
use super::{send_event, Connection, JoinedDocument, WsSender};

/// WebSocket handler. The caller is authenticated before the upgrade.
pub async fn websocket_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match get_auth_token_from_parts(&headers, &uri).and_then(|token| app_state.auth.verify_token(&token)) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejected WebSocket connection: {}", e);
            return ErrorResponse::with_status(StatusCode::UNAUTHORIZED, format!("{}: {}", codes::AUTH_FAILED, e))
                .into_response();
        }
    };
    info!(
        "New WebSocket connection for user {} ({})",
        identity.user_id,
        identity.name.as_deref().unwrap_or("unnamed")
    );
    ws.on_upgrade(move |socket| handle_socket(socket, identity, app_state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, user: CallerIdentity, app_state: Arc<AppState>) {
    let mut conn = Connection::new(user);
    app_state.connections.fetch_add(1, Ordering::Relaxed);
    info!("WebSocket connection established for {} with connection_id: {}", conn.user.user_id, conn.id);

    let (mut sender, mut receiver) = socket.split();
    let mut heartbeat = tokio::time::interval(app_state.config.heartbeat_interval());
    heartbeat.tick().await;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by the socket itself
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("WebSocket error on {}: {}", conn.id, e);
                        break;
                    }
                };
                if dispatch(&text, &mut conn, &app_state, &mut sender).await.is_err() {
                    break;
                }
            }
            broadcast = next_room_message(&mut conn.joined) => {
                match broadcast {
                    // Skip messages from this connection to prevent echo
                    Ok(msg) if msg.sender_id == conn.id => {}
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.content)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Connection {} fell {} messages behind its room", conn.id, missed);
                        let event = ServerEvent::error(
                            codes::RESYNC_REQUIRED,
                            format!("{} messages were dropped, send a sync-request", missed),
                        );
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        error!("Room closed under connection {}", conn.id);
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                refresh_presence(&conn, &app_state).await;
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect(conn, &app_state).await;
    app_state.connections.fetch_sub(1, Ordering::Relaxed);
}

async fn dispatch(
    text: &str,
    conn: &mut Connection,
    app_state: &AppState,
    sender: &mut WsSender,
) -> Result<(), axum::Error> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to parse message on {}: {}", conn.id, e);
            let event = ServerEvent::error(codes::MALFORMED_MESSAGE, format!("Unrecognized message: {}", e));
            return send_event(sender, &event).await;
        }
    };

    match event {
        ClientEvent::JoinSession(msg) => handle_join_message(msg, conn, app_state, sender).await,
        ClientEvent::LeaveSession(msg) => {
            handle_leave_message(msg, conn, app_state).await;
            Ok(())
        }
        ClientEvent::DocumentUpdate(msg) => handle_update_message(msg, conn, app_state, sender).await,
        ClientEvent::SyncRequest(msg) => handle_sync_message(msg, conn, app_state, sender).await,
        ClientEvent::PresenceUpdate(msg) => handle_presence_message(msg, conn, app_state, sender).await,
        ClientEvent::Ping => handle_ping_message(conn, sender).await,
    }
}

/// Next message from the joined document's room; never resolves while not joined
async fn next_room_message(joined: &mut Option<JoinedDocument>) -> Result<BroadcastMessage, RecvError> {
    match joined {
        Some(joined) => joined.room.recv().await,
        None => std::future::pending().await,
    }
}

/// Keep the connection's tracking and presence entries from expiring
async fn refresh_presence(conn: &Connection, app_state: &AppState) {
    let Some(joined) = &conn.joined else {
        return;
    };
    if let Err(e) = app_state
        .presence
        .track_socket(&conn.id, &conn.user.user_id, &joined.document_id)
        .await
    {
        warn!("Failed to refresh tracking of {}: {}", conn.id, e);
    }
    if let Err(e) = app_state
        .presence
        .set_user_presence(&joined.document_id, &joined.participant)
        .await
    {
        warn!("Failed to refresh presence of {} in {}: {}", conn.user.user_id, joined.document_id, e);
    }
}
