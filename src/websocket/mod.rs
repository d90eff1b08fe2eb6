pub mod fanout;
pub mod handler;
mod msg_join_handler;
mod msg_leave_handler;
mod msg_ping_handler;
mod msg_presence_handler;
mod msg_sync_handler;
mod msg_update_handler;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{stream::SplitSink, SinkExt};
use tokio::sync::broadcast;
use tracing::error;
use uuid::Uuid;

use crate::models::{Participant, ServerEvent};
use crate::services::auth_service::CallerIdentity;
use fanout::BroadcastMessage;

pub use fanout::Fanout;
pub use handler::websocket_handler;

pub type WsSender = SplitSink<WebSocket, Message>;

/// Per-connection state, owned by the connection task
pub struct Connection {
    pub id: String,
    pub user: CallerIdentity,
    pub joined: Option<JoinedDocument>,
}

/// The one document a connection is currently part of
pub struct JoinedDocument {
    pub document_id: String,
    /// Our own participant entry, refreshed into the presence store on heartbeat
    pub participant: Participant,
    pub room: broadcast::Receiver<BroadcastMessage>,
}

impl Connection {
    pub fn new(user: CallerIdentity) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user,
            joined: None,
        }
    }

    pub fn is_joined(&self, document_id: &str) -> bool {
        self.joined.as_ref().is_some_and(|j| j.document_id == document_id)
    }
}

/// Serialize and send one event to this connection.
///
/// An error means the socket is gone and the connection should wind down.
pub async fn send_event(sender: &mut WsSender, event: &ServerEvent) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize outgoing event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await
}
