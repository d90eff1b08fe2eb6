use chrono::Utc;
use tracing::debug;

use crate::models::{PongMessage, ServerEvent};
use super::{send_event, Connection, WsSender};

/// Handle ping - reply with a pong carrying the server time
pub async fn handle_ping_message(conn: &Connection, sender: &mut WsSender) -> Result<(), axum::Error> {
    debug!("Ping received on connection {}", conn.id);
    let pong = ServerEvent::Pong(PongMessage {
        date: Utc::now().to_rfc3339(),
    });
    send_event(sender, &pong).await
}
