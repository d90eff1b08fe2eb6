use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error};

use crate::models::ServerEvent;

/// A serialized event published to a document room
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    /// Connection the event originated from; it is not echoed back there
    pub sender_id: String,
    pub content: String,
}

/// Publish/subscribe topics keyed by document id
pub struct Fanout {
    rooms: RwLock<HashMap<String, broadcast::Sender<BroadcastMessage>>>,
    capacity: usize,
}

impl Fanout {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Get or create the broadcast channel for a document and subscribe to it
    pub async fn subscribe(&self, document_id: &str) -> broadcast::Receiver<BroadcastMessage> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(document_id.to_string())
            .or_insert_with(|| broadcast::channel::<BroadcastMessage>(self.capacity).0)
            .subscribe()
    }

    /// Drop a subscription and the room with it once nobody listens anymore
    pub async fn unsubscribe(&self, document_id: &str, receiver: broadcast::Receiver<BroadcastMessage>) {
        drop(receiver);
        let mut rooms = self.rooms.write().await;
        if rooms.get(document_id).is_some_and(|bc| bc.receiver_count() == 0) {
            rooms.remove(document_id);
            debug!("Room {} closed", document_id);
        }
    }

    /// Send an event to every subscriber of a document except `sender_id`.
    ///
    /// Returns the number of subscribers the event was queued for, the sender included.
    pub async fn publish(&self, document_id: &str, sender_id: &str, event: &ServerEvent) -> usize {
        let content = match serde_json::to_string(event) {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to serialize broadcast for {}: {}", document_id, e);
                return 0;
            }
        };
        let rooms = self.rooms.read().await;
        let Some(bc) = rooms.get(document_id) else {
            return 0;
        };
        // Err only means no receiver is left
        bc.send(BroadcastMessage {
            sender_id: sender_id.to_string(),
            content,
        })
        .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
