use async_trait::async_trait;
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{PresenceError, PresenceStore};
use crate::models::{Participant, SocketTrackEntry};

#[derive(Clone)]
struct PresenceRecord {
    participant: Participant,
    /// The user's open connections in this document, oldest first
    connections: Vec<String>,
    expires_at: Instant,
}

#[derive(Clone)]
struct TrackedSocket {
    entry: SocketTrackEntry,
    expires_at: Instant,
}

type PresenceRoom = Arc<Mutex<HashMap<String, PresenceRecord>>>;

/// In-process presence store built on moka TTL caches
pub struct MemoryPresenceStore {
    ttl: Duration,
    rooms: Cache<String, PresenceRoom>,
    sockets: Cache<String, TrackedSocket>,
}

impl MemoryPresenceStore {
    pub fn new(ttl: Duration) -> Self {
        // Rooms nobody touches for a full TTL only hold expired records
        let rooms = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(ttl)
            .build();
        let sockets = Cache::builder()
            .max_capacity(1_000_000)
            .time_to_live(ttl)
            .build();
        info!("Presence store initialized (ttl {:?})", ttl);
        Self { ttl, rooms, sockets }
    }

    fn room(&self, document_id: &str) -> PresenceRoom {
        self.rooms
            .get_with(document_id.to_string(), || Arc::new(Mutex::new(HashMap::new())))
    }

    fn lock(room: &PresenceRoom) -> Result<std::sync::MutexGuard<'_, HashMap<String, PresenceRecord>>, PresenceError> {
        room.lock()
            .map_err(|_| PresenceError::Unavailable("presence room lock poisoned".to_string()))
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set_user_presence(&self, document_id: &str, participant: &Participant) -> Result<(), PresenceError> {
        let room = self.room(document_id);
        let mut records = Self::lock(&room)?;
        let now = Instant::now();
        let mut connections = records
            .remove(&participant.user_id)
            .filter(|record| record.expires_at > now)
            .map(|record| record.connections)
            .unwrap_or_default();
        if !connections.contains(&participant.connection_id) {
            connections.push(participant.connection_id.clone());
        }
        records.insert(
            participant.user_id.clone(),
            PresenceRecord {
                participant: participant.clone(),
                connections,
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }

    async fn remove_user_presence(
        &self,
        document_id: &str,
        user_id: &str,
        connection_id: Option<&str>,
    ) -> Result<(), PresenceError> {
        let Some(room) = self.rooms.get(document_id) else {
            return Ok(());
        };
        let mut records = Self::lock(&room)?;
        let Some(connection_id) = connection_id else {
            records.remove(user_id);
            return Ok(());
        };
        let Some(record) = records.get_mut(user_id) else {
            return Ok(());
        };
        record.connections.retain(|c| c != connection_id);
        match record.connections.last().cloned() {
            None => {
                records.remove(user_id);
            }
            Some(newest) => {
                if record.participant.connection_id == connection_id {
                    record.participant.connection_id = newest;
                }
                debug!("{} is still connected to {} from another connection", user_id, document_id);
            }
        }
        Ok(())
    }

    async fn get_present_users(&self, document_id: &str) -> Result<Vec<Participant>, PresenceError> {
        let Some(room) = self.rooms.get(document_id) else {
            return Ok(Vec::new());
        };
        let now = Instant::now();
        let mut records = Self::lock(&room)?;
        records.retain(|_, record| record.expires_at > now);
        let mut participants: Vec<Participant> = records.values().map(|r| r.participant.clone()).collect();
        participants.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(participants)
    }

    async fn track_socket(&self, connection_id: &str, user_id: &str, document_id: &str) -> Result<(), PresenceError> {
        self.sockets.insert(
            connection_id.to_string(),
            TrackedSocket {
                entry: SocketTrackEntry {
                    user_id: user_id.to_string(),
                    document_id: document_id.to_string(),
                },
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn untrack_socket(&self, connection_id: &str) -> Result<Option<SocketTrackEntry>, PresenceError> {
        // remove() is the atomic get-and-delete: concurrent callers cannot both see the entry
        let tracked = self.sockets.remove(connection_id);
        Ok(tracked
            .filter(|t| t.expires_at > Instant::now())
            .map(|t| t.entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryPresenceStore {
        MemoryPresenceStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn presence_is_scoped_per_document() {
        let store = store();
        store.set_user_presence("doc1", &Participant::new("u1", "c1")).await.unwrap();
        store.set_user_presence("doc1", &Participant::new("u2", "c2")).await.unwrap();
        store.set_user_presence("doc2", &Participant::new("u3", "c3")).await.unwrap();

        let users: Vec<String> = store
            .get_present_users("doc1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(users.len(), 2);
        assert!(users.contains(&"u1".to_string()) && users.contains(&"u2".to_string()));

        store.remove_user_presence("doc1", "u1", None).await.unwrap();
        assert_eq!(store.get_present_users("doc1").await.unwrap().len(), 1);
        assert!(store.get_present_users("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removal_respects_the_owning_connection() {
        let store = store();
        store.set_user_presence("doc1", &Participant::new("u1", "new-tab")).await.unwrap();

        store.remove_user_presence("doc1", "u1", Some("old-tab")).await.unwrap();
        assert_eq!(store.get_present_users("doc1").await.unwrap().len(), 1);

        store.remove_user_presence("doc1", "u1", Some("new-tab")).await.unwrap();
        assert!(store.get_present_users("doc1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn user_stays_present_until_every_tab_is_gone() {
        let store = store();
        store.set_user_presence("doc1", &Participant::new("u1", "tab-1")).await.unwrap();
        store.set_user_presence("doc1", &Participant::new("u1", "tab-2")).await.unwrap();

        store.remove_user_presence("doc1", "u1", Some("tab-2")).await.unwrap();
        let present = store.get_present_users("doc1").await.unwrap();
        assert_eq!(present.len(), 1);
        assert_eq!(present[0].connection_id, "tab-1");

        store.remove_user_presence("doc1", "u1", Some("tab-1")).await.unwrap();
        assert!(store.get_present_users("doc1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn untrack_returns_the_entry_exactly_once() {
        let store = store();
        store.track_socket("c1", "u1", "doc1").await.unwrap();

        let first = store.untrack_socket("c1").await.unwrap();
        assert_eq!(
            first,
            Some(SocketTrackEntry {
                user_id: "u1".to_string(),
                document_id: "doc1".to_string()
            })
        );
        assert_eq!(store.untrack_socket("c1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_untracks_see_the_entry_once() {
        let store = Arc::new(store());
        store.track_socket("c1", "u1", "doc1").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.untrack_socket("c1").await.unwrap() })
            })
            .collect();
        let mut found = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                found += 1;
            }
        }
        assert_eq!(found, 1);
    }

    #[tokio::test]
    async fn retracking_moves_a_connection_to_another_document() {
        let store = store();
        store.track_socket("c1", "u1", "doc1").await.unwrap();
        store.track_socket("c1", "u1", "doc2").await.unwrap();
        assert_eq!(store.untrack_socket("c1").await.unwrap().unwrap().document_id, "doc2");
    }

    #[tokio::test]
    async fn expired_entries_are_not_found() {
        let store = MemoryPresenceStore::new(Duration::from_millis(30));
        store.track_socket("c1", "u1", "doc1").await.unwrap();
        store.set_user_presence("doc1", &Participant::new("u1", "c1")).await.unwrap();

        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(store.untrack_socket("c1").await.unwrap(), None);
        assert!(store.get_present_users("doc1").await.unwrap().is_empty());
    }
}
