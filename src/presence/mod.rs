pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Participant, SocketTrackEntry};

pub use memory::MemoryPresenceStore;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("presence store unavailable: {0}")]
    Unavailable(String),
}

/// Volatile record of who is connected to which document.
///
/// Everything here is best-effort and bounded by a TTL: a crashed connection
/// that never reports its disconnect disappears once its entries expire.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set_user_presence(&self, document_id: &str, participant: &Participant) -> Result<(), PresenceError>;

    /// Drop a user's presence entry. With `connection_id` set, only that
    /// connection is dropped and the entry survives while the user has others.
    async fn remove_user_presence(
        &self,
        document_id: &str,
        user_id: &str,
        connection_id: Option<&str>,
    ) -> Result<(), PresenceError>;

    async fn get_present_users(&self, document_id: &str) -> Result<Vec<Participant>, PresenceError>;

    /// Record (or refresh) which user and document a connection belongs to
    async fn track_socket(&self, connection_id: &str, user_id: &str, document_id: &str) -> Result<(), PresenceError>;

    /// Atomically take the tracking entry for a connection. Returns it at most once.
    async fn untrack_socket(&self, connection_id: &str) -> Result<Option<SocketTrackEntry>, PresenceError>;
}
