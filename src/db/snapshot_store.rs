use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Durable representation of a document's merged state
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub document_id: String,
    pub state: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}

/// Durable snapshot storage, one record per document.
///
/// Calls for the same document are serialized by the session registry, so
/// implementations need no per-document locking of their own.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn find_snapshot_by_id(&self, document_id: &str) -> Result<Option<Snapshot>, PersistenceError>;

    /// Last-writer-wins upsert
    async fn save(&self, document_id: &str, state: &[u8]) -> Result<(), PersistenceError>;

    async fn delete(&self, document_id: &str) -> Result<(), PersistenceError>;

    /// Cheap connectivity probe used by readiness checks
    async fn ping(&self) -> Result<(), PersistenceError>;
}
