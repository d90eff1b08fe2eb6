use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::snapshot_store::{PersistenceError, Snapshot, SnapshotStore};

/// Process-local snapshot store for development without a database
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Snapshot>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far
    #[cfg(test)]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail, to exercise outage handling
    #[cfg(test)]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("memory store set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn find_snapshot_by_id(&self, document_id: &str) -> Result<Option<Snapshot>, PersistenceError> {
        self.check()?;
        Ok(self.snapshots.read().await.get(document_id).cloned())
    }

    async fn save(&self, document_id: &str, state: &[u8]) -> Result<(), PersistenceError> {
        self.check()?;
        let snapshot = Snapshot {
            document_id: document_id.to_string(),
            state: state.to_vec(),
            updated_at: Utc::now(),
        };
        self.snapshots.write().await.insert(document_id.to_string(), snapshot);
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Stored snapshot for {} ({} bytes) in memory, save #{}", document_id, state.len(), n);
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<(), PersistenceError> {
        self.check()?;
        self.snapshots.write().await.remove(document_id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_is_an_upsert_keyed_by_document() {
        let store = MemorySnapshotStore::new();
        assert!(store.find_snapshot_by_id("doc1").await.unwrap().is_none());

        store.save("doc1", b"v1").await.unwrap();
        store.save("doc1", b"v2").await.unwrap();
        store.save("doc2", b"other").await.unwrap();

        let snapshot = store.find_snapshot_by_id("doc1").await.unwrap().unwrap();
        assert_eq!(snapshot.document_id, "doc1");
        assert_eq!(snapshot.state, b"v2");
        assert_eq!(store.save_count(), 3);

        store.delete("doc1").await.unwrap();
        assert!(store.find_snapshot_by_id("doc1").await.unwrap().is_none());
        assert!(store.find_snapshot_by_id("doc2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_store_reports_unavailable() {
        let store = MemorySnapshotStore::new();
        store.set_failing(true);
        assert!(matches!(store.save("doc1", b"x").await, Err(PersistenceError::Unavailable(_))));
        assert!(store.ping().await.is_err());
        store.set_failing(false);
        assert!(store.ping().await.is_ok());
    }
}
