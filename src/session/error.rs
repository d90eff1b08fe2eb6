use thiserror::Error;

use crate::db::PersistenceError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed update: {0}")]
    MalformedUpdate(String),
    #[error("malformed state vector: {0}")]
    MalformedStateVector(String),
    #[error("failed to encode document state: {0}")]
    Export(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("session for '{0}' was closed")]
    Closed(String),
    #[error("document '{0}' has active participants")]
    InUse(String),
}
