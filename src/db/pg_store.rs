use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info};

use super::snapshot_store::{PersistenceError, Snapshot, SnapshotStore};

/// Snapshot row from the database
#[derive(Debug, Clone, sqlx::FromRow)]
struct CollaborationDocumentRow {
    id: String,
    document_state: Vec<u8>,
    updated_at: DateTime<Utc>,
}

impl From<CollaborationDocumentRow> for Snapshot {
    fn from(row: CollaborationDocumentRow) -> Self {
        Snapshot {
            document_id: row.id,
            state: row.document_state,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL-backed snapshot store
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    ///
    /// # Returns
    /// * `Result<Self, PersistenceError>` - Store backed by a live pool, or error
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2) // Keep some connections alive
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        let store = Self { pool };
        store.ping().await?;
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the snapshot table if this is a fresh database
    async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collaboration_documents (
                id TEXT PRIMARY KEY,
                document_state BYTEA NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn find_snapshot_by_id(&self, document_id: &str) -> Result<Option<Snapshot>, PersistenceError> {
        let row = sqlx::query_as::<_, CollaborationDocumentRow>(
            "SELECT id, document_state, updated_at FROM collaboration_documents WHERE id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Error finding snapshot for document {}: {}", document_id, e);
            e
        })?;

        Ok(row.map(Snapshot::from))
    }

    async fn save(&self, document_id: &str, state: &[u8]) -> Result<(), PersistenceError> {
        // Log pool stats, saves are the hot path for connection usage
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        info!(
            "Saving snapshot for {} ({} bytes). Pool connections: {} idle, {} in use",
            document_id,
            state.len(),
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );

        let query_sql = r#"
            INSERT INTO collaboration_documents (id, document_state, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (id) DO UPDATE
            SET document_state = EXCLUDED.document_state,
                updated_at = NOW()
        "#;

        sqlx::query(query_sql)
            .bind(document_id)
            .bind(state)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Error saving snapshot for document {}: {}", document_id, e);
                e
            })?;

        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM collaboration_documents WHERE id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Error deleting document {}: {}", document_id, e);
                e
            })?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
