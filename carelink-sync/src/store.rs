//! SQLite-backed storage for the sync engine.
//!
//! Owns the connection pool and schema. Entity rows, the operation ledger,
//! and the per-entity status table all live in one database so a single
//! transaction can cover an apply, its ledger entry, and its status update.

use crate::error::{SyncError, SyncResult};
use crate::types::{EntityKind, EntityRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::time::Duration;
use uuid::Uuid;

/// Shared handle to the sync database.
#[derive(Debug, Clone)]
pub struct SyncStore {
    pool: SqlitePool,
}

impl SyncStore {
    /// Open (creating if needed) the database at `database_path` and ensure
    /// the schema exists.
    pub async fn new(database_path: &str) -> SyncResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.initialize_schema().await?;

        tracing::debug!("Sync store initialized at {}", database_path);
        Ok(store)
    }

    async fn initialize_schema(&self) -> SyncResult<()> {
        // Current value of every synced entity. Soft deletes keep the row
        // and set deleted_at so tombstones flow through delta pulls.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                last_modified_at INTEGER NOT NULL,
                client_modified_at INTEGER NOT NULL,
                last_modified_by_device TEXT NOT NULL,
                last_modified_op TEXT NOT NULL,
                deleted_at INTEGER,
                PRIMARY KEY (entity_type, entity_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entities_modified
             ON entities (last_modified_at, entity_id)",
        )
        .execute(&self.pool)
        .await?;

        // Append-only ledger; operation_id as primary key is what makes
        // duplicate submissions detectable.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_operations (
                operation_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                operation_kind TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                payload TEXT,
                client_timestamp INTEGER NOT NULL,
                server_timestamp INTEGER NOT NULL,
                conflict_detected INTEGER NOT NULL DEFAULT 0,
                resolution TEXT NOT NULL,
                outcome TEXT NOT NULL,
                reject_reason TEXT,
                detail TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_operations_entity
             ON sync_operations (entity_type, entity_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_operations_user
             ON sync_operations (user_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_operations_device
             ON sync_operations (device_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_operations_server_ts
             ON sync_operations (server_timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_sync_status (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Begin a transaction for one operation's apply-and-record sequence.
    pub async fn begin(&self) -> SyncResult<Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Parse a UUID column that we wrote ourselves; failure means the row was
/// tampered with or the database is corrupt.
pub(crate) fn parse_uuid(value: &str) -> SyncResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| SyncError::Internal(format!("Invalid UUID in storage: {}", e)))
}

pub(crate) fn entity_from_row(row: &SqliteRow) -> SyncResult<EntityRecord> {
    let entity_type: String = row.try_get("entity_type")?;
    let entity_id: String = row.try_get("entity_id")?;
    let payload: String = row.try_get("payload")?;
    let device: String = row.try_get("last_modified_by_device")?;
    let op: String = row.try_get("last_modified_op")?;

    Ok(EntityRecord {
        entity_type: EntityKind::from_str(&entity_type)?,
        entity_id: parse_uuid(&entity_id)?,
        payload: serde_json::from_str(&payload)?,
        last_modified_at: row.try_get("last_modified_at")?,
        client_modified_at: row.try_get("client_modified_at")?,
        last_modified_by_device: parse_uuid(&device)?,
        last_modified_op: parse_uuid(&op)?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}
