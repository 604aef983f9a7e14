//! Per-entity sync status, maintained by batch intake as a side effect.
//!
//! Only the server-decided terminal states (`synced`, `conflict`) are ever
//! persisted here; `pending` and `syncing` live on the device. Status is a
//! derived convenience for UI and diagnostics. The ledger is authoritative,
//! so the status write is plain last-write-wins.

use crate::error::SyncResult;
use crate::store::parse_uuid;
use crate::types::{
    datetime_to_micros, micros_to_datetime, EntityKind, EntityStatus, SyncStatus,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

pub struct StatusTracker;

impl StatusTracker {
    /// Record the state intake decided for an entity, in the same
    /// transaction as the decision itself.
    pub async fn mark(
        conn: &mut SqliteConnection,
        entity_type: EntityKind,
        entity_id: Uuid,
        status: SyncStatus,
        updated_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_sync_status (entity_type, entity_id, status, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (entity_type, entity_id)
            DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id.to_string())
        .bind(status.as_str())
        .bind(datetime_to_micros(updated_at))
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn get(
        pool: &SqlitePool,
        entity_type: EntityKind,
        entity_id: Uuid,
    ) -> SyncResult<Option<EntityStatus>> {
        let row = sqlx::query(
            r#"
            SELECT entity_type, entity_id, status, updated_at
            FROM entity_sync_status
            WHERE entity_type = ? AND entity_id = ?
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id.to_string())
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let entity_type: String = row.try_get("entity_type")?;
        let entity_id: String = row.try_get("entity_id")?;
        let status: String = row.try_get("status")?;
        let updated_at: i64 = row.try_get("updated_at")?;

        Ok(Some(EntityStatus {
            entity_type: EntityKind::from_str(&entity_type)?,
            entity_id: parse_uuid(&entity_id)?,
            status: SyncStatus::from_str(&status)?,
            updated_at: micros_to_datetime(updated_at)?,
        }))
    }
}
