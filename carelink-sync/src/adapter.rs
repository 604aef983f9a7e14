//! Entity repository adapters: the storage seam between the sync pipeline
//! and entity rows.
//!
//! One adapter capability is registered per entity type and looked up by the
//! intake orchestrator, so no call site branches on entity type inline. The
//! SQLite implementation keeps all four types in one `entities` table keyed
//! by `(entity_type, entity_id)`.

use crate::error::{SyncError, SyncResult};
use crate::store::{entity_from_row, is_unique_violation};
use crate::types::{EntityKind, EntityRecord, SyncCheckpoint};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Storage operations for one entity type.
///
/// Implementations own the actual rows and know nothing about conflict
/// semantics. Writes are version-guarded: a `None` return means the guarded
/// version no longer matched (another write landed first) and the caller
/// must re-read and re-evaluate.
#[async_trait]
pub trait EntityAdapter: Send + Sync {
    /// The entity type this adapter serves.
    fn kind(&self) -> EntityKind;

    /// Load the current row, tombstoned or not.
    async fn read(
        &self,
        conn: &mut SqliteConnection,
        entity_id: Uuid,
    ) -> SyncResult<Option<EntityRecord>>;

    /// Insert (`expected_version: None`) or whole-record replace
    /// (`expected_version: Some(v)`, compare-and-swap on `last_modified_at`).
    ///
    /// Returns the committed `last_modified_at`, or `None` when the insert
    /// collided with a concurrent create or the guarded version moved.
    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        record: &EntityRecord,
        expected_version: Option<i64>,
    ) -> SyncResult<Option<i64>>;

    /// Soft-delete the row, keeping its payload, guarded the same way as
    /// `apply`. `record.deleted_at` must be set.
    async fn tombstone(
        &self,
        conn: &mut SqliteConnection,
        record: &EntityRecord,
        expected_version: i64,
    ) -> SyncResult<Option<i64>>;
}

/// SQLite adapter over the shared `entities` table, bound to one entity type.
pub struct SqliteEntityAdapter {
    kind: EntityKind,
}

impl SqliteEntityAdapter {
    pub fn new(kind: EntityKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl EntityAdapter for SqliteEntityAdapter {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn read(
        &self,
        conn: &mut SqliteConnection,
        entity_id: Uuid,
    ) -> SyncResult<Option<EntityRecord>> {
        let row = sqlx::query(
            r#"
            SELECT entity_type, entity_id, payload, last_modified_at,
                   client_modified_at, last_modified_by_device,
                   last_modified_op, deleted_at
            FROM entities
            WHERE entity_type = ? AND entity_id = ?
            "#,
        )
        .bind(self.kind.as_str())
        .bind(entity_id.to_string())
        .fetch_optional(conn)
        .await?;

        row.as_ref().map(entity_from_row).transpose()
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        record: &EntityRecord,
        expected_version: Option<i64>,
    ) -> SyncResult<Option<i64>> {
        match expected_version {
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO entities (
                        entity_type, entity_id, payload, last_modified_at,
                        client_modified_at, last_modified_by_device,
                        last_modified_op, deleted_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(self.kind.as_str())
                .bind(record.entity_id.to_string())
                .bind(record.payload.to_string())
                .bind(record.last_modified_at)
                .bind(record.client_modified_at)
                .bind(record.last_modified_by_device.to_string())
                .bind(record.last_modified_op.to_string())
                .bind(record.deleted_at)
                .execute(conn)
                .await;

                match result {
                    Ok(_) => Ok(Some(record.last_modified_at)),
                    // Another device created the same id first; re-read.
                    Err(err) if is_unique_violation(&err) => Ok(None),
                    Err(err) => Err(SyncError::Database(err)),
                }
            }
            Some(expected) => {
                let result = sqlx::query(
                    r#"
                    UPDATE entities
                    SET payload = ?, last_modified_at = ?, client_modified_at = ?,
                        last_modified_by_device = ?, last_modified_op = ?,
                        deleted_at = ?
                    WHERE entity_type = ? AND entity_id = ? AND last_modified_at = ?
                    "#,
                )
                .bind(record.payload.to_string())
                .bind(record.last_modified_at)
                .bind(record.client_modified_at)
                .bind(record.last_modified_by_device.to_string())
                .bind(record.last_modified_op.to_string())
                .bind(record.deleted_at)
                .bind(self.kind.as_str())
                .bind(record.entity_id.to_string())
                .bind(expected)
                .execute(conn)
                .await?;

                if result.rows_affected() == 1 {
                    Ok(Some(record.last_modified_at))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn tombstone(
        &self,
        conn: &mut SqliteConnection,
        record: &EntityRecord,
        expected_version: i64,
    ) -> SyncResult<Option<i64>> {
        let deleted_at = record.deleted_at.ok_or_else(|| {
            SyncError::Internal("Tombstone write without deleted_at".to_string())
        })?;

        let result = sqlx::query(
            r#"
            UPDATE entities
            SET last_modified_at = ?, client_modified_at = ?,
                last_modified_by_device = ?, last_modified_op = ?, deleted_at = ?
            WHERE entity_type = ? AND entity_id = ? AND last_modified_at = ?
            "#,
        )
        .bind(record.last_modified_at)
        .bind(record.client_modified_at)
        .bind(record.last_modified_by_device.to_string())
        .bind(record.last_modified_op.to_string())
        .bind(deleted_at)
        .bind(self.kind.as_str())
        .bind(record.entity_id.to_string())
        .bind(expected_version)
        .execute(conn)
        .await?;

        if result.rows_affected() == 1 {
            Ok(Some(record.last_modified_at))
        } else {
            Ok(None)
        }
    }
}

/// Adapter capabilities for every entity type, registered once at engine
/// construction.
pub struct AdapterRegistry {
    adapters: HashMap<EntityKind, Arc<dyn EntityAdapter>>,
}

impl AdapterRegistry {
    /// Registry with a SQLite adapter for each entity type.
    pub fn sqlite() -> Self {
        let mut adapters: HashMap<EntityKind, Arc<dyn EntityAdapter>> = HashMap::new();
        for kind in EntityKind::ALL {
            adapters.insert(kind, Arc::new(SqliteEntityAdapter::new(kind)));
        }
        Self { adapters }
    }

    pub fn adapter_for(&self, kind: EntityKind) -> SyncResult<&dyn EntityAdapter> {
        self.adapters
            .get(&kind)
            .map(Arc::as_ref)
            .ok_or_else(|| {
                SyncError::Internal(format!("No adapter registered for {}", kind.as_str()))
            })
    }

    /// Feed for delta pulls: rows strictly after `checkpoint` in
    /// `(last_modified_at, entity_id)` order, optionally restricted to the
    /// given entity types, tombstoned rows included.
    pub async fn changed_since(
        &self,
        pool: &SqlitePool,
        checkpoint: &SyncCheckpoint,
        entity_types: Option<&[EntityKind]>,
        limit: i64,
    ) -> SyncResult<Vec<EntityRecord>> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT entity_type, entity_id, payload, last_modified_at, \
             client_modified_at, last_modified_by_device, last_modified_op, \
             deleted_at FROM entities WHERE (last_modified_at > ",
        );
        builder.push_bind(checkpoint.modified_micros);
        builder.push(" OR (last_modified_at = ");
        builder.push_bind(checkpoint.modified_micros);
        builder.push(" AND entity_id > ");
        builder.push_bind(checkpoint.entity_id.to_string());
        builder.push("))");

        if let Some(kinds) = entity_types {
            builder.push(" AND entity_type IN (");
            let mut separated = builder.separated(", ");
            for kind in kinds {
                separated.push_bind(kind.as_str());
            }
            separated.push_unseparated(")");
        }

        builder.push(" ORDER BY last_modified_at ASC, entity_id ASC LIMIT ");
        builder.push_bind(limit);

        let rows = builder.build().fetch_all(pool).await?;
        rows.iter().map(entity_from_row).collect()
    }
}
