//! Delta provider: paginated change feed for device pulls.
//!
//! A pull returns every entity whose server version is strictly greater than
//! the supplied checkpoint, in `(last_modified_at, entity_id)` order, split
//! into live changes and tombstones. The checkpoint is a composite cursor,
//! so rows sharing a timestamp never straddle a page boundary ambiguously:
//! re-pulling an unadvanced checkpoint returns the identical page.

use crate::adapter::AdapterRegistry;
use crate::error::SyncResult;
use crate::types::{
    micros_to_datetime, EntityKind, EntityRecord, EntitySnapshot, SyncCheckpoint, Tombstone,
};
use sqlx::sqlite::SqlitePool;

/// One page of changes.
#[derive(Debug, Clone)]
pub struct DeltaPage {
    pub changes: Vec<EntitySnapshot>,
    pub tombstones: Vec<Tombstone>,
    /// Cursor to persist once this page is durably applied. Equals the
    /// request checkpoint when there was nothing new.
    pub next_checkpoint: SyncCheckpoint,
}

pub struct DeltaProvider;

impl DeltaProvider {
    pub const DEFAULT_PAGE_SIZE: i64 = 100;
    pub const MAX_PAGE_SIZE: i64 = 500;

    /// Read-only; never blocks writers and never returns an unbounded set.
    pub async fn pull(
        pool: &SqlitePool,
        registry: &AdapterRegistry,
        checkpoint: &SyncCheckpoint,
        entity_types: Option<&[EntityKind]>,
        page_size: i64,
    ) -> SyncResult<DeltaPage> {
        let limit = if page_size < 1 {
            Self::DEFAULT_PAGE_SIZE
        } else {
            page_size.min(Self::MAX_PAGE_SIZE)
        };

        let rows = registry
            .changed_since(pool, checkpoint, entity_types, limit)
            .await?;

        let next_checkpoint = rows
            .last()
            .map(|record| SyncCheckpoint {
                modified_micros: record.last_modified_at,
                entity_id: record.entity_id,
            })
            .unwrap_or(*checkpoint);

        let mut changes = Vec::new();
        let mut tombstones = Vec::new();
        for record in rows {
            match record.deleted_at {
                Some(deleted_at) => tombstones.push(Tombstone {
                    entity_type: record.entity_type,
                    entity_id: record.entity_id,
                    deleted_at: micros_to_datetime(deleted_at)?,
                }),
                None => changes.push(snapshot(record)?),
            }
        }

        tracing::debug!(
            changes = changes.len(),
            tombstones = tombstones.len(),
            "Delta pull served"
        );

        Ok(DeltaPage {
            changes,
            tombstones,
            next_checkpoint,
        })
    }
}

fn snapshot(record: EntityRecord) -> SyncResult<EntitySnapshot> {
    Ok(EntitySnapshot {
        entity_type: record.entity_type,
        entity_id: record.entity_id,
        payload: record.payload,
        last_modified_at: micros_to_datetime(record.last_modified_at)?,
        last_modified_by_device: record.last_modified_by_device,
    })
}
