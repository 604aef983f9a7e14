//! Offline-first synchronization engine for the CareLink home-care platform
//!
//! Provides:
//! - Batch intake of device operations with per-operation idempotency
//! - Timestamp conflict detection with last-write-wins resolution
//! - An append-only audit ledger of every submitted operation
//! - Checkpointed delta pulls with tombstone propagation
//! - Per-entity sync status for UI and diagnostics

pub mod adapter;
pub mod audit;
pub mod conflict;
pub mod delta;
pub mod error;
pub mod idempotency;
pub mod intake;
pub mod status;
pub mod store;
pub mod types;

pub use adapter::{AdapterRegistry, EntityAdapter, SqliteEntityAdapter};
pub use audit::{AuditLedger, AuditQuery};
pub use delta::{DeltaPage, DeltaProvider};
pub use error::{SyncError, SyncResult};
pub use idempotency::{GuardDecision, IdempotencyGuard};
pub use intake::BatchIntake;
pub use status::StatusTracker;
pub use store::SyncStore;
pub use types::{
    EntityKind, EntitySnapshot, EntityStatus, OperationKind, OperationOutcome, OperationResult,
    RejectReason, Resolution, SyncCheckpoint, SyncOperation, SyncOperationRecord, SyncStatus,
    Tombstone,
};

use uuid::Uuid;

/// Sync engine facade wiring the store, the adapter registry, and the
/// pipeline components together.
pub struct SyncEngine {
    store: SyncStore,
    registry: AdapterRegistry,
}

impl SyncEngine {
    /// Open (creating if needed) the engine database at `database_path`.
    pub async fn new(database_path: &str) -> SyncResult<Self> {
        let store = SyncStore::new(database_path).await?;
        Ok(Self {
            store,
            registry: AdapterRegistry::sqlite(),
        })
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    /// Process one batch of operations strictly in submission order.
    pub async fn submit_batch(&self, batch: &[SyncOperation]) -> SyncResult<Vec<OperationResult>> {
        BatchIntake::new(&self.store, &self.registry)
            .submit(batch)
            .await
    }

    /// Serve a delta pull. `checkpoint` is the encoded cursor from a prior
    /// pull; `None` starts from the beginning of time.
    pub async fn pull_changes(
        &self,
        checkpoint: Option<&str>,
        entity_types: Option<&[EntityKind]>,
        page_size: i64,
    ) -> SyncResult<DeltaPage> {
        let checkpoint = match checkpoint {
            Some(encoded) => SyncCheckpoint::decode(encoded)?,
            None => SyncCheckpoint::ORIGIN,
        };
        DeltaProvider::pull(
            self.store.pool(),
            &self.registry,
            &checkpoint,
            entity_types,
            page_size,
        )
        .await
    }

    /// Current sync status of one entity, if intake ever decided one.
    pub async fn entity_status(
        &self,
        entity_type: EntityKind,
        entity_id: Uuid,
    ) -> SyncResult<Option<EntityStatus>> {
        StatusTracker::get(self.store.pool(), entity_type, entity_id).await
    }

    /// Ledger review query; returns the requested page and the total number
    /// of matching rows.
    pub async fn query_audit(
        &self,
        query: &AuditQuery,
    ) -> SyncResult<(Vec<SyncOperationRecord>, i64)> {
        let records = AuditLedger::query(self.store.pool(), query).await?;
        let total = AuditLedger::count(self.store.pool(), query).await?;
        Ok((records, total))
    }
}
