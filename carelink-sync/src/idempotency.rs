//! Idempotency guard: each operation id is consumed exactly once.

use crate::audit::record_from_row;
use crate::error::SyncResult;
use crate::types::SyncOperationRecord;
use sqlx::SqliteConnection;
use uuid::Uuid;

/// Outcome of the ledger lookup that opens every operation's pipeline.
#[derive(Debug, Clone)]
pub enum GuardDecision {
    /// The operation was already consumed; replay its recorded outcome.
    PriorOutcome(SyncOperationRecord),
    /// Never seen; proceed with the pipeline.
    NotSeen,
}

pub struct IdempotencyGuard;

impl IdempotencyGuard {
    /// Read-only lookup. The matching ledger row is only ever written after
    /// a successful apply, in the same transaction, so a crash between this
    /// check and the apply leaves no row behind and the retried operation
    /// starts from scratch.
    pub async fn check(
        conn: &mut SqliteConnection,
        operation_id: Uuid,
    ) -> SyncResult<GuardDecision> {
        let row = sqlx::query(
            r#"
            SELECT operation_id, user_id, device_id, operation_kind,
                   entity_type, entity_id, payload, client_timestamp,
                   server_timestamp, conflict_detected, resolution, outcome,
                   reject_reason, detail
            FROM sync_operations
            WHERE operation_id = ?
            "#,
        )
        .bind(operation_id.to_string())
        .fetch_optional(conn)
        .await?;

        match row {
            Some(row) => Ok(GuardDecision::PriorOutcome(record_from_row(&row)?)),
            None => Ok(GuardDecision::NotSeen),
        }
    }
}
