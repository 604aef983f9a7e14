//! Batch intake: the per-operation pipeline.
//!
//! Operations are processed strictly in submission order, each in its own
//! transaction: guard check, envelope validation, current-state read,
//! conflict detection and resolution, the guarded write, then the ledger row
//! and status update. A partial batch failure never rolls back earlier
//! operations; resubmitting the whole batch is always safe because every
//! committed operation replays its recorded outcome.

use crate::adapter::AdapterRegistry;
use crate::audit::AuditLedger;
use crate::conflict::{self, Detection, Winner};
use crate::error::{SyncError, SyncResult};
use crate::idempotency::{GuardDecision, IdempotencyGuard};
use crate::status::StatusTracker;
use crate::store::SyncStore;
use crate::types::{
    datetime_to_micros, micros_to_datetime, EntityKind, EntityRecord, OperationKind,
    OperationOutcome, OperationResult, RejectReason, Resolution, SyncOperation,
    SyncOperationRecord, SyncStatus, ValidatedOperation,
};
use chrono::{DateTime, Utc};

/// How many times one operation may lose a storage race before the batch
/// gives up with a transient error.
const MAX_ATTEMPTS: u32 = 3;

pub struct BatchIntake<'a> {
    store: &'a SyncStore,
    registry: &'a AdapterRegistry,
}

impl<'a> BatchIntake<'a> {
    pub fn new(store: &'a SyncStore, registry: &'a AdapterRegistry) -> Self {
        Self { store, registry }
    }

    /// Process a batch, returning one result per operation in input order.
    ///
    /// A transient error aborts the remainder of the batch; operations that
    /// already committed stay committed and replay as duplicates on resubmit.
    pub async fn submit(&self, batch: &[SyncOperation]) -> SyncResult<Vec<OperationResult>> {
        let mut results = Vec::with_capacity(batch.len());
        for operation in batch {
            let result = self.process_one(operation).await?;
            tracing::debug!(
                operation_id = %operation.operation_id,
                outcome = result.outcome.as_str(),
                conflict = result.conflict_detected,
                "Sync operation processed"
            );
            results.push(result);
        }
        Ok(results)
    }

    async fn process_one(&self, op: &SyncOperation) -> SyncResult<OperationResult> {
        let validated = validate(op);

        for _ in 0..MAX_ATTEMPTS {
            match self.attempt(op, &validated).await {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {
                    // Lost a version race; re-read and re-evaluate.
                    tracing::debug!(operation_id = %op.operation_id, "Write contended, retrying");
                }
                Err(err) if err.is_transient() => {
                    tracing::debug!(operation_id = %op.operation_id, "Ledger contended, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        Err(SyncError::Transient(format!(
            "Operation {} exhausted its retries under contention",
            op.operation_id
        )))
    }

    /// One full pipeline pass in one transaction. `Ok(None)` means a guarded
    /// write observed a concurrent commit and the pass must be repeated.
    async fn attempt(
        &self,
        op: &SyncOperation,
        validated: &Result<ValidatedOperation, String>,
    ) -> SyncResult<Option<OperationResult>> {
        let mut tx = self.store.begin().await?;

        if let GuardDecision::PriorOutcome(prior) =
            IdempotencyGuard::check(&mut tx, op.operation_id).await?
        {
            return Ok(Some(replay_result(prior)));
        }

        let server_timestamp = Utc::now();

        // Malformed operations are audited but never reach an adapter.
        let vop = match validated {
            Ok(vop) => vop,
            Err(reason) => {
                let record = ledger_row(
                    op,
                    server_timestamp,
                    OperationOutcome::Rejected,
                    false,
                    Resolution::None,
                    Some(RejectReason::Validation),
                    Some(reason.clone()),
                );
                AuditLedger::record(&mut tx, &record).await?;
                tx.commit().await?;
                return Ok(Some(result_from_record(&record, None)?));
            }
        };

        let adapter = self.registry.adapter_for(vop.entity_type)?;
        let current = adapter.read(&mut tx, vop.entity_id).await?;

        if current.is_none() && vop.kind != OperationKind::Create {
            let record = ledger_row(
                op,
                server_timestamp,
                OperationOutcome::Rejected,
                false,
                Resolution::None,
                Some(RejectReason::NotFound),
                Some(format!(
                    "No {} with id {}",
                    vop.entity_type.as_str(),
                    vop.entity_id
                )),
            );
            AuditLedger::record(&mut tx, &record).await?;
            tx.commit().await?;
            return Ok(Some(result_from_record(&record, None)?));
        }

        let (conflict_detected, winner) = match conflict::detect(vop, current.as_ref()) {
            Detection::Clean => (false, Winner::Incoming),
            Detection::Conflict => {
                let record = current.as_ref().ok_or_else(|| {
                    SyncError::Internal("Conflict detected without current state".to_string())
                })?;
                (true, conflict::resolve_lww(vop, record))
            }
        };

        if winner == Winner::Current {
            // Superseded: the stored write stays, the attempt is recorded.
            let record = ledger_row(
                op,
                server_timestamp,
                OperationOutcome::Rejected,
                true,
                Resolution::Superseded,
                Some(RejectReason::Superseded),
                Some("A later write already holds this entity".to_string()),
            );
            AuditLedger::record(&mut tx, &record).await?;
            StatusTracker::mark(
                &mut tx,
                vop.entity_type,
                vop.entity_id,
                SyncStatus::Conflict,
                server_timestamp,
            )
            .await?;
            tx.commit().await?;
            return Ok(Some(result_from_record(&record, None)?));
        }

        // The incoming write goes through. The new version is the client
        // timestamp, bumped past the stored version when needed so the
        // change lands after every checkpoint that already saw the entity.
        let new_version = match current.as_ref() {
            None => vop.client_timestamp_micros,
            Some(cur) => vop.client_timestamp_micros.max(cur.last_modified_at + 1),
        };

        let committed = match vop.kind {
            OperationKind::Delete => {
                let cur = current.as_ref().ok_or_else(|| {
                    SyncError::Internal("Delete pipeline without current state".to_string())
                })?;
                let record = EntityRecord {
                    entity_type: vop.entity_type,
                    entity_id: vop.entity_id,
                    payload: cur.payload.clone(),
                    last_modified_at: new_version,
                    client_modified_at: vop.client_timestamp_micros,
                    last_modified_by_device: vop.device_id,
                    last_modified_op: vop.operation_id,
                    deleted_at: Some(new_version),
                };
                adapter
                    .tombstone(&mut tx, &record, cur.last_modified_at)
                    .await?
            }
            OperationKind::Create | OperationKind::Update => {
                let payload = vop.payload.clone().ok_or_else(|| {
                    SyncError::Internal("Validated mutation without payload".to_string())
                })?;
                let record = EntityRecord {
                    entity_type: vop.entity_type,
                    entity_id: vop.entity_id,
                    payload,
                    last_modified_at: new_version,
                    client_modified_at: vop.client_timestamp_micros,
                    last_modified_by_device: vop.device_id,
                    last_modified_op: vop.operation_id,
                    deleted_at: None,
                };
                adapter
                    .apply(
                        &mut tx,
                        &record,
                        current.as_ref().map(|c| c.last_modified_at),
                    )
                    .await?
            }
        };

        let Some(committed_version) = committed else {
            return Ok(None);
        };

        let resolution = if conflict_detected {
            Resolution::Accepted
        } else {
            Resolution::None
        };
        let record = ledger_row(
            op,
            server_timestamp,
            OperationOutcome::Applied,
            conflict_detected,
            resolution,
            None,
            None,
        );
        AuditLedger::record(&mut tx, &record).await?;
        StatusTracker::mark(
            &mut tx,
            vop.entity_type,
            vop.entity_id,
            SyncStatus::Synced,
            server_timestamp,
        )
        .await?;
        tx.commit().await?;

        Ok(Some(result_from_record(&record, Some(committed_version))?))
    }
}

/// Payload fields every mutation of the given type must carry.
fn required_payload_fields(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Client => &["first_name", "last_name"],
        EntityKind::Visit => &["client_id", "scheduled_start"],
        EntityKind::VisitDocumentation => &["visit_id", "notes"],
        EntityKind::CarePlan => &["client_id", "title"],
    }
}

/// Envelope validation; pure, so one failed check rejects the single
/// operation without touching storage.
fn validate(op: &SyncOperation) -> Result<ValidatedOperation, String> {
    let entity_type = EntityKind::from_str(&op.entity_type)
        .map_err(|_| format!("Unknown entity type: {}", op.entity_type))?;
    let kind = OperationKind::from_str(&op.kind)
        .map_err(|_| format!("Unknown operation kind: {}", op.kind))?;

    let payload = match kind {
        OperationKind::Delete => None,
        OperationKind::Create | OperationKind::Update => {
            let payload = op
                .payload
                .as_ref()
                .ok_or_else(|| format!("Missing payload for {}", kind.as_str()))?;
            let fields = payload
                .as_object()
                .ok_or_else(|| "Payload must be a JSON object".to_string())?;
            for field in required_payload_fields(entity_type) {
                match fields.get(*field) {
                    Some(value) if !value.is_null() => {}
                    _ => {
                        return Err(format!(
                            "Missing required payload field for {}: {}",
                            entity_type.as_str(),
                            field
                        ))
                    }
                }
            }
            Some(payload.clone())
        }
    };

    Ok(ValidatedOperation {
        operation_id: op.operation_id,
        device_id: op.device_id,
        user_id: op.user_id,
        entity_type,
        entity_id: op.entity_id,
        kind,
        payload,
        client_timestamp_micros: datetime_to_micros(op.client_timestamp),
        based_on_micros: op.based_on.map(datetime_to_micros),
    })
}

/// Ledger row built from the raw envelope, so malformed submissions stay
/// forensically reconstructable exactly as they arrived.
fn ledger_row(
    op: &SyncOperation,
    server_timestamp: DateTime<Utc>,
    outcome: OperationOutcome,
    conflict_detected: bool,
    resolution: Resolution,
    reject_reason: Option<RejectReason>,
    detail: Option<String>,
) -> SyncOperationRecord {
    SyncOperationRecord {
        operation_id: op.operation_id,
        user_id: op.user_id,
        device_id: op.device_id,
        operation_kind: op.kind.clone(),
        entity_type: op.entity_type.clone(),
        entity_id: op.entity_id,
        payload: op.payload.clone(),
        client_timestamp: op.client_timestamp,
        server_timestamp,
        conflict_detected,
        resolution,
        outcome,
        reject_reason,
        detail,
    }
}

fn result_from_record(
    record: &SyncOperationRecord,
    new_version: Option<i64>,
) -> SyncResult<OperationResult> {
    Ok(OperationResult {
        operation_id: record.operation_id,
        outcome: record.outcome,
        conflict_detected: record.conflict_detected,
        resolution: record.resolution,
        reject_reason: record.reject_reason,
        detail: record.detail.clone(),
        new_last_modified_at: new_version.map(micros_to_datetime).transpose()?,
        server_timestamp: record.server_timestamp,
    })
}

/// A resubmitted operation replays its first processing: applied becomes
/// `duplicate`, a rejection repeats unchanged.
fn replay_result(prior: SyncOperationRecord) -> OperationResult {
    let outcome = match prior.outcome {
        OperationOutcome::Applied => OperationOutcome::Duplicate,
        other => other,
    };
    OperationResult {
        operation_id: prior.operation_id,
        outcome,
        conflict_detected: prior.conflict_detected,
        resolution: prior.resolution,
        reject_reason: prior.reject_reason,
        detail: prior.detail,
        new_last_modified_at: None,
        server_timestamp: prior.server_timestamp,
    }
}
