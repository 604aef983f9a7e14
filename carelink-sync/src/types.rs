//! Core vocabulary of the sync engine: operation envelopes, outcomes,
//! entity snapshots, checkpoints, and sync status.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of entity types managed by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Client,
    Visit,
    VisitDocumentation,
    CarePlan,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Client,
        EntityKind::Visit,
        EntityKind::VisitDocumentation,
        EntityKind::CarePlan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Client => "client",
            EntityKind::Visit => "visit",
            EntityKind::VisitDocumentation => "visit-documentation",
            EntityKind::CarePlan => "care-plan",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "client" => Ok(EntityKind::Client),
            "visit" => Ok(EntityKind::Visit),
            "visit-documentation" => Ok(EntityKind::VisitDocumentation),
            "care-plan" => Ok(EntityKind::CarePlan),
            _ => Err(SyncError::Validation(format!("Unknown entity type: {}", s))),
        }
    }
}

/// Mutation kind carried by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            _ => Err(SyncError::Validation(format!("Unknown operation kind: {}", s))),
        }
    }
}

/// A client-originated mutation as submitted over the wire.
///
/// `entity_type` and `kind` arrive as plain strings so a malformed operation
/// can be rejected (and audited) individually instead of failing the whole
/// batch at decode time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Device-generated identifier, unique per logical edit; idempotency key.
    pub operation_id: Uuid,
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub kind: String,
    /// New field values; required for create/update, ignored for delete.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Device clock reading at the moment of the edit.
    pub client_timestamp: DateTime<Utc>,
    /// The `last_modified_at` the device last saw for this entity, if any.
    #[serde(default)]
    pub based_on: Option<DateTime<Utc>>,
}

/// An operation whose envelope passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedOperation {
    pub operation_id: Uuid,
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub kind: OperationKind,
    pub payload: Option<serde_json::Value>,
    pub client_timestamp_micros: i64,
    pub based_on_micros: Option<i64>,
}

/// Final disposition of a processed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Applied,
    Rejected,
    Duplicate,
}

impl OperationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationOutcome::Applied => "applied",
            OperationOutcome::Rejected => "rejected",
            OperationOutcome::Duplicate => "duplicate",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "applied" => Ok(OperationOutcome::Applied),
            "rejected" => Ok(OperationOutcome::Rejected),
            "duplicate" => Ok(OperationOutcome::Duplicate),
            _ => Err(SyncError::Validation(format!("Unknown outcome: {}", s))),
        }
    }
}

/// How a detected conflict was resolved, if one was detected at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    None,
    Accepted,
    Superseded,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::None => "none",
            Resolution::Accepted => "accepted",
            Resolution::Superseded => "superseded",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "none" => Ok(Resolution::None),
            "accepted" => Ok(Resolution::Accepted),
            "superseded" => Ok(Resolution::Superseded),
            _ => Err(SyncError::Validation(format!("Unknown resolution: {}", s))),
        }
    }
}

/// Machine-readable reason an operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Validation,
    NotFound,
    Superseded,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Validation => "validation",
            RejectReason::NotFound => "not_found",
            RejectReason::Superseded => "superseded",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "validation" => Ok(RejectReason::Validation),
            "not_found" => Ok(RejectReason::NotFound),
            "superseded" => Ok(RejectReason::Superseded),
            _ => Err(SyncError::Validation(format!("Unknown reject reason: {}", s))),
        }
    }
}

/// Per-operation result returned by batch intake, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: Uuid,
    pub outcome: OperationOutcome,
    pub conflict_detected: bool,
    pub resolution: Resolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Entity timestamp after an applied write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_last_modified_at: Option<DateTime<Utc>>,
    pub server_timestamp: DateTime<Utc>,
}

/// Server-authoritative envelope around one entity row.
///
/// Timestamps are integer microseconds since the Unix epoch so ordering and
/// compare-and-swap equality are exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub payload: serde_json::Value,
    /// Server-monotonic version; drives delta ordering, checkpoint cursors,
    /// and compare-and-swap writes. May sit ahead of `client_modified_at`
    /// when a tie-break win forced a bump.
    pub last_modified_at: i64,
    /// Client timestamp of the operation that produced the current value;
    /// the basis for last-write-wins comparison.
    pub client_modified_at: i64,
    pub last_modified_by_device: Uuid,
    /// Operation that produced the current value; second half of the
    /// last-write-wins tie-break pair.
    pub last_modified_op: Uuid,
    pub deleted_at: Option<i64>,
}

/// A live entity as returned by delta pulls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub payload: serde_json::Value,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by_device: Uuid,
}

/// Soft-delete marker surfaced by delta pulls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tombstone {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

/// Immutable audit ledger entry; exactly one per consumed operation.
///
/// `entity_type` and `operation_kind` keep the raw submitted strings so
/// malformed operations remain forensically reconstructable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperationRecord {
    pub operation_id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub operation_kind: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub payload: Option<serde_json::Value>,
    pub client_timestamp: DateTime<Utc>,
    pub server_timestamp: DateTime<Utc>,
    pub conflict_detected: bool,
    pub resolution: Resolution,
    pub outcome: OperationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-entity sync state.
///
/// `Pending` and `Syncing` describe the client-side lifecycle; the server
/// persists the terminal states it decides (`Synced`, `Conflict`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "syncing" => Ok(SyncStatus::Syncing),
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            _ => Err(SyncError::Validation(format!("Unknown sync status: {}", s))),
        }
    }
}

/// Cursor marking how far a device has pulled changes.
///
/// Composite of `(last_modified_at, entity_id)` so rows sharing a timestamp
/// split across pages are never skipped. Encoded as `"{micros}:{uuid}"`;
/// opaque to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncCheckpoint {
    pub modified_micros: i64,
    pub entity_id: Uuid,
}

impl SyncCheckpoint {
    /// Cursor preceding every possible change.
    pub const ORIGIN: SyncCheckpoint = SyncCheckpoint {
        modified_micros: 0,
        entity_id: Uuid::nil(),
    };

    pub fn encode(&self) -> String {
        format!("{}:{}", self.modified_micros, self.entity_id)
    }

    pub fn decode(s: &str) -> SyncResult<Self> {
        let (micros, id) = s
            .split_once(':')
            .ok_or_else(|| SyncError::Validation(format!("Malformed checkpoint: {}", s)))?;
        let modified_micros = micros
            .parse::<i64>()
            .map_err(|_| SyncError::Validation(format!("Malformed checkpoint: {}", s)))?;
        let entity_id = Uuid::parse_str(id)
            .map_err(|_| SyncError::Validation(format!("Malformed checkpoint: {}", s)))?;
        Ok(Self {
            modified_micros,
            entity_id,
        })
    }
}

/// Tracker row for one entity instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityStatus {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub status: SyncStatus,
    pub updated_at: DateTime<Utc>,
}

/// Convert stored microseconds back to a wall-clock timestamp.
pub(crate) fn micros_to_datetime(micros: i64) -> SyncResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| SyncError::Internal(format!("Timestamp out of range: {}", micros)))
}

pub(crate) fn datetime_to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}
