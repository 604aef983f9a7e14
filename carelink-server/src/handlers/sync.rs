//! Sync protocol handlers
//!
//! Server-side endpoints for offline-first synchronization:
//! - POST /api/v1/sync/batch - submit a batch of device operations
//! - GET /api/v1/sync/changes - checkpointed delta pull
//! - GET /api/v1/sync/status/{entity_type}/{entity_id} - per-entity sync status

use axum::{
    extract::{Path, Query, State},
    Json,
};
use carelink_sync::{
    EntityKind, EntitySnapshot, EntityStatus, OperationResult, SyncOperation, Tombstone,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{api_success, ApiError, ApiResponse};
use crate::server::CareLinkServer;

/// One client-originated mutation inside a batch submission.
///
/// `entity_type` and `kind` stay plain strings so one malformed operation is
/// rejected (and audited) individually instead of failing the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OperationEnvelope {
    /// Device-generated idempotency key, unique per logical edit
    pub operation_id: Uuid,
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub kind: String,
    /// New field values; required for create/update, ignored for delete
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Device clock reading at the moment of the edit
    pub client_timestamp: DateTime<Utc>,
    /// The `last_modified_at` the device last saw for this entity, if any
    #[serde(default)]
    pub based_on: Option<DateTime<Utc>>,
}

impl From<OperationEnvelope> for SyncOperation {
    fn from(envelope: OperationEnvelope) -> Self {
        SyncOperation {
            operation_id: envelope.operation_id,
            device_id: envelope.device_id,
            user_id: envelope.user_id,
            entity_type: envelope.entity_type,
            entity_id: envelope.entity_id,
            kind: envelope.kind,
            payload: envelope.payload,
            client_timestamp: envelope.client_timestamp,
            based_on: envelope.based_on,
        }
    }
}

/// Batch submission request from a device
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitBatchRequest {
    pub operations: Vec<OperationEnvelope>,
}

/// Per-operation outcome report, in submission order
#[derive(Debug, Serialize, ToSchema)]
pub struct OperationReport {
    pub operation_id: Uuid,
    pub outcome: String,
    pub conflict_detected: bool,
    pub resolution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Entity timestamp after an applied write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_last_modified_at: Option<DateTime<Utc>>,
    pub server_timestamp: DateTime<Utc>,
}

impl From<OperationResult> for OperationReport {
    fn from(result: OperationResult) -> Self {
        OperationReport {
            operation_id: result.operation_id,
            outcome: result.outcome.as_str().to_string(),
            conflict_detected: result.conflict_detected,
            resolution: result.resolution.as_str().to_string(),
            reject_reason: result.reject_reason.map(|r| r.as_str().to_string()),
            detail: result.detail,
            new_last_modified_at: result.new_last_modified_at,
            server_timestamp: result.server_timestamp,
        }
    }
}

/// Batch submission response
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitBatchResponse {
    pub results: Vec<OperationReport>,
}

/// Delta pull query parameters
#[derive(Debug, Deserialize, IntoParams)]
pub struct ChangesParams {
    /// Cursor from a previous pull; omit to start from the beginning
    pub checkpoint: Option<String>,
    /// Comma-separated entity type filter, e.g. `client,visit`
    pub entity_types: Option<String>,
    /// Maximum number of rows in the page
    pub page_size: Option<i64>,
}

/// A live entity in a delta page
#[derive(Debug, Serialize, ToSchema)]
pub struct ChangeEntry {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub payload: serde_json::Value,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by_device: Uuid,
}

impl From<EntitySnapshot> for ChangeEntry {
    fn from(snapshot: EntitySnapshot) -> Self {
        ChangeEntry {
            entity_type: snapshot.entity_type.as_str().to_string(),
            entity_id: snapshot.entity_id,
            payload: snapshot.payload,
            last_modified_at: snapshot.last_modified_at,
            last_modified_by_device: snapshot.last_modified_by_device,
        }
    }
}

/// A soft-delete marker in a delta page
#[derive(Debug, Serialize, ToSchema)]
pub struct TombstoneEntry {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

impl From<Tombstone> for TombstoneEntry {
    fn from(tombstone: Tombstone) -> Self {
        TombstoneEntry {
            entity_type: tombstone.entity_type.as_str().to_string(),
            entity_id: tombstone.entity_id,
            deleted_at: tombstone.deleted_at,
        }
    }
}

/// Delta pull response
#[derive(Debug, Serialize, ToSchema)]
pub struct ChangesResponse {
    pub changes: Vec<ChangeEntry>,
    pub tombstones: Vec<TombstoneEntry>,
    /// Cursor to pass on the next pull
    pub next_checkpoint: String,
}

/// Per-entity sync status response
#[derive(Debug, Serialize, ToSchema)]
pub struct EntityStatusResponse {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl From<EntityStatus> for EntityStatusResponse {
    fn from(status: EntityStatus) -> Self {
        EntityStatusResponse {
            entity_type: status.entity_type.as_str().to_string(),
            entity_id: status.entity_id,
            status: status.status.as_str().to_string(),
            updated_at: status.updated_at,
        }
    }
}

/// Submit a batch of device operations
///
/// Operations are processed strictly in submission order, each in its own
/// transaction. Every operation receives an explicit outcome; resubmitting
/// the same batch is safe and yields `duplicate` outcomes for already
/// applied operations.
#[utoipa::path(
    post,
    path = "/api/v1/sync/batch",
    request_body = SubmitBatchRequest,
    responses(
        (status = 200, description = "Batch processed, per-operation outcomes returned", body = SubmitBatchResponse),
        (status = 503, description = "Transient storage failure; resubmit the batch"),
        (status = 500, description = "Internal server error")
    ),
    tag = "sync"
)]
pub async fn submit_batch(
    State(server): State<CareLinkServer>,
    Json(request): Json<SubmitBatchRequest>,
) -> Result<Json<ApiResponse<SubmitBatchResponse>>, ApiError> {
    tracing::info!(operations = request.operations.len(), "Sync batch received");

    let batch: Vec<SyncOperation> = request.operations.into_iter().map(Into::into).collect();
    let results = server.engine.submit_batch(&batch).await?;

    let response = SubmitBatchResponse {
        results: results.into_iter().map(Into::into).collect(),
    };

    Ok(Json(api_success(response)))
}

/// Pull changes committed since a checkpoint
///
/// Returns live entities and tombstones in a stable `(last_modified_at,
/// entity_id)` order. Repeating a pull with the same checkpoint returns the
/// same page; passing `next_checkpoint` resumes where the page ended.
#[utoipa::path(
    get,
    path = "/api/v1/sync/changes",
    params(ChangesParams),
    responses(
        (status = 200, description = "Page of changes since the checkpoint", body = ChangesResponse),
        (status = 400, description = "Malformed checkpoint or entity type filter"),
        (status = 500, description = "Internal server error")
    ),
    tag = "sync"
)]
pub async fn pull_changes(
    State(server): State<CareLinkServer>,
    Query(params): Query<ChangesParams>,
) -> Result<Json<ApiResponse<ChangesResponse>>, ApiError> {
    let entity_types = match params.entity_types.as_deref() {
        Some(raw) => Some(parse_entity_types(raw)?),
        None => None,
    };

    let page = server
        .engine
        .pull_changes(
            params.checkpoint.as_deref(),
            entity_types.as_deref(),
            params.page_size.unwrap_or(0),
        )
        .await?;

    let response = ChangesResponse {
        changes: page.changes.into_iter().map(Into::into).collect(),
        tombstones: page.tombstones.into_iter().map(Into::into).collect(),
        next_checkpoint: page.next_checkpoint.encode(),
    };

    Ok(Json(api_success(response)))
}

/// Current sync status of one entity
#[utoipa::path(
    get,
    path = "/api/v1/sync/status/{entity_type}/{entity_id}",
    params(
        ("entity_type" = String, Path, description = "Entity type, e.g. `client` or `visit`"),
        ("entity_id" = Uuid, Path, description = "Entity ID")
    ),
    responses(
        (status = 200, description = "Current sync status", body = EntityStatusResponse),
        (status = 400, description = "Unknown entity type"),
        (status = 404, description = "No sync status recorded for this entity"),
        (status = 500, description = "Internal server error")
    ),
    tag = "sync"
)]
pub async fn entity_status(
    State(server): State<CareLinkServer>,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
) -> Result<Json<ApiResponse<EntityStatusResponse>>, ApiError> {
    let kind = EntityKind::from_str(&entity_type)?;

    let status = server
        .engine
        .entity_status(kind, entity_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!("sync status for {} {}", entity_type, entity_id))
        })?;

    Ok(Json(api_success(status.into())))
}

fn parse_entity_types(raw: &str) -> Result<Vec<EntityKind>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| EntityKind::from_str(part).map_err(ApiError::from))
        .collect()
}
