//! Audit ledger review handlers
//!
//! Consumed by administrative tooling, not end-user devices.

use axum::{
    extract::{Query, State},
    Json,
};
use carelink_sync::{AuditQuery, EntityKind, SyncOperationRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{api_success_with_meta, ApiError, ApiResponse};
use crate::server::CareLinkServer;
use crate::types::PaginationParams;

/// Audit trail query parameters
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditListParams {
    pub user_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    /// Inclusive lower bound on the server timestamp
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the server timestamp
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// One consumed operation as recorded in the ledger
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditRecord {
    pub operation_id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub operation_kind: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub client_timestamp: DateTime<Utc>,
    pub server_timestamp: DateTime<Utc>,
    pub conflict_detected: bool,
    pub resolution: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<SyncOperationRecord> for AuditRecord {
    fn from(record: SyncOperationRecord) -> Self {
        AuditRecord {
            operation_id: record.operation_id,
            user_id: record.user_id,
            device_id: record.device_id,
            operation_kind: record.operation_kind,
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            payload: record.payload,
            client_timestamp: record.client_timestamp,
            server_timestamp: record.server_timestamp,
            conflict_detected: record.conflict_detected,
            resolution: record.resolution.as_str().to_string(),
            outcome: record.outcome.as_str().to_string(),
            reject_reason: record.reject_reason.map(|r| r.as_str().to_string()),
            detail: record.detail,
        }
    }
}

/// List consumed sync operations from the audit ledger
///
/// Results are ordered newest first and paginated; all filters combine
/// with AND semantics.
#[utoipa::path(
    get,
    path = "/api/v1/sync/audit",
    params(AuditListParams),
    responses(
        (status = 200, description = "Page of matching ledger records", body = Vec<AuditRecord>),
        (status = 400, description = "Unknown entity type filter"),
        (status = 500, description = "Internal server error")
    ),
    tag = "audit"
)]
pub async fn list_operations(
    State(server): State<CareLinkServer>,
    Query(params): Query<AuditListParams>,
) -> Result<Json<ApiResponse<Vec<AuditRecord>>>, ApiError> {
    let entity_type = match params.entity_type.as_deref() {
        Some(raw) => Some(EntityKind::from_str(raw)?),
        None => None,
    };

    let pagination = PaginationParams {
        page: params.page,
        page_size: params.page_size,
    };

    let query = AuditQuery {
        user_id: params.user_id,
        device_id: params.device_id,
        entity_type,
        entity_id: params.entity_id,
        from: params.from,
        to: params.to,
        limit: pagination.limit(),
        offset: pagination.offset(),
    };

    let (records, total_count) = server.engine.query_audit(&query).await?;

    let data: Vec<AuditRecord> = records.into_iter().map(Into::into).collect();
    let metadata = pagination.to_metadata(total_count);

    Ok(Json(api_success_with_meta(data, metadata)))
}
