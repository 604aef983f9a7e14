//! Append-only ledger of every sync operation ever submitted.
//!
//! One row per consumed operation id, written in the same transaction as the
//! apply it describes. Rows are never updated or deleted; growth is handled
//! by archiving whole time windows, never by compacting in place. The ledger
//! is the authoritative record of who touched what, from which device, and
//! why a conflict resolved the way it did.

use crate::error::{SyncError, SyncResult};
use crate::store::{is_unique_violation, parse_uuid};
use crate::types::{
    datetime_to_micros, micros_to_datetime, EntityKind, OperationOutcome, RejectReason,
    Resolution, SyncOperationRecord,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

/// Filters and pagination for ledger review queries.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub user_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub entity_type: Option<EntityKind>,
    pub entity_id: Option<Uuid>,
    /// Inclusive lower bound on server processing time.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on server processing time.
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            device_id: None,
            entity_type: None,
            entity_id: None,
            from: None,
            to: None,
            limit: 50,
            offset: 0,
        }
    }
}

pub struct AuditLedger;

impl AuditLedger {
    /// Append one record. Fails transiently when another request consumed
    /// the same operation id first; the caller re-runs its guard check and
    /// replays the committed outcome instead.
    pub async fn record(
        conn: &mut SqliteConnection,
        record: &SyncOperationRecord,
    ) -> SyncResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_operations (
                operation_id, user_id, device_id, operation_kind, entity_type,
                entity_id, payload, client_timestamp, server_timestamp,
                conflict_detected, resolution, outcome, reject_reason, detail
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.operation_id.to_string())
        .bind(record.user_id.to_string())
        .bind(record.device_id.to_string())
        .bind(&record.operation_kind)
        .bind(&record.entity_type)
        .bind(record.entity_id.to_string())
        .bind(record.payload.as_ref().map(|p| p.to_string()))
        .bind(datetime_to_micros(record.client_timestamp))
        .bind(datetime_to_micros(record.server_timestamp))
        .bind(record.conflict_detected as i32)
        .bind(record.resolution.as_str())
        .bind(record.outcome.as_str())
        .bind(record.reject_reason.map(|r| r.as_str()))
        .bind(record.detail.as_deref())
        .execute(conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(SyncError::Transient(format!(
                "Operation {} was recorded concurrently",
                record.operation_id
            ))),
            Err(err) => Err(SyncError::Database(err)),
        }
    }

    /// Filtered, paginated review query, newest first.
    pub async fn query(
        pool: &SqlitePool,
        query: &AuditQuery,
    ) -> SyncResult<Vec<SyncOperationRecord>> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT operation_id, user_id, device_id, operation_kind, \
             entity_type, entity_id, payload, client_timestamp, \
             server_timestamp, conflict_detected, resolution, outcome, \
             reject_reason, detail FROM sync_operations WHERE 1 = 1",
        );
        push_filters(&mut builder, query);
        builder.push(" ORDER BY server_timestamp DESC, operation_id DESC LIMIT ");
        builder.push_bind(query.limit);
        builder.push(" OFFSET ");
        builder.push_bind(query.offset);

        let rows = builder.build().fetch_all(pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Total rows matching the query's filters, ignoring pagination.
    pub async fn count(pool: &SqlitePool, query: &AuditQuery) -> SyncResult<i64> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT COUNT(*) AS total FROM sync_operations WHERE 1 = 1",
        );
        push_filters(&mut builder, query);

        let row = builder.build().fetch_one(pool).await?;
        Ok(row.try_get("total")?)
    }
}

fn push_filters(builder: &mut sqlx::QueryBuilder<'_, sqlx::Sqlite>, query: &AuditQuery) {
    if let Some(user_id) = query.user_id {
        builder.push(" AND user_id = ");
        builder.push_bind(user_id.to_string());
    }
    if let Some(device_id) = query.device_id {
        builder.push(" AND device_id = ");
        builder.push_bind(device_id.to_string());
    }
    if let Some(entity_type) = query.entity_type {
        builder.push(" AND entity_type = ");
        builder.push_bind(entity_type.as_str());
    }
    if let Some(entity_id) = query.entity_id {
        builder.push(" AND entity_id = ");
        builder.push_bind(entity_id.to_string());
    }
    if let Some(from) = query.from {
        builder.push(" AND server_timestamp >= ");
        builder.push_bind(datetime_to_micros(from));
    }
    if let Some(to) = query.to {
        builder.push(" AND server_timestamp < ");
        builder.push_bind(datetime_to_micros(to));
    }
}

pub(crate) fn record_from_row(row: &SqliteRow) -> SyncResult<SyncOperationRecord> {
    let operation_id: String = row.try_get("operation_id")?;
    let user_id: String = row.try_get("user_id")?;
    let device_id: String = row.try_get("device_id")?;
    let entity_id: String = row.try_get("entity_id")?;
    let payload: Option<String> = row.try_get("payload")?;
    let client_timestamp: i64 = row.try_get("client_timestamp")?;
    let server_timestamp: i64 = row.try_get("server_timestamp")?;
    let conflict_detected: i64 = row.try_get("conflict_detected")?;
    let resolution: String = row.try_get("resolution")?;
    let outcome: String = row.try_get("outcome")?;
    let reject_reason: Option<String> = row.try_get("reject_reason")?;

    Ok(SyncOperationRecord {
        operation_id: parse_uuid(&operation_id)?,
        user_id: parse_uuid(&user_id)?,
        device_id: parse_uuid(&device_id)?,
        operation_kind: row.try_get("operation_kind")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: parse_uuid(&entity_id)?,
        payload: payload.map(|p| serde_json::from_str(&p)).transpose()?,
        client_timestamp: micros_to_datetime(client_timestamp)?,
        server_timestamp: micros_to_datetime(server_timestamp)?,
        conflict_detected: conflict_detected != 0,
        resolution: Resolution::from_str(&resolution)?,
        outcome: OperationOutcome::from_str(&outcome)?,
        reject_reason: reject_reason
            .map(|r| RejectReason::from_str(&r))
            .transpose()?,
        detail: row.try_get("detail")?,
    })
}
