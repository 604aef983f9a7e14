//! End-to-end tests for the sync HTTP API.
//!
//! Each test stands up the full router over a fresh temporary database and
//! drives it with raw requests, the way a device client would.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tower::ServiceExt;
use uuid::Uuid;

use carelink_server::{create_app, CareLinkServer};

struct TestConfig {
    app: Router,
    _db: NamedTempFile,
}

impl TestConfig {
    async fn new() -> Self {
        let db = NamedTempFile::new().expect("temp database file");
        let server = CareLinkServer::new(db.path().to_str().expect("utf-8 temp path"))
            .await
            .expect("server init");

        TestConfig {
            app: create_app(server),
            _db: db,
        }
    }
}

fn create_operation(entity_id: Uuid, device_id: Uuid, first_name: &str, timestamp: &str) -> Value {
    json!({
        "operation_id": Uuid::new_v4(),
        "device_id": device_id,
        "user_id": Uuid::new_v4(),
        "entity_type": "client",
        "entity_id": entity_id,
        "kind": "create",
        "payload": {"first_name": first_name, "last_name": "Tierney"},
        "client_timestamp": timestamp
    })
}

async fn post_batch(app: &Router, operations: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/sync/batch")
        .header("content-type", "application/json")
        .body(Body::from(json!({"operations": operations}).to_string()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    (status, body)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    (status, body)
}

#[tokio::test]
async fn test_health_check() {
    let config = TestConfig::new().await;

    let (status, body) = get_json(&config.app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"], "healthy");
}

#[tokio::test]
async fn test_submit_batch_applies_operations() {
    let config = TestConfig::new().await;

    let operation = create_operation(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "Moira",
        "2024-03-01T10:00:00Z",
    );
    let (status, body) = post_batch(&config.app, json!([operation])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let result = &body["data"]["results"][0];
    assert_eq!(result["outcome"], "applied");
    assert_eq!(result["conflict_detected"], false);
    assert_eq!(result["resolution"], "none");
    assert!(result["new_last_modified_at"].is_string());
}

#[tokio::test]
async fn test_submit_batch_reports_rejections() {
    let config = TestConfig::new().await;

    let mut operation = create_operation(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "Moira",
        "2024-03-01T10:00:00Z",
    );
    operation["entity_type"] = json!("invoice");

    let (status, body) = post_batch(&config.app, json!([operation])).await;

    // The batch call itself succeeds; the bad operation is reported inline
    assert_eq!(status, StatusCode::OK);
    let result = &body["data"]["results"][0];
    assert_eq!(result["outcome"], "rejected");
    assert_eq!(result["reject_reason"], "validation");
}

#[tokio::test]
async fn test_resubmitted_batch_returns_duplicates() {
    let config = TestConfig::new().await;

    let operation = create_operation(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "Moira",
        "2024-03-01T10:00:00Z",
    );
    let batch = json!([operation]);

    let (_, first) = post_batch(&config.app, batch.clone()).await;
    assert_eq!(first["data"]["results"][0]["outcome"], "applied");

    let (status, second) = post_batch(&config.app, batch).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["results"][0]["outcome"], "duplicate");
}

#[tokio::test]
async fn test_pull_changes_round_trip() {
    let config = TestConfig::new().await;

    let operation = create_operation(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "Moira",
        "2024-03-01T10:00:00Z",
    );
    post_batch(&config.app, json!([operation])).await;

    let (status, body) = get_json(&config.app, "/api/v1/sync/changes").await;
    assert_eq!(status, StatusCode::OK);

    let changes = body["data"]["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["payload"]["first_name"], "Moira");

    let checkpoint = body["data"]["next_checkpoint"].as_str().unwrap();
    assert!(!checkpoint.is_empty());

    // Nothing new beyond the returned cursor
    let uri = format!("/api/v1/sync/changes?checkpoint={}", checkpoint);
    let (status, body) = get_json(&config.app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["changes"].as_array().unwrap().is_empty());
    assert!(body["data"]["tombstones"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_pull_changes_rejects_bad_checkpoint() {
    let config = TestConfig::new().await;

    let (status, body) = get_json(&config.app, "/api/v1/sync/changes?checkpoint=garbage").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "validation_error");
    assert!(body["error_id"].is_string());
}

#[tokio::test]
async fn test_entity_status_endpoint() {
    let config = TestConfig::new().await;

    let entity_id = Uuid::new_v4();
    let operation = create_operation(entity_id, Uuid::new_v4(), "Moira", "2024-03-01T10:00:00Z");
    post_batch(&config.app, json!([operation])).await;

    let uri = format!("/api/v1/sync/status/client/{}", entity_id);
    let (status, body) = get_json(&config.app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "synced");
    assert_eq!(body["data"]["entity_type"], "client");

    let uri = format!("/api/v1/sync/status/client/{}", Uuid::new_v4());
    let (status, _) = get_json(&config.app, &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/api/v1/sync/status/invoice/{}", entity_id);
    let (status, _) = get_json(&config.app, &uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_audit_listing_with_filters() {
    let config = TestConfig::new().await;

    let device_id = Uuid::new_v4();
    let operation = create_operation(Uuid::new_v4(), device_id, "Moira", "2024-03-01T10:00:00Z");
    post_batch(&config.app, json!([operation])).await;

    let other = create_operation(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "Fergus",
        "2024-03-01T11:00:00Z",
    );
    post_batch(&config.app, json!([other])).await;

    let uri = format!("/api/v1/sync/audit?device_id={}", device_id);
    let (status, body) = get_json(&config.app, &uri).await;

    assert_eq!(status, StatusCode::OK);
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["device_id"], device_id.to_string());
    assert_eq!(body["metadata"]["total_count"], 1);
}

#[tokio::test]
async fn test_tombstone_in_changes() {
    let config = TestConfig::new().await;

    let entity_id = Uuid::new_v4();
    let device_id = Uuid::new_v4();
    let operation = create_operation(entity_id, device_id, "Moira", "2024-03-01T10:00:00Z");
    post_batch(&config.app, json!([operation])).await;

    let (_, body) = get_json(&config.app, "/api/v1/sync/changes").await;
    let checkpoint = body["data"]["next_checkpoint"]
        .as_str()
        .unwrap()
        .to_string();

    let delete = json!({
        "operation_id": Uuid::new_v4(),
        "device_id": device_id,
        "user_id": Uuid::new_v4(),
        "entity_type": "client",
        "entity_id": entity_id,
        "kind": "delete",
        "client_timestamp": "2024-03-01T11:00:00Z",
        "based_on": "2024-03-01T10:00:00Z"
    });
    let (_, body) = post_batch(&config.app, json!([delete])).await;
    assert_eq!(body["data"]["results"][0]["outcome"], "applied");

    let uri = format!("/api/v1/sync/changes?checkpoint={}", checkpoint);
    let (status, body) = get_json(&config.app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["changes"].as_array().unwrap().is_empty());

    let tombstones = body["data"]["tombstones"].as_array().unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0]["entity_id"], entity_id.to_string());
}
