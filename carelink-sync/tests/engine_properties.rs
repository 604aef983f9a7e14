//! End-to-end behavior of the sync engine: idempotent batch intake,
//! conflict resolution, tombstone propagation, and checkpointed pulls.

use carelink_sync::{
    AuditQuery, EntityKind, OperationOutcome, RejectReason, Resolution, SyncEngine, SyncOperation,
    SyncStatus,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tempfile::NamedTempFile;
use uuid::Uuid;

async fn engine() -> (NamedTempFile, SyncEngine) {
    let temp_file = NamedTempFile::new().unwrap();
    let engine = SyncEngine::new(temp_file.path().to_str().unwrap())
        .await
        .unwrap();
    (temp_file, engine)
}

fn ts(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap()
}

fn client_payload(first_name: &str) -> serde_json::Value {
    json!({"first_name": first_name, "last_name": "Tierney"})
}

fn operation(
    entity_id: Uuid,
    kind: &str,
    stamp: i64,
    based_on: Option<i64>,
    payload: Option<serde_json::Value>,
) -> SyncOperation {
    SyncOperation {
        operation_id: Uuid::new_v4(),
        device_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        entity_type: "client".to_string(),
        entity_id,
        kind: kind.to_string(),
        payload,
        client_timestamp: ts(stamp),
        based_on: based_on.map(ts),
    }
}

fn create(entity_id: Uuid, stamp: i64, payload: serde_json::Value) -> SyncOperation {
    operation(entity_id, "create", stamp, None, Some(payload))
}

fn update(
    entity_id: Uuid,
    stamp: i64,
    based_on: i64,
    payload: serde_json::Value,
) -> SyncOperation {
    operation(entity_id, "update", stamp, Some(based_on), Some(payload))
}

fn delete(entity_id: Uuid, stamp: i64, based_on: i64) -> SyncOperation {
    operation(entity_id, "delete", stamp, Some(based_on), None)
}

#[tokio::test]
async fn test_clean_create_is_applied() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    let results = engine
        .submit_batch(&[create(entity_id, 1_000, client_payload("Ada"))])
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, OperationOutcome::Applied);
    assert!(!results[0].conflict_detected);
    assert_eq!(results[0].resolution, Resolution::None);
    assert_eq!(results[0].new_last_modified_at, Some(ts(1_000)));

    let status = engine
        .entity_status(EntityKind::Client, entity_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.status, SyncStatus::Synced);

    let page = engine.pull_changes(None, None, 10).await.unwrap();
    assert_eq!(page.changes.len(), 1);
    assert_eq!(page.changes[0].last_modified_at, ts(1_000));
    assert_eq!(page.changes[0].payload["first_name"], "Ada");
}

#[tokio::test]
async fn test_resubmitted_batch_is_idempotent() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    let batch = vec![
        create(entity_id, 1_000, client_payload("Ada")),
        update(entity_id, 2_000, 1_000, client_payload("Ada Marie")),
    ];

    let first = engine.submit_batch(&batch).await.unwrap();
    assert!(first
        .iter()
        .all(|r| r.outcome == OperationOutcome::Applied));
    let state_after_first = engine.pull_changes(None, None, 10).await.unwrap();

    let second = engine.submit_batch(&batch).await.unwrap();
    assert!(second
        .iter()
        .all(|r| r.outcome == OperationOutcome::Duplicate));

    // Nothing moved: same page, same versions, one ledger row per operation.
    let state_after_second = engine.pull_changes(None, None, 10).await.unwrap();
    assert_eq!(state_after_first.changes.len(), state_after_second.changes.len());
    assert_eq!(
        state_after_first.changes[0].last_modified_at,
        state_after_second.changes[0].last_modified_at
    );
    assert_eq!(state_after_second.changes[0].payload["first_name"], "Ada Marie");

    let (_, total) = engine
        .query_audit(&AuditQuery {
            entity_id: Some(entity_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_duplicate_within_one_batch() {
    let (_guard, engine) = engine().await;
    let op = create(Uuid::new_v4(), 1_000, client_payload("Ada"));

    let results = engine
        .submit_batch(&[op.clone(), op])
        .await
        .unwrap();

    assert_eq!(results[0].outcome, OperationOutcome::Applied);
    assert_eq!(results[1].outcome, OperationOutcome::Duplicate);
}

#[tokio::test]
async fn test_losing_conflict_is_rejected_as_superseded() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    engine
        .submit_batch(&[create(entity_id, 2_000, client_payload("Current"))])
        .await
        .unwrap();

    // Stale basis and an earlier timestamp: the stored write stays.
    let results = engine
        .submit_batch(&[update(entity_id, 1_500, 1_000, client_payload("Stale"))])
        .await
        .unwrap();

    assert_eq!(results[0].outcome, OperationOutcome::Rejected);
    assert!(results[0].conflict_detected);
    assert_eq!(results[0].resolution, Resolution::Superseded);
    assert_eq!(results[0].reject_reason, Some(RejectReason::Superseded));

    let page = engine.pull_changes(None, None, 10).await.unwrap();
    assert_eq!(page.changes[0].payload["first_name"], "Current");
    assert_eq!(page.changes[0].last_modified_at, ts(2_000));

    let status = engine
        .entity_status(EntityKind::Client, entity_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.status, SyncStatus::Conflict);
}

#[tokio::test]
async fn test_winning_conflict_is_applied() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    engine
        .submit_batch(&[create(entity_id, 2_000, client_payload("Old"))])
        .await
        .unwrap();

    // Stale basis but a later timestamp: the incoming write replaces.
    let results = engine
        .submit_batch(&[update(entity_id, 3_000, 1_000, client_payload("New"))])
        .await
        .unwrap();

    assert_eq!(results[0].outcome, OperationOutcome::Applied);
    assert!(results[0].conflict_detected);
    assert_eq!(results[0].resolution, Resolution::Accepted);
    assert_eq!(results[0].new_last_modified_at, Some(ts(3_000)));

    let page = engine.pull_changes(None, None, 10).await.unwrap();
    assert_eq!(page.changes[0].payload["first_name"], "New");

    let status = engine
        .entity_status(EntityKind::Client, entity_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_equal_timestamp_conflicts_converge_in_either_order() {
    let entity_id = Uuid::new_v4();
    let base = create(entity_id, 1_000, client_payload("Base"));

    let mut op_a = update(entity_id, 2_000, 1_000, client_payload("FromTablet"));
    op_a.device_id = Uuid::from_u128(1);
    let mut op_b = update(entity_id, 2_000, 1_000, client_payload("FromPhone"));
    op_b.device_id = Uuid::from_u128(2);

    let (_g1, engine_one) = engine().await;
    engine_one.submit_batch(&[base.clone()]).await.unwrap();
    engine_one.submit_batch(&[op_a.clone()]).await.unwrap();
    engine_one.submit_batch(&[op_b.clone()]).await.unwrap();

    let (_g2, engine_two) = engine().await;
    engine_two.submit_batch(&[base]).await.unwrap();
    engine_two.submit_batch(&[op_b]).await.unwrap();
    engine_two.submit_batch(&[op_a]).await.unwrap();

    let final_one = engine_one.pull_changes(None, None, 10).await.unwrap();
    let final_two = engine_two.pull_changes(None, None, 10).await.unwrap();

    // The greater (device_id, operation_id) pair wins on both replicas.
    assert_eq!(final_one.changes[0].payload["first_name"], "FromPhone");
    assert_eq!(final_two.changes[0].payload["first_name"], "FromPhone");
    assert_eq!(
        final_one.changes[0].last_modified_by_device,
        final_two.changes[0].last_modified_by_device
    );
}

#[tokio::test]
async fn test_last_modified_never_decreases() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    engine
        .submit_batch(&[create(entity_id, 1_000, client_payload("One"))])
        .await
        .unwrap();

    // A clean edit with an earlier clock still moves the version forward.
    let results = engine
        .submit_batch(&[update(entity_id, 900, 1_000, client_payload("Two"))])
        .await
        .unwrap();
    assert_eq!(results[0].outcome, OperationOutcome::Applied);
    assert_eq!(results[0].new_last_modified_at, Some(ts(1_001)));

    // A losing write leaves the version untouched.
    engine
        .submit_batch(&[update(entity_id, 500, 100, client_payload("Three"))])
        .await
        .unwrap();

    let page = engine.pull_changes(None, None, 10).await.unwrap();
    assert_eq!(page.changes[0].last_modified_at, ts(1_001));
    assert_eq!(page.changes[0].payload["first_name"], "Two");
}

#[tokio::test]
async fn test_tombstone_visibility_across_checkpoints() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    engine
        .submit_batch(&[create(entity_id, 1_000, client_payload("Ada"))])
        .await
        .unwrap();
    let before_delete = engine.pull_changes(None, None, 10).await.unwrap();
    let checkpoint = before_delete.next_checkpoint.encode();

    let results = engine
        .submit_batch(&[delete(entity_id, 2_000, 1_000)])
        .await
        .unwrap();
    assert_eq!(results[0].outcome, OperationOutcome::Applied);

    let after_delete = engine
        .pull_changes(Some(&checkpoint), None, 10)
        .await
        .unwrap();
    assert!(after_delete.changes.is_empty());
    assert_eq!(after_delete.tombstones.len(), 1);
    assert_eq!(after_delete.tombstones[0].entity_id, entity_id);

    // Once the checkpoint advances past the delete, it is never replayed.
    let beyond = engine
        .pull_changes(Some(&after_delete.next_checkpoint.encode()), None, 10)
        .await
        .unwrap();
    assert!(beyond.changes.is_empty());
    assert!(beyond.tombstones.is_empty());
}

#[tokio::test]
async fn test_later_update_wins_over_tombstone() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    engine
        .submit_batch(&[create(entity_id, 1_000, client_payload("Ada"))])
        .await
        .unwrap();
    engine
        .submit_batch(&[delete(entity_id, 2_000, 1_000)])
        .await
        .unwrap();

    // An update from a device that never saw the delete, with a later clock.
    let results = engine
        .submit_batch(&[update(entity_id, 3_000, 1_000, client_payload("Back"))])
        .await
        .unwrap();
    assert_eq!(results[0].outcome, OperationOutcome::Applied);
    assert!(results[0].conflict_detected);

    let page = engine.pull_changes(None, None, 10).await.unwrap();
    assert_eq!(page.changes.len(), 1);
    assert_eq!(page.changes[0].payload["first_name"], "Back");
    assert!(page.tombstones.is_empty());
}

#[tokio::test]
async fn test_pagination_is_resumable_and_complete() {
    let (_guard, engine) = engine().await;
    let mut ids = Vec::new();
    for i in 0..5 {
        let entity_id = Uuid::new_v4();
        ids.push(entity_id);
        engine
            .submit_batch(&[create(entity_id, 1_000 + i, client_payload("Page"))])
            .await
            .unwrap();
    }

    // Same checkpoint, same page.
    let once = engine.pull_changes(None, None, 2).await.unwrap();
    let again = engine.pull_changes(None, None, 2).await.unwrap();
    let page_ids =
        |p: &carelink_sync::DeltaPage| p.changes.iter().map(|c| c.entity_id).collect::<Vec<_>>();
    assert_eq!(page_ids(&once), page_ids(&again));

    // Walking pages to the end visits every entity exactly once.
    let mut seen = Vec::new();
    let mut checkpoint: Option<String> = None;
    loop {
        let page = engine
            .pull_changes(checkpoint.as_deref(), None, 2)
            .await
            .unwrap();
        if page.changes.is_empty() && page.tombstones.is_empty() {
            break;
        }
        seen.extend(page.changes.iter().map(|c| c.entity_id));
        checkpoint = Some(page.next_checkpoint.encode());
    }
    assert_eq!(seen.len(), 5);
    for id in ids {
        assert!(seen.contains(&id));
    }
}

#[tokio::test]
async fn test_partial_batch_failure_and_resubmission() {
    let (_guard, engine) = engine().await;
    let first_id = Uuid::new_v4();
    let third_id = Uuid::new_v4();

    let mut malformed = create(Uuid::new_v4(), 1_500, json!({"anything": 1}));
    malformed.entity_type = "invoice".to_string();

    let batch = vec![
        create(first_id, 1_000, client_payload("One")),
        malformed,
        create(third_id, 2_000, client_payload("Three")),
    ];

    let first_run = engine.submit_batch(&batch).await.unwrap();
    assert_eq!(first_run[0].outcome, OperationOutcome::Applied);
    assert_eq!(first_run[1].outcome, OperationOutcome::Rejected);
    assert_eq!(first_run[1].reject_reason, Some(RejectReason::Validation));
    assert_eq!(first_run[2].outcome, OperationOutcome::Applied);

    let second_run = engine.submit_batch(&batch).await.unwrap();
    assert_eq!(second_run[0].outcome, OperationOutcome::Duplicate);
    assert_eq!(second_run[1].outcome, OperationOutcome::Rejected);
    assert_eq!(second_run[1].reject_reason, Some(RejectReason::Validation));
    assert_eq!(second_run[1].detail, first_run[1].detail);
    assert_eq!(second_run[2].outcome, OperationOutcome::Duplicate);
}

#[tokio::test]
async fn test_create_then_update_in_one_batch() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    // The update depends on the create having landed within the same batch.
    let results = engine
        .submit_batch(&[
            create(entity_id, 1_000, client_payload("First")),
            update(entity_id, 2_000, 1_000, client_payload("Second")),
        ])
        .await
        .unwrap();

    assert_eq!(results[0].outcome, OperationOutcome::Applied);
    assert_eq!(results[1].outcome, OperationOutcome::Applied);
    assert!(!results[1].conflict_detected);

    let page = engine.pull_changes(None, None, 10).await.unwrap();
    assert_eq!(page.changes.len(), 1);
    assert_eq!(page.changes[0].payload["first_name"], "Second");
}

#[tokio::test]
async fn test_update_of_unknown_entity_is_rejected_and_audited() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    let results = engine
        .submit_batch(&[update(entity_id, 1_000, 500, client_payload("Ghost"))])
        .await
        .unwrap();

    assert_eq!(results[0].outcome, OperationOutcome::Rejected);
    assert_eq!(results[0].reject_reason, Some(RejectReason::NotFound));

    let (records, total) = engine
        .query_audit(&AuditQuery {
            entity_id: Some(entity_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(records[0].outcome, OperationOutcome::Rejected);

    // Nothing was written, so the entity has no status either.
    let status = engine
        .entity_status(EntityKind::Client, entity_id)
        .await
        .unwrap();
    assert!(status.is_none());
}

#[tokio::test]
async fn test_conflict_status_is_backed_by_ledger_record() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    engine
        .submit_batch(&[create(entity_id, 2_000, client_payload("Keep"))])
        .await
        .unwrap();
    engine
        .submit_batch(&[update(entity_id, 1_000, 500, client_payload("Lost"))])
        .await
        .unwrap();

    let status = engine
        .entity_status(EntityKind::Client, entity_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.status, SyncStatus::Conflict);

    let (records, _) = engine
        .query_audit(&AuditQuery {
            entity_id: Some(entity_id),
            ..Default::default()
        })
        .await
        .unwrap();
    let conflicted: Vec<_> = records.iter().filter(|r| r.conflict_detected).collect();
    assert_eq!(conflicted.len(), 1);
    assert_eq!(conflicted[0].resolution, Resolution::Superseded);
    assert_eq!(conflicted[0].outcome, OperationOutcome::Rejected);
}

#[tokio::test]
async fn test_competing_creates_for_the_same_id() {
    let (_guard, engine) = engine().await;
    let entity_id = Uuid::new_v4();

    engine
        .submit_batch(&[create(entity_id, 1_000, client_payload("First"))])
        .await
        .unwrap();

    // A second device invented the same id with a later clock.
    let results = engine
        .submit_batch(&[create(entity_id, 2_000, client_payload("Second"))])
        .await
        .unwrap();

    assert_eq!(results[0].outcome, OperationOutcome::Applied);
    assert!(results[0].conflict_detected);
    assert_eq!(results[0].resolution, Resolution::Accepted);

    let page = engine.pull_changes(None, None, 10).await.unwrap();
    assert_eq!(page.changes.len(), 1);
    assert_eq!(page.changes[0].payload["first_name"], "Second");
}
