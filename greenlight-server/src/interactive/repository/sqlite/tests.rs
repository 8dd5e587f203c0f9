use super::*;
use crate::interactive::model::ArtifactType;
use crate::interactive::model::SupervisorReviewPayload;
use chrono::Duration as ChronoDuration;
use greenlight_core::review::{LlmReview, ReviewVerdict};
use std::path::PathBuf;

fn second_precision(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap()
}

fn full_payload() -> StatePayload {
    StatePayload::SupervisorReview(SupervisorReviewPayload {
        artifact_type: ArtifactType::ServicenowWorkNote,
        case_number: Some("CS0012345".to_string()),
        channel_id: Some("C123".to_string()),
        thread_ts: Some("1700000000.000100".to_string()),
        content: "Customer confirmed the workaround restored service.".to_string(),
        reason: "critical verdict".to_string(),
        metadata: Some(serde_json::json!({ "sysId": "abc123def456" })),
        blocked_at: Utc::now(),
        llm_review: Some(LlmReview {
            verdict: ReviewVerdict::Critical,
            confidence: 0.91,
            summary: "Promises a refund the agent cannot authorize".to_string(),
            issues: vec![],
        }),
    })
}

fn pending_state(channel_id: &str, message_ts: &str) -> InteractiveState {
    let now = second_precision(Utc::now());
    InteractiveState {
        id: StateId::generate(),
        state_type: StateType::SupervisorReview,
        channel_id: channel_id.to_string(),
        message_ts: message_ts.to_string(),
        thread_ts: Some("1700000000.000100".to_string()),
        payload: full_payload(),
        status: StateStatus::Pending,
        version: 1,
        created_at: now,
        expires_at: now + ChronoDuration::hours(24),
        processed_by: None,
        processed_at: None,
        error_message: None,
        metadata: Some(serde_json::json!({ "workflowRunId": "run-42" })),
    }
}

fn approval(reviewer: &str) -> ProcessedUpdate {
    ProcessedUpdate {
        status: StateStatus::Approved,
        processed_by: reviewer.to_string(),
        processed_at: second_precision(Utc::now()),
        error_message: None,
    }
}

fn temp_db() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("states.db");
    (dir, path)
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let (_dir, path) = temp_db();
    let state = pending_state("C1", "111.000");

    {
        let repo = SqliteRepository::new(&path).unwrap();
        repo.save(&state).await.unwrap();
    }

    let repo = SqliteRepository::new(&path).unwrap();
    let fetched = repo.get_by_id(&state.id).await.unwrap().unwrap();
    assert_eq!(fetched, state);
}

#[tokio::test]
async fn test_in_memory_database_round_trips() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let state = pending_state("C1", "111.000");
    repo.save(&state).await.unwrap();
    let fetched = repo.get_by_id(&state.id).await.unwrap().unwrap();
    assert_eq!(fetched, state);
}

#[tokio::test]
async fn test_save_replaces_row_at_same_anchor() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let first = pending_state("C1", "111.000");
    repo.save(&first).await.unwrap();

    let second = pending_state("C1", "111.000");
    repo.save(&second).await.unwrap();

    assert!(repo.get_by_id(&first.id).await.unwrap().is_none());
    assert!(repo.get_by_id(&second.id).await.unwrap().is_some());

    let listed = repo
        .list_pending_by_type(&StateType::SupervisorReview, Utc::now())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, second.id);
}

#[tokio::test]
async fn test_mark_processed_commits_exactly_once() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let state = pending_state("C1", "111.000");
    repo.save(&state).await.unwrap();

    let update = approval("alice");
    assert!(repo.mark_processed("C1", "111.000", &update).await.unwrap());
    assert!(!repo
        .mark_processed("C1", "111.000", &approval("bob"))
        .await
        .unwrap());

    let stored = repo.get_by_id(&state.id).await.unwrap().unwrap();
    assert_eq!(stored.status, StateStatus::Approved);
    assert_eq!(stored.processed_by.as_deref(), Some("alice"));
    assert_eq!(stored.processed_at, Some(update.processed_at));
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn test_mark_processed_requires_pending_status() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let mut state = pending_state("C1", "111.000");
    state.status = StateStatus::Rejected;
    repo.save(&state).await.unwrap();

    assert!(!repo
        .mark_processed("C1", "111.000", &approval("alice"))
        .await
        .unwrap());
    assert!(!repo
        .mark_processed("C1", "999.000", &approval("alice"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_pending_lookup_filters_status_type_and_expiry() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let now = second_precision(Utc::now());

    let mut expired = pending_state("C1", "111.000");
    expired.expires_at = now - ChronoDuration::minutes(1);
    repo.save(&expired).await.unwrap();

    let mut foreign = pending_state("C1", "222.000");
    foreign.state_type = StateType::Other("todo_confirmation".to_string());
    repo.save(&foreign).await.unwrap();

    let live = pending_state("C1", "333.000");
    repo.save(&live).await.unwrap();

    assert!(repo
        .get_pending_by_channel_message("C1", "111.000", None, now)
        .await
        .unwrap()
        .is_none());
    assert!(repo
        .get_pending_by_channel_message("C1", "222.000", Some(&StateType::SupervisorReview), now)
        .await
        .unwrap()
        .is_none());
    assert!(repo
        .get_pending_by_channel_message("C1", "222.000", None, now)
        .await
        .unwrap()
        .is_some());

    let found = repo
        .get_pending_by_channel_message("C1", "333.000", Some(&StateType::SupervisorReview), now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, live.id);

    // Expired rows also vanish from the id-less listing even though the
    // cleanup sweep has not run yet.
    let listed = repo
        .list_pending_by_type(&StateType::SupervisorReview, now)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_list_pending_returns_newest_first() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let now = second_precision(Utc::now());

    let mut oldest = pending_state("C1", "111.000");
    oldest.created_at = now - ChronoDuration::hours(3);
    let mut middle = pending_state("C1", "222.000");
    middle.created_at = now - ChronoDuration::hours(2);
    let mut newest = pending_state("C1", "333.000");
    newest.created_at = now - ChronoDuration::hours(1);

    for state in [&middle, &oldest, &newest] {
        repo.save(state).await.unwrap();
    }

    let listed = repo
        .list_pending_by_type(&StateType::SupervisorReview, now)
        .await
        .unwrap();
    let ids: Vec<&StateId> = listed.iter().map(|s| &s.id).collect();
    assert_eq!(ids, vec![&newest.id, &middle.id, &oldest.id]);
}

#[tokio::test]
async fn test_update_payload_merges_and_bumps_version() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let state = pending_state("C1", "111.000");
    repo.save(&state).await.unwrap();

    let merged = repo
        .update_payload(
            "C1",
            "111.000",
            &serde_json::json!({ "content": "Edited reply" }),
        )
        .await
        .unwrap();
    assert!(merged);

    let stored = repo.get_by_id(&state.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    let payload = stored.payload.as_supervisor_review().unwrap();
    assert_eq!(payload.content, "Edited reply");
    assert_eq!(payload.case_number.as_deref(), Some("CS0012345"));
}

#[tokio::test]
async fn test_update_payload_rejects_missing_anchor_and_non_object() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let state = pending_state("C1", "111.000");
    repo.save(&state).await.unwrap();

    assert!(!repo
        .update_payload("C1", "999.000", &serde_json::json!({ "content": "x" }))
        .await
        .unwrap());
    assert!(!repo
        .update_payload("C1", "111.000", &serde_json::json!(42))
        .await
        .unwrap());

    let stored = repo.get_by_id(&state.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn test_delete_expired_removes_rows_regardless_of_status() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let now = second_precision(Utc::now());

    let mut expired_pending = pending_state("C1", "111.000");
    expired_pending.expires_at = now - ChronoDuration::hours(1);
    let mut expired_approved = pending_state("C1", "222.000");
    expired_approved.status = StateStatus::Approved;
    expired_approved.expires_at = now - ChronoDuration::minutes(5);
    let live = pending_state("C1", "333.000");

    for state in [&expired_pending, &expired_approved, &live] {
        repo.save(state).await.unwrap();
    }

    assert_eq!(repo.delete_expired(now).await.unwrap(), 2);
    assert_eq!(repo.delete_expired(now).await.unwrap(), 0);
    assert!(repo.get_by_id(&live.id).await.unwrap().is_some());
    assert!(repo
        .get_by_id(&expired_pending.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_corrupt_payload_surfaces_on_get_but_not_listing() {
    let (_dir, path) = temp_db();
    let repo = SqliteRepository::new(&path).unwrap();

    let corrupt = pending_state("C1", "111.000");
    let good = pending_state("C1", "222.000");
    repo.save(&corrupt).await.unwrap();
    repo.save(&good).await.unwrap();

    // Damage one row from a second connection, as an external writer would.
    let raw = Connection::open(&path).unwrap();
    raw.execute(
        "UPDATE interactive_states SET payload_json = 'not json' WHERE id = ?1",
        params![corrupt.id.as_str()],
    )
    .unwrap();

    let err = repo.get_by_id(&corrupt.id).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Corruption { .. }));

    let listed = repo
        .list_pending_by_type(&StateType::SupervisorReview, Utc::now())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, good.id);
}

#[tokio::test]
async fn test_rejects_database_from_newer_binary() {
    let (_dir, path) = temp_db();
    {
        let _repo = SqliteRepository::new(&path).unwrap();
    }

    let raw = Connection::open(&path).unwrap();
    raw.execute("UPDATE schema_version SET version = 99", [])
        .unwrap();
    drop(raw);

    let err = SqliteRepository::new(&path).unwrap_err();
    assert!(err.to_string().contains("newer"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_database_file_permissions_are_restrictive() {
    use std::os::unix::fs::PermissionsExt;

    let (_dir, path) = temp_db();
    let _repo = SqliteRepository::new(&path).unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}
