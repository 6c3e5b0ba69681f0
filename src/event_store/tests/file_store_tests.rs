//! Unit tests for the file event store.

use crate::domain::types::{Epoch, RepoBinding, RepoRole, Stage, TimestampUtc};
use crate::domain::WorkflowEvent;
use crate::event_store::{FileEventStore, StoredEvent};
use cqrs_es::{AggregateError, DomainEvent, EventStore};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn store_for(root: &Path, workflow_id: &str, snapshot_every: u64) -> FileEventStore {
    FileEventStore::new(root, workflow_id, snapshot_every)
}

fn created_event() -> WorkflowEvent {
    WorkflowEvent::WorkflowCreated {
        goal: "Add rate limiting to the API".into(),
        context: String::new(),
        repos: vec![RepoBinding {
            owner: "acme".to_string(),
            repo: "api".to_string(),
            base_branch: "main".to_string(),
            role: RepoRole::Primary,
        }],
        created_at: TimestampUtc::now(),
    }
}

fn started_event(stage: Stage, epoch: u64) -> WorkflowEvent {
    WorkflowEvent::StageStarted {
        stage,
        epoch: Epoch(epoch),
        feedback: None,
        started_at: TimestampUtc::now(),
    }
}

#[tokio::test]
async fn load_from_missing_log_is_empty() {
    let dir = tempdir().expect("temp dir");
    let store = store_for(dir.path(), "wf-1", 0);

    let events = store.load_events("wf-1").await.expect("load");
    assert!(events.is_empty());

    let context = store.load_aggregate("wf-1").await.expect("load aggregate");
    assert_eq!(context.current_sequence, 0);
}

#[tokio::test]
async fn commit_lays_out_one_directory_per_workflow() {
    let dir = tempdir().expect("temp dir");
    let store = store_for(dir.path(), "wf-1", 0);

    let context = store.load_aggregate("wf-1").await.expect("load");
    store
        .commit(vec![created_event()], context, HashMap::new())
        .await
        .expect("commit");

    assert!(dir.path().join("wf-1").join("events.jsonl").is_file());
    assert_eq!(store.log_path(), dir.path().join("wf-1").join("events.jsonl"));
    assert_eq!(
        store.snapshot_path(),
        dir.path().join("wf-1").join("snapshot.json")
    );
}

#[tokio::test]
async fn commit_assigns_consecutive_sequences() {
    let dir = tempdir().expect("temp dir");
    let store = store_for(dir.path(), "wf-1", 0);

    let context = store.load_aggregate("wf-1").await.expect("load");
    let envelopes = store
        .commit(
            vec![created_event(), started_event(Stage::Feasibility, 1)],
            context,
            HashMap::new(),
        )
        .await
        .expect("commit");

    assert_eq!(envelopes.len(), 2);
    assert_eq!(envelopes[0].sequence, 1);
    assert_eq!(envelopes[1].sequence, 2);

    let loaded = store.load_events("wf-1").await.expect("load");
    assert_eq!(loaded.len(), 2);
    assert!(matches!(
        loaded[0].payload,
        WorkflowEvent::WorkflowCreated { .. }
    ));
}

#[tokio::test]
async fn load_aggregate_rehydrates_state() {
    let dir = tempdir().expect("temp dir");
    let store = store_for(dir.path(), "wf-1", 0);

    let context = store.load_aggregate("wf-1").await.expect("load");
    store
        .commit(
            vec![created_event(), started_event(Stage::Feasibility, 1)],
            context,
            HashMap::new(),
        )
        .await
        .expect("commit");

    let context = store.load_aggregate("wf-1").await.expect("reload");
    assert_eq!(context.current_sequence, 2);
    let data = context.aggregate.data().expect("active");
    assert_eq!(data.stage(), Stage::Feasibility);
}

#[tokio::test]
async fn stale_context_commit_is_a_conflict() {
    let dir = tempdir().expect("temp dir");
    let store = store_for(dir.path(), "wf-1", 0);

    let context_a = store.load_aggregate("wf-1").await.expect("load a");
    let context_b = store.load_aggregate("wf-1").await.expect("load b");

    store
        .commit(vec![created_event()], context_a, HashMap::new())
        .await
        .expect("first commit");

    let result = store
        .commit(
            vec![started_event(Stage::Feasibility, 1)],
            context_b,
            HashMap::new(),
        )
        .await;
    assert!(matches!(result, Err(AggregateError::AggregateConflict)));
}

#[tokio::test]
async fn snapshot_is_written_at_the_threshold_and_used_on_load() {
    let dir = tempdir().expect("temp dir");
    let store = store_for(dir.path(), "wf-1", 2);

    let context = store.load_aggregate("wf-1").await.expect("load");
    store
        .commit(
            vec![created_event(), started_event(Stage::Feasibility, 1)],
            context,
            HashMap::new(),
        )
        .await
        .expect("commit");

    assert!(store.snapshot_path().is_file());

    // Loading uses the snapshot and replays nothing beyond it.
    let context = store.load_aggregate("wf-1").await.expect("reload");
    assert_eq!(context.current_sequence, 2);
    assert!(context.aggregate.data().is_some());
}

#[tokio::test]
async fn empty_commit_is_a_no_op() {
    let dir = tempdir().expect("temp dir");
    let store = store_for(dir.path(), "wf-1", 0);

    let context = store.load_aggregate("wf-1").await.expect("load");
    let envelopes = store
        .commit(vec![], context, HashMap::new())
        .await
        .expect("commit");
    assert!(envelopes.is_empty());
    assert!(!store.log_path().exists());
}

#[tokio::test]
async fn misplaced_foreign_events_are_filtered_out() {
    let dir = tempdir().expect("temp dir");
    let store = store_for(dir.path(), "wf-1", 0);

    let context = store.load_aggregate("wf-1").await.expect("load");
    store
        .commit(vec![created_event()], context, HashMap::new())
        .await
        .expect("commit");

    // A record for another workflow copied into this log by hand must not
    // surface when loading.
    let event = started_event(Stage::Feasibility, 1);
    let foreign = StoredEvent {
        aggregate_id: "wf-2".to_string(),
        sequence: 1,
        recorded_at: TimestampUtc::now(),
        event_type: event.event_type(),
        event_version: event.event_version(),
        event,
        metadata: HashMap::new(),
    };
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(store.log_path())
        .expect("open log");
    writeln!(
        file,
        "{}",
        serde_json::to_string(&foreign).expect("serialize")
    )
    .expect("append");

    let loaded = store.load_events("wf-1").await.expect("load");
    assert_eq!(loaded.len(), 1);
    assert!(matches!(
        loaded[0].payload,
        WorkflowEvent::WorkflowCreated { .. }
    ));

    // Rehydration skipped the foreign record too: only WorkflowCreated
    // applied, so the stage never moved to processing.
    let context = store.load_aggregate("wf-1").await.expect("reload");
    assert_eq!(context.current_sequence, 1);
    let data = context.aggregate.data().expect("active");
    assert_eq!(data.stage_status(), crate::domain::types::StageStatus::Pending);
}
