//! Unit tests for signal-to-workflow correlation.

use crate::domain::types::{RepoKey, TimestampUtc, WorkflowId};
use crate::ingest::correlate::CorrelationIndex;
use crate::ingest::webhook::CorrelationHints;
use chrono::{Duration, TimeZone, Utc};

fn repo() -> RepoKey {
    RepoKey::from("acme/api")
}

fn at(secs: i64) -> TimestampUtc {
    TimestampUtc(
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp"),
    )
}

fn hints(pr: Option<u64>, branch: Option<&str>, sha: Option<&str>) -> CorrelationHints {
    CorrelationHints {
        pr_number: pr,
        head_branch: branch.map(str::to_string),
        head_sha: sha.map(str::to_string),
    }
}

#[test]
fn pr_number_beats_branch_and_sha() {
    let mut index = CorrelationIndex::new();
    let by_pr = WorkflowId::new();
    let by_branch = WorkflowId::new();
    let by_sha = WorkflowId::new();

    index.register_pr(repo(), 42, by_pr.clone(), at(0));
    index.register_branch(repo(), "feature".to_string(), by_branch, at(0));
    index.register_sha(repo(), "abc123".to_string(), by_sha, at(0));

    let resolved = index.resolve(&repo(), &hints(Some(42), Some("feature"), Some("abc123")));
    assert_eq!(resolved, Some(by_pr));
}

#[test]
fn branch_beats_sha_when_no_pr_matches() {
    let mut index = CorrelationIndex::new();
    let by_branch = WorkflowId::new();
    let by_sha = WorkflowId::new();

    index.register_branch(repo(), "feature".to_string(), by_branch.clone(), at(0));
    index.register_sha(repo(), "abc123".to_string(), by_sha, at(0));

    let resolved = index.resolve(&repo(), &hints(Some(99), Some("feature"), Some("abc123")));
    assert_eq!(resolved, Some(by_branch));
}

#[test]
fn most_recent_registration_wins_a_tie() {
    let mut index = CorrelationIndex::new();
    let older = WorkflowId::new();
    let newer = WorkflowId::new();

    // A reused branch name: two workflows registered the same branch.
    index.register_branch(repo(), "feature".to_string(), older, at(0));
    index.register_branch(
        repo(),
        "feature".to_string(),
        newer.clone(),
        at(Duration::hours(1).num_seconds()),
    );

    let resolved = index.resolve(&repo(), &hints(None, Some("feature"), None));
    assert_eq!(resolved, Some(newer));
}

#[test]
fn other_repos_do_not_match() {
    let mut index = CorrelationIndex::new();
    index.register_pr(repo(), 42, WorkflowId::new(), at(0));

    let resolved = index.resolve(
        &RepoKey::from("acme/web"),
        &hints(Some(42), None, None),
    );
    assert_eq!(resolved, None);
}

#[test]
fn unregister_removes_every_correlation() {
    let mut index = CorrelationIndex::new();
    let id = WorkflowId::new();
    index.register_pr(repo(), 42, id.clone(), at(0));
    index.register_branch(repo(), "feature".to_string(), id.clone(), at(0));
    index.register_sha(repo(), "abc123".to_string(), id.clone(), at(0));

    index.unregister(&id);

    let resolved = index.resolve(&repo(), &hints(Some(42), Some("feature"), Some("abc123")));
    assert_eq!(resolved, None);
}
