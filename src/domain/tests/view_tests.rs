//! Unit tests for the WorkflowView projection.

use crate::domain::types::{
    CiConclusion, Epoch, RepoBinding, RepoRole, Stage, StageStatus, TimestampUtc, WorkflowState,
};
use crate::domain::view::WorkflowView;
use crate::domain::WorkflowEvent;
use chrono::{Duration, TimeZone, Utc};

fn base_time() -> TimestampUtc {
    TimestampUtc(
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid timestamp"),
    )
}

fn aggregate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn created_event() -> WorkflowEvent {
    WorkflowEvent::WorkflowCreated {
        goal: "Add rate limiting to the API".into(),
        context: "See incident 4821".to_string(),
        repos: vec![RepoBinding {
            owner: "acme".to_string(),
            repo: "api".to_string(),
            base_branch: "main".to_string(),
            role: RepoRole::Primary,
        }],
        created_at: base_time(),
    }
}

fn apply_all(view: &mut WorkflowView, id: &str, events: &[WorkflowEvent]) {
    for (i, event) in events.iter().enumerate() {
        view.apply_event(id, event, i as u64 + 1);
    }
}

#[test]
fn created_event_populates_identity_fields() {
    let id = aggregate_id();
    let mut view = WorkflowView::default();
    view.apply_event(&id, &created_event(), 1);

    assert_eq!(view.workflow_id().map(ToString::to_string), Some(id));
    assert_eq!(view.goal().map(|g| g.as_str()), Some("Add rate limiting to the API"));
    assert_eq!(view.stage(), Some(Stage::Feasibility));
    assert_eq!(view.stage_status(), Some(StageStatus::Pending));
    assert_eq!(view.state(), Some(WorkflowState::Active));
    assert_eq!(view.repos().len(), 1);
    assert_eq!(view.last_event_sequence(), 1);
}

#[test]
fn stage_lifecycle_is_projected() {
    let id = aggregate_id();
    let mut view = WorkflowView::default();
    apply_all(
        &mut view,
        &id,
        &[
            created_event(),
            WorkflowEvent::StageStarted {
                stage: Stage::Feasibility,
                epoch: Epoch::first(),
                feedback: None,
                started_at: base_time(),
            },
            WorkflowEvent::StageReady {
                stage: Stage::Feasibility,
                epoch: Epoch::first(),
                artifact: None,
                at: base_time(),
            },
            WorkflowEvent::StageApproved {
                stage: Stage::Feasibility,
                actor: "alice".into(),
                at: base_time(),
            },
            WorkflowEvent::StageStarted {
                stage: Stage::Architecture,
                epoch: Epoch::first(),
                feedback: None,
                started_at: base_time(),
            },
        ],
    );

    assert_eq!(view.stage(), Some(Stage::Architecture));
    assert_eq!(view.stage_status(), Some(StageStatus::Processing));
    assert_eq!(view.stage_epoch(), Some(Epoch(1)));
    assert_eq!(view.decisions().len(), 1);
    assert_eq!(view.last_event_sequence(), 5);
}

#[test]
fn failure_feedback_is_cleared_by_the_next_attempt() {
    let id = aggregate_id();
    let mut view = WorkflowView::default();
    apply_all(
        &mut view,
        &id,
        &[
            created_event(),
            WorkflowEvent::StageStarted {
                stage: Stage::Feasibility,
                epoch: Epoch::first(),
                feedback: None,
                started_at: base_time(),
            },
            WorkflowEvent::StageFailed {
                stage: Stage::Feasibility,
                epoch: Epoch::first(),
                error: "model timeout".to_string(),
                at: base_time(),
            },
        ],
    );
    assert_eq!(view.feedback(), Some("model timeout"));
    assert_eq!(view.stage_status(), Some(StageStatus::Blocked));

    view.apply_event(
        &id,
        &WorkflowEvent::StageStarted {
            stage: Stage::Feasibility,
            epoch: Epoch(2),
            feedback: Some("model timeout".to_string()),
            started_at: base_time(),
        },
        4,
    );
    assert_eq!(view.feedback(), None);
    assert_eq!(view.stage_epoch(), Some(Epoch(2)));
}

#[test]
fn ci_failure_only_blocks_while_in_sandbox() {
    let id = aggregate_id();
    let mut view = WorkflowView::default();
    apply_all(
        &mut view,
        &id,
        &[
            created_event(),
            WorkflowEvent::StageStarted {
                stage: Stage::Sandbox,
                epoch: Epoch::first(),
                feedback: None,
                started_at: base_time(),
            },
            WorkflowEvent::CiCompleted {
                conclusion: CiConclusion::TimedOut,
                detail: None,
                at: base_time(),
            },
        ],
    );

    assert_eq!(view.stage_status(), Some(StageStatus::Blocked));
    assert_eq!(view.ci_failure(), Some("CI concluded: timed_out"));
}

#[test]
fn completion_marks_the_workflow_done() {
    let id = aggregate_id();
    let mut view = WorkflowView::default();
    apply_all(
        &mut view,
        &id,
        &[
            created_event(),
            WorkflowEvent::WorkflowCompleted {
                merged_at: base_time(),
            },
        ],
    );

    assert_eq!(view.stage(), Some(Stage::Done));
    assert_eq!(view.state(), Some(WorkflowState::Done));
}

#[test]
fn stuck_detection_uses_the_processing_window() {
    let id = aggregate_id();
    let mut view = WorkflowView::default();
    apply_all(
        &mut view,
        &id,
        &[
            created_event(),
            WorkflowEvent::StageStarted {
                stage: Stage::Patches,
                epoch: Epoch::first(),
                feedback: None,
                started_at: base_time(),
            },
        ],
    );

    let just_under = TimestampUtc(base_time().0 + Duration::seconds(599));
    let just_over = TimestampUtc(base_time().0 + Duration::seconds(601));
    assert!(!view.is_stuck(just_under, 600));
    assert!(view.is_stuck(just_over, 600));

    // A ready stage is never stuck no matter how long it waits for a human.
    view.apply_event(
        &id,
        &WorkflowEvent::StageReady {
            stage: Stage::Patches,
            epoch: Epoch::first(),
            artifact: None,
            at: base_time(),
        },
        3,
    );
    assert!(!view.is_stuck(just_over, 600));
}

#[test]
fn fan_out_progress_is_visible_per_repo() {
    let id = aggregate_id();
    let mut view = WorkflowView::default();
    apply_all(
        &mut view,
        &id,
        &[
            created_event(),
            WorkflowEvent::StageStarted {
                stage: Stage::Patches,
                epoch: Epoch::first(),
                feedback: None,
                started_at: base_time(),
            },
            WorkflowEvent::RepoStageReady {
                stage: Stage::Patches,
                epoch: Epoch::first(),
                repo: "acme/api".into(),
                artifact: None,
                at: base_time(),
            },
        ],
    );

    assert!(view.repos_ready().contains(&"acme/api".into()));
    assert_eq!(view.stage_status(), Some(StageStatus::Processing));

    // A new attempt clears per-repo progress.
    view.apply_event(
        &id,
        &WorkflowEvent::StageStarted {
            stage: Stage::Patches,
            epoch: Epoch(2),
            feedback: None,
            started_at: base_time(),
        },
        4,
    );
    assert!(view.repos_ready().is_empty());
}
