//! Workflow view projection for API and query purposes.
//!
//! The WorkflowView is derived from WorkflowEvent only (no direct mutation)
//! and contains the data read surfaces need: current stage and status, the
//! decision ledger, recorded policy violations, and produced artifacts.

use crate::domain::cqrs::WorkflowAggregate;
use crate::domain::stuck;
use crate::domain::types::{
    ArtifactRef, Decision, Epoch, Goal, RepoBinding, RepoKey, Stage, StageDecision, StageStatus,
    TimestampUtc, WorkflowId, WorkflowState,
};
use crate::domain::WorkflowEvent;
use crate::policy::PolicyViolation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Read-only view of workflow state derived from events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowView {
    workflow_id: Option<WorkflowId>,
    goal: Option<Goal>,
    context: Option<String>,
    repos: Vec<RepoBinding>,
    created_at: Option<TimestampUtc>,
    stage: Option<Stage>,
    stage_status: Option<StageStatus>,
    stage_updated_at: Option<TimestampUtc>,
    stage_epoch: Option<Epoch>,
    state: Option<WorkflowState>,
    feedback: Option<String>,
    policy_violations: Vec<PolicyViolation>,
    artifacts: Vec<ArtifactRef>,
    decisions: Vec<StageDecision>,
    repos_ready: BTreeSet<RepoKey>,
    ci_failure: Option<String>,
    last_event_sequence: u64,
}

impl WorkflowView {
    /// Apply an event to update the view.
    pub fn apply_event(&mut self, aggregate_id: &str, event: &WorkflowEvent, sequence: u64) {
        match Uuid::parse_str(aggregate_id) {
            Ok(uuid) => self.workflow_id = Some(WorkflowId(uuid)),
            Err(e) => tracing::warn!("Invalid aggregate ID '{}': {}", aggregate_id, e),
        }
        self.last_event_sequence = sequence;

        match event {
            WorkflowEvent::WorkflowCreated {
                goal,
                context,
                repos,
                created_at,
            } => {
                self.goal = Some(goal.clone());
                self.context = Some(context.clone());
                self.repos = repos.clone();
                self.created_at = Some(*created_at);
                self.stage = Some(Stage::Feasibility);
                self.stage_status = Some(StageStatus::Pending);
                self.stage_updated_at = Some(*created_at);
                self.state = Some(WorkflowState::Active);
                self.feedback = None;
                self.policy_violations.clear();
                self.artifacts.clear();
                self.decisions.clear();
                self.repos_ready.clear();
                self.ci_failure = None;
            }

            WorkflowEvent::StageStarted {
                stage,
                epoch,
                started_at,
                ..
            } => {
                self.stage = Some(*stage);
                self.stage_status = Some(StageStatus::Processing);
                self.stage_epoch = Some(*epoch);
                self.stage_updated_at = Some(*started_at);
                self.repos_ready.clear();
                self.feedback = None;
            }

            WorkflowEvent::RepoStageReady { repo, artifact, .. } => {
                self.repos_ready.insert(repo.clone());
                if let Some(artifact) = artifact {
                    self.artifacts.push(artifact.clone());
                }
            }

            WorkflowEvent::StageReady { artifact, at, .. } => {
                self.stage_status = Some(StageStatus::Ready);
                self.stage_updated_at = Some(*at);
                if let Some(artifact) = artifact {
                    self.artifacts.push(artifact.clone());
                }
            }

            WorkflowEvent::StageFailed { error, at, .. } => {
                self.stage_status = Some(StageStatus::Blocked);
                self.stage_updated_at = Some(*at);
                self.feedback = Some(error.clone());
            }

            WorkflowEvent::StageApproved { stage, actor, at } => {
                self.stage_status = Some(StageStatus::Approved);
                self.stage_updated_at = Some(*at);
                self.decisions.push(StageDecision {
                    stage: *stage,
                    decision: Decision::Approve,
                    actor: actor.clone(),
                    reason: None,
                    decided_at: *at,
                });
            }

            WorkflowEvent::StageRejected {
                stage,
                actor,
                reason,
                at,
            } => {
                self.stage_status = Some(StageStatus::Rejected);
                self.state = Some(WorkflowState::Rejected);
                self.stage_updated_at = Some(*at);
                self.decisions.push(StageDecision {
                    stage: *stage,
                    decision: Decision::Reject,
                    actor: actor.clone(),
                    reason: Some(reason.clone()),
                    decided_at: *at,
                });
            }

            WorkflowEvent::ChangesRequested {
                stage,
                actor,
                reason,
                at,
            } => {
                self.stage_status = Some(StageStatus::NeedsChanges);
                self.stage_updated_at = Some(*at);
                self.feedback = Some(reason.clone());
                self.decisions.push(StageDecision {
                    stage: *stage,
                    decision: Decision::RequestChanges,
                    actor: actor.clone(),
                    reason: Some(reason.clone()),
                    decided_at: *at,
                });
            }

            WorkflowEvent::PatchRegenerationRequested { reason, .. } => {
                self.feedback = Some(reason.clone());
            }

            WorkflowEvent::PolicyViolationsRecorded { violations, .. } => {
                self.policy_violations = violations.clone();
            }

            WorkflowEvent::CiCompleted {
                conclusion, detail, ..
            } => {
                if conclusion.is_failing() && self.stage == Some(Stage::Sandbox) {
                    let text = detail
                        .clone()
                        .unwrap_or_else(|| format!("CI concluded: {}", conclusion));
                    self.stage_status = Some(StageStatus::Blocked);
                    self.ci_failure = Some(text.clone());
                    self.feedback = Some(text);
                }
            }

            WorkflowEvent::PrClosed { at } => {
                self.stage_status = Some(StageStatus::Blocked);
                self.stage_updated_at = Some(*at);
                self.feedback = Some("pull request closed without merge".to_string());
            }

            WorkflowEvent::WorkflowCancelled { .. } => {
                self.state = Some(WorkflowState::Cancelled);
            }

            WorkflowEvent::WorkflowFailed { .. } => {
                self.state = Some(WorkflowState::Failed);
            }

            WorkflowEvent::WorkflowCompleted { merged_at } => {
                self.stage = Some(Stage::Done);
                self.stage_status = Some(StageStatus::Approved);
                self.state = Some(WorkflowState::Done);
                self.stage_updated_at = Some(*merged_at);
            }
        }
    }

    /// Returns the workflow ID.
    pub fn workflow_id(&self) -> Option<&WorkflowId> {
        self.workflow_id.as_ref()
    }

    /// Returns the goal.
    pub fn goal(&self) -> Option<&Goal> {
        self.goal.as_ref()
    }

    /// Returns the free-form context supplied at creation.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns the bound repositories.
    pub fn repos(&self) -> &[RepoBinding] {
        &self.repos
    }

    /// Returns the current stage.
    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Returns the current stage status.
    pub fn stage_status(&self) -> Option<StageStatus> {
        self.stage_status
    }

    /// Returns when the current stage last changed.
    pub fn stage_updated_at(&self) -> Option<TimestampUtc> {
        self.stage_updated_at
    }

    /// Returns the epoch of the current stage attempt.
    pub fn stage_epoch(&self) -> Option<Epoch> {
        self.stage_epoch
    }

    /// Returns the coarse workflow state.
    pub fn state(&self) -> Option<WorkflowState> {
        self.state
    }

    /// Returns the feedback queued for the next attempt, if any.
    pub fn feedback(&self) -> Option<&str> {
        self.feedback.as_deref()
    }

    /// Returns the recorded policy violations.
    pub fn policy_violations(&self) -> &[PolicyViolation] {
        &self.policy_violations
    }

    /// Returns all artifacts produced so far.
    pub fn artifacts(&self) -> &[ArtifactRef] {
        &self.artifacts
    }

    /// Returns the decision ledger rows, in decision order.
    pub fn decisions(&self) -> &[StageDecision] {
        &self.decisions
    }

    /// Returns the repositories done with the current fan-out attempt.
    pub fn repos_ready(&self) -> &BTreeSet<RepoKey> {
        &self.repos_ready
    }

    /// Returns the last recorded CI failure text.
    pub fn ci_failure(&self) -> Option<&str> {
        self.ci_failure.as_deref()
    }

    /// Returns the last event sequence number.
    pub fn last_event_sequence(&self) -> u64 {
        self.last_event_sequence
    }

    /// True when the current stage counts as stuck at `now`.
    pub fn is_stuck(&self, now: TimestampUtc, threshold_secs: u64) -> bool {
        match (self.stage_status, self.stage_updated_at) {
            (Some(status), Some(updated_at)) => {
                stuck::is_stuck(status, updated_at, now, threshold_secs)
            }
            _ => false,
        }
    }
}

/// Serializable wrapper for event envelopes used in broadcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEventEnvelope {
    pub aggregate_id: String,
    pub sequence: u64,
    pub event: WorkflowEvent,
}

impl From<&cqrs_es::EventEnvelope<WorkflowAggregate>> for WorkflowEventEnvelope {
    fn from(source: &cqrs_es::EventEnvelope<WorkflowAggregate>) -> Self {
        Self {
            aggregate_id: source.aggregate_id.clone(),
            sequence: source.sequence as u64,
            event: source.payload.clone(),
        }
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
