//! Workflow events for the CQRS aggregate.
//!
//! Events represent facts that have happened. They are the single source of
//! truth for workflow state; `stage`/`stage_status` are a materialized view
//! over this log, which is what makes replay and recovery possible.

use crate::domain::types::{
    ActorId, ArtifactRef, CiConclusion, Epoch, Goal, RepoBinding, RepoKey, Stage, TimestampUtc,
};
use crate::policy::PolicyViolation;
use cqrs_es::DomainEvent;
use serde::{Deserialize, Serialize};

/// Events emitted by the workflow aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Workflow was created.
    WorkflowCreated {
        goal: Goal,
        context: String,
        repos: Vec<RepoBinding>,
        created_at: TimestampUtc,
    },

    /// A stage attempt began; status moves to processing. Carries the
    /// feedback injected into the processor for retries and regenerations.
    StageStarted {
        stage: Stage,
        epoch: Epoch,
        feedback: Option<String>,
        started_at: TimestampUtc,
    },

    /// One repository finished its share of a fan-out stage.
    RepoStageReady {
        stage: Stage,
        epoch: Epoch,
        repo: RepoKey,
        artifact: Option<ArtifactRef>,
        at: TimestampUtc,
    },

    /// The current stage finished and awaits a human decision.
    StageReady {
        stage: Stage,
        epoch: Epoch,
        artifact: Option<ArtifactRef>,
        at: TimestampUtc,
    },

    /// The stage processor reported failure; status moves to blocked.
    StageFailed {
        stage: Stage,
        epoch: Epoch,
        error: String,
        at: TimestampUtc,
    },

    /// Human approved the stage.
    StageApproved {
        stage: Stage,
        actor: ActorId,
        at: TimestampUtc,
    },

    /// Human rejected the stage; the workflow is terminal.
    StageRejected {
        stage: Stage,
        actor: ActorId,
        reason: String,
        at: TimestampUtc,
    },

    /// Human requested changes; the reason becomes processor feedback.
    ChangesRequested {
        stage: Stage,
        actor: ActorId,
        reason: String,
        at: TimestampUtc,
    },

    /// Operator asked for patch regeneration after a sandbox CI failure.
    PatchRegenerationRequested { reason: String, at: TimestampUtc },

    /// Policy gate findings; replaces any prior violation set.
    PolicyViolationsRecorded {
        violations: Vec<PolicyViolation>,
        at: TimestampUtc,
    },

    /// CI conclusion observed while in the sandbox stage.
    CiCompleted {
        conclusion: CiConclusion,
        detail: Option<String>,
        at: TimestampUtc,
    },

    /// The pull request was closed without merging.
    PrClosed { at: TimestampUtc },

    /// Workflow cancelled by a human; terminal.
    WorkflowCancelled { actor: ActorId, at: TimestampUtc },

    /// Stage attempts exhausted; terminal.
    WorkflowFailed { reason: String, at: TimestampUtc },

    /// Pull request merged; the pipeline is done.
    WorkflowCompleted { merged_at: TimestampUtc },
}

impl DomainEvent for WorkflowEvent {
    fn event_type(&self) -> String {
        match self {
            Self::WorkflowCreated { .. } => "WorkflowCreated".to_string(),
            Self::StageStarted { .. } => "StageStarted".to_string(),
            Self::RepoStageReady { .. } => "RepoStageReady".to_string(),
            Self::StageReady { .. } => "StageReady".to_string(),
            Self::StageFailed { .. } => "StageFailed".to_string(),
            Self::StageApproved { .. } => "StageApproved".to_string(),
            Self::StageRejected { .. } => "StageRejected".to_string(),
            Self::ChangesRequested { .. } => "ChangesRequested".to_string(),
            Self::PatchRegenerationRequested { .. } => "PatchRegenerationRequested".to_string(),
            Self::PolicyViolationsRecorded { .. } => "PolicyViolationsRecorded".to_string(),
            Self::CiCompleted { .. } => "CiCompleted".to_string(),
            Self::PrClosed { .. } => "PrClosed".to_string(),
            Self::WorkflowCancelled { .. } => "WorkflowCancelled".to_string(),
            Self::WorkflowFailed { .. } => "WorkflowFailed".to_string(),
            Self::WorkflowCompleted { .. } => "WorkflowCompleted".to_string(),
        }
    }

    fn event_version(&self) -> String {
        "1".to_string()
    }
}
