//! Workflow commands for the CQRS aggregate.
//!
//! Commands represent intent to change state. They come from three sources:
//! human gate actions issued through the API layer, stage-processor
//! completion reports, and normalized GitHub webhook signals. The aggregate
//! validates each command and produces events that are persisted to the log.

use crate::domain::types::{
    ActorId, ArtifactRef, CiConclusion, Epoch, Goal, RepoBinding, RepoKey, Stage,
};
use crate::policy::PolicyViolation;
use serde::{Deserialize, Serialize};

/// Commands that can be executed against the workflow aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCommand {
    /// Initialize aggregate state for a new workflow.
    CreateWorkflow {
        goal: Goal,
        context: String,
        repos: Vec<RepoBinding>,
    },

    /// Human approval of the current stage's artifact.
    ApproveStage { stage: Stage, actor: ActorId },

    /// Human rejection; terminal for the whole workflow.
    RejectStage {
        stage: Stage,
        actor: ActorId,
        reason: String,
    },

    /// Human asks for another attempt with feedback.
    RequestStageChanges {
        stage: Stage,
        actor: ActorId,
        reason: String,
    },

    /// Operator restarts a stage (blocked, awaiting decision, or stuck).
    RetryStage { stage: Stage },

    /// CI failed in the sandbox; move back to the patches stage with the
    /// failure text as feedback. The only backward edge in the topology.
    RegeneratePatches { reason: String },

    /// Cancel the workflow. In-flight processor work is not awaited.
    CancelWorkflow { actor: ActorId },

    /// Stage processor reports success for the attempt it was started under.
    StageReady {
        stage: Stage,
        epoch: Epoch,
        /// Set for fan-out stages (patches, sandbox, pr).
        repo: Option<RepoKey>,
        artifact: Option<ArtifactRef>,
    },

    /// Stage processor reports failure for the attempt it was started under.
    StageFailed {
        stage: Stage,
        epoch: Epoch,
        error: String,
    },

    /// Policy gate result; fully replaces the prior violation set.
    PolicyEvaluated { violations: Vec<PolicyViolation> },

    /// CI conclusion observed for the sandbox stage.
    CiCompleted {
        conclusion: CiConclusion,
        detail: Option<String>,
    },

    /// The pull request for this workflow was merged.
    PrMerged,

    /// The pull request was closed without merging.
    PrClosed,
}

impl WorkflowCommand {
    /// Asynchronous signals (processor reports, webhooks) are discarded as
    /// no-ops against a terminal workflow; human commands are rejected with
    /// an explicit error instead.
    pub fn is_async_signal(&self) -> bool {
        matches!(
            self,
            WorkflowCommand::StageReady { .. }
                | WorkflowCommand::StageFailed { .. }
                | WorkflowCommand::PolicyEvaluated { .. }
                | WorkflowCommand::CiCompleted { .. }
                | WorkflowCommand::PrMerged
                | WorkflowCommand::PrClosed
        )
    }

    /// Human-readable name used in transition error messages.
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowCommand::CreateWorkflow { .. } => "CreateWorkflow",
            WorkflowCommand::ApproveStage { .. } => "ApproveStage",
            WorkflowCommand::RejectStage { .. } => "RejectStage",
            WorkflowCommand::RequestStageChanges { .. } => "RequestStageChanges",
            WorkflowCommand::RetryStage { .. } => "RetryStage",
            WorkflowCommand::RegeneratePatches { .. } => "RegeneratePatches",
            WorkflowCommand::CancelWorkflow { .. } => "CancelWorkflow",
            WorkflowCommand::StageReady { .. } => "StageReady",
            WorkflowCommand::StageFailed { .. } => "StageFailed",
            WorkflowCommand::PolicyEvaluated { .. } => "PolicyEvaluated",
            WorkflowCommand::CiCompleted { .. } => "CiCompleted",
            WorkflowCommand::PrMerged => "PrMerged",
            WorkflowCommand::PrClosed => "PrClosed",
        }
    }
}
