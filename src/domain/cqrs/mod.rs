//! CQRS core for the orchestration state machine.
//!
//! The [`WorkflowAggregate`] is the ONLY place state transitions happen:
//! `handle` validates a command against the current state and emits events,
//! `apply` folds events back into state. Both are pure (no I/O, no retries),
//! so a transition is committed atomically with its events or not at all.

pub mod commands;
pub mod events;
pub mod query;

pub use commands::WorkflowCommand;
pub use events::WorkflowEvent;
pub use query::WorkflowQuery;

use crate::domain::errors::OrchestratorError;
use crate::domain::services::{StageLimits, WorkflowServices};
use crate::domain::stuck;
use crate::domain::types::{
    ArtifactRef, Decision, Epoch, Goal, RepoBinding, RepoKey, Stage, StageDecision, StageStatus,
    TimestampUtc, WorkflowState,
};
use crate::policy::{self, PolicyViolation};
use async_trait::async_trait;
use cqrs_es::Aggregate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Active workflow data once the aggregate is initialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowData {
    goal: Goal,
    context: String,
    repos: Vec<RepoBinding>,
    created_at: TimestampUtc,
    stage: Stage,
    stage_status: StageStatus,
    stage_updated_at: TimestampUtc,
    state: WorkflowState,
    /// Current attempt per stage; absent means the stage has not started.
    epochs: HashMap<Stage, Epoch>,
    /// Feedback queued for the next attempt of the current stage.
    feedback: Option<String>,
    violations: Vec<PolicyViolation>,
    artifacts: Vec<ArtifactRef>,
    decisions: Vec<StageDecision>,
    /// Repositories that completed the current fan-out stage attempt.
    repo_ready: BTreeSet<RepoKey>,
    ci_failure: Option<String>,
}

impl WorkflowData {
    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn repos(&self) -> &[RepoBinding] {
        &self.repos
    }

    pub fn created_at(&self) -> TimestampUtc {
        self.created_at
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn stage_status(&self) -> StageStatus {
        self.stage_status
    }

    pub fn stage_updated_at(&self) -> TimestampUtc {
        self.stage_updated_at
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn feedback(&self) -> Option<&str> {
        self.feedback.as_deref()
    }

    pub fn violations(&self) -> &[PolicyViolation] {
        &self.violations
    }

    pub fn artifacts(&self) -> &[ArtifactRef] {
        &self.artifacts
    }

    pub fn decisions(&self) -> &[StageDecision] {
        &self.decisions
    }

    pub fn ci_failure(&self) -> Option<&str> {
        self.ci_failure.as_deref()
    }

    /// Current epoch for a stage; `Epoch::first()` before the stage started.
    pub fn current_epoch(&self, stage: Stage) -> Epoch {
        self.epochs.get(&stage).copied().unwrap_or_default()
    }

    /// Epoch a fresh attempt at `stage` would run under.
    pub fn next_epoch_for(&self, stage: Stage) -> Epoch {
        self.epochs
            .get(&stage)
            .map(Epoch::next)
            .unwrap_or_else(Epoch::first)
    }

    /// All bound repository keys.
    pub fn repo_keys(&self) -> BTreeSet<RepoKey> {
        self.repos.iter().map(RepoBinding::key).collect()
    }

    fn has_blocking_violations(&self) -> bool {
        policy::has_blocking_violations(&self.violations)
    }
}

/// Workflow aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum AggregateState {
    /// Aggregate has not been initialized.
    #[default]
    Uninitialized,
    /// Aggregate is active with workflow data (boxed for memory efficiency).
    Active(Box<WorkflowData>),
}

/// The workflow aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowAggregate {
    pub state: AggregateState,
}

impl WorkflowAggregate {
    /// Active workflow data, if initialized.
    pub fn data(&self) -> Option<&WorkflowData> {
        match &self.state {
            AggregateState::Active(data) => Some(data),
            AggregateState::Uninitialized => None,
        }
    }
}

#[async_trait]
impl Aggregate for WorkflowAggregate {
    type Command = WorkflowCommand;
    type Event = WorkflowEvent;
    type Error = OrchestratorError;
    type Services = WorkflowServices;

    fn aggregate_type() -> String {
        "workflow".to_string()
    }

    async fn handle(
        &self,
        command: Self::Command,
        services: &Self::Services,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        let now = services.clock.now();
        let cmd_name = command.name();

        let data = match (&self.state, &command) {
            (AggregateState::Uninitialized, WorkflowCommand::CreateWorkflow { .. }) => {
                return handle_create(command, now);
            }
            (AggregateState::Uninitialized, _) => return Err(OrchestratorError::NotInitialized),
            (AggregateState::Active(data), _) => data,
        };

        // Terminal guard: late async signals are discarded, human commands
        // are rejected explicitly.
        if data.state.is_terminal() {
            if command.is_async_signal() {
                tracing::debug!(
                    command = cmd_name,
                    state = ?data.state,
                    "discarding signal for terminal workflow"
                );
                return Ok(vec![]);
            }
            return Err(OrchestratorError::InvalidTransition {
                message: format!(
                    "command '{}' not valid on {:?} workflow",
                    cmd_name, data.state
                ),
            });
        }

        match command {
            WorkflowCommand::CreateWorkflow { .. } => Err(OrchestratorError::InvalidTransition {
                message: "workflow already exists".to_string(),
            }),

            WorkflowCommand::ApproveStage { stage, actor } => {
                require_current_stage(data, stage, cmd_name)?;
                require_status(data, &[StageStatus::Ready], cmd_name)?;

                // Policy gate: approval is refused while blocking violations
                // stand; the state is left untouched.
                if stage == Stage::Policy && data.has_blocking_violations() {
                    return Err(OrchestratorError::PolicyBlocked {
                        blocking: data
                            .violations
                            .iter()
                            .filter(|v| v.severity == policy::Severity::Block)
                            .count(),
                    });
                }

                let mut events = vec![WorkflowEvent::StageApproved { stage, actor, at: now }];
                if stage != Stage::Pr {
                    if let Some(next) = stage.next() {
                        events.push(WorkflowEvent::StageStarted {
                            stage: next,
                            epoch: data.next_epoch_for(next),
                            feedback: None,
                            started_at: now,
                        });
                    }
                }
                // Approving `pr` awaits the merge webhook before completion.
                Ok(events)
            }

            WorkflowCommand::RejectStage {
                stage,
                actor,
                reason,
            } => {
                require_current_stage(data, stage, cmd_name)?;
                require_status(
                    data,
                    &[
                        StageStatus::Ready,
                        StageStatus::Blocked,
                        StageStatus::NeedsChanges,
                    ],
                    cmd_name,
                )?;
                Ok(vec![WorkflowEvent::StageRejected {
                    stage,
                    actor,
                    reason,
                    at: now,
                }])
            }

            WorkflowCommand::RequestStageChanges {
                stage,
                actor,
                reason,
            } => {
                require_current_stage(data, stage, cmd_name)?;
                require_status(data, &[StageStatus::Ready], cmd_name)?;
                if reason.trim().is_empty() {
                    return Err(OrchestratorError::Validation {
                        message: "request_changes requires a reason".to_string(),
                    });
                }
                let mut events = vec![WorkflowEvent::ChangesRequested {
                    stage,
                    actor,
                    reason: reason.clone(),
                    at: now,
                }];
                events.extend(restart_stage(data, stage, Some(reason), now, &services.limits));
                Ok(events)
            }

            WorkflowCommand::RetryStage { stage } => {
                require_current_stage(data, stage, cmd_name)?;
                let eligible = match data.stage_status {
                    StageStatus::Ready | StageStatus::Blocked | StageStatus::NeedsChanges => true,
                    // Retrying a live attempt is only allowed once it is
                    // classified stuck, so we never race an in-flight
                    // processor.
                    StageStatus::Processing => stuck::is_stuck(
                        data.stage_status,
                        data.stage_updated_at,
                        now,
                        services.limits.stuck_threshold_secs,
                    ),
                    _ => false,
                };
                if !eligible {
                    return Err(OrchestratorError::InvalidTransition {
                        message: format!(
                            "retry of stage '{}' not eligible in status {:?}",
                            stage, data.stage_status
                        ),
                    });
                }
                let feedback = data.feedback.clone();
                Ok(restart_stage(data, stage, feedback, now, &services.limits))
            }

            WorkflowCommand::RegeneratePatches { reason } => {
                if data.stage != Stage::Sandbox || data.stage_status != StageStatus::Blocked {
                    return Err(OrchestratorError::InvalidTransition {
                        message: format!(
                            "regenerate only valid from sandbox/blocked, not {}/{:?}",
                            data.stage, data.stage_status
                        ),
                    });
                }
                let mut events = vec![WorkflowEvent::PatchRegenerationRequested {
                    reason: reason.clone(),
                    at: now,
                }];
                events.extend(restart_stage(
                    data,
                    Stage::Patches,
                    Some(reason),
                    now,
                    &services.limits,
                ));
                Ok(events)
            }

            WorkflowCommand::CancelWorkflow { actor } => {
                Ok(vec![WorkflowEvent::WorkflowCancelled { actor, at: now }])
            }

            WorkflowCommand::StageReady {
                stage,
                epoch,
                repo,
                artifact,
            } => {
                if !completion_matches(data, stage, epoch) {
                    return Ok(vec![]);
                }
                if stage.is_fan_out() {
                    let repo = repo.ok_or_else(|| OrchestratorError::Validation {
                        message: format!("stage '{}' completion requires a repo", stage),
                    })?;
                    let bound = data.repo_keys();
                    if !bound.contains(&repo) || data.repo_ready.contains(&repo) {
                        return Ok(vec![]);
                    }
                    let mut events = vec![WorkflowEvent::RepoStageReady {
                        stage,
                        epoch,
                        repo: repo.clone(),
                        artifact,
                        at: now,
                    }];
                    // All-repos quorum: secondary repos gate advancement too.
                    let mut done = data.repo_ready.clone();
                    done.insert(repo);
                    if done == bound {
                        events.push(WorkflowEvent::StageReady {
                            stage,
                            epoch,
                            artifact: None,
                            at: now,
                        });
                    }
                    Ok(events)
                } else {
                    Ok(vec![WorkflowEvent::StageReady {
                        stage,
                        epoch,
                        artifact,
                        at: now,
                    }])
                }
            }

            WorkflowCommand::StageFailed {
                stage,
                epoch,
                error,
            } => {
                if !completion_matches(data, stage, epoch) {
                    return Ok(vec![]);
                }
                Ok(vec![WorkflowEvent::StageFailed {
                    stage,
                    epoch,
                    error,
                    at: now,
                }])
            }

            WorkflowCommand::PolicyEvaluated { violations } => {
                if data.stage != Stage::Policy {
                    return Ok(vec![]);
                }
                Ok(vec![WorkflowEvent::PolicyViolationsRecorded {
                    violations,
                    at: now,
                }])
            }

            WorkflowCommand::CiCompleted { conclusion, detail } => {
                if data.stage != Stage::Sandbox {
                    return Ok(vec![]);
                }
                Ok(vec![WorkflowEvent::CiCompleted {
                    conclusion,
                    detail,
                    at: now,
                }])
            }

            WorkflowCommand::PrMerged => {
                // A merge observed before the human clicked approve still
                // completes the workflow; discarding it would strand the run.
                if data.stage != Stage::Pr
                    || !matches!(
                        data.stage_status,
                        StageStatus::Approved | StageStatus::Ready
                    )
                {
                    return Ok(vec![]);
                }
                Ok(vec![WorkflowEvent::WorkflowCompleted { merged_at: now }])
            }

            WorkflowCommand::PrClosed => {
                if data.stage != Stage::Pr {
                    return Ok(vec![]);
                }
                Ok(vec![WorkflowEvent::PrClosed { at: now }])
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match (&mut self.state, event) {
            (
                state @ AggregateState::Uninitialized,
                WorkflowEvent::WorkflowCreated {
                    goal,
                    context,
                    repos,
                    created_at,
                },
            ) => {
                *state = AggregateState::Active(Box::new(WorkflowData {
                    goal,
                    context,
                    repos,
                    created_at,
                    stage: Stage::Feasibility,
                    stage_status: StageStatus::Pending,
                    stage_updated_at: created_at,
                    state: WorkflowState::Active,
                    epochs: HashMap::new(),
                    feedback: None,
                    violations: Vec::new(),
                    artifacts: Vec::new(),
                    decisions: Vec::new(),
                    repo_ready: BTreeSet::new(),
                    ci_failure: None,
                }));
            }

            (
                AggregateState::Active(data),
                WorkflowEvent::StageStarted {
                    stage,
                    epoch,
                    started_at,
                    ..
                },
            ) => {
                data.stage = stage;
                data.stage_status = StageStatus::Processing;
                data.stage_updated_at = started_at;
                data.epochs.insert(stage, epoch);
                data.repo_ready.clear();
                // Feedback travels on the event; once an attempt starts it is
                // consumed.
                data.feedback = None;
            }

            (
                AggregateState::Active(data),
                WorkflowEvent::RepoStageReady { repo, artifact, .. },
            ) => {
                data.repo_ready.insert(repo);
                if let Some(artifact) = artifact {
                    data.artifacts.push(artifact);
                }
            }

            (AggregateState::Active(data), WorkflowEvent::StageReady { artifact, at, .. }) => {
                data.stage_status = StageStatus::Ready;
                data.stage_updated_at = at;
                if let Some(artifact) = artifact {
                    data.artifacts.push(artifact);
                }
            }

            (AggregateState::Active(data), WorkflowEvent::StageFailed { error, at, .. }) => {
                data.stage_status = StageStatus::Blocked;
                data.stage_updated_at = at;
                data.feedback = Some(error);
            }

            (AggregateState::Active(data), WorkflowEvent::StageApproved { stage, actor, at }) => {
                data.stage_status = StageStatus::Approved;
                data.stage_updated_at = at;
                data.decisions.push(StageDecision {
                    stage,
                    decision: Decision::Approve,
                    actor,
                    reason: None,
                    decided_at: at,
                });
            }

            (
                AggregateState::Active(data),
                WorkflowEvent::StageRejected {
                    stage,
                    actor,
                    reason,
                    at,
                },
            ) => {
                data.stage_status = StageStatus::Rejected;
                data.state = WorkflowState::Rejected;
                data.stage_updated_at = at;
                data.decisions.push(StageDecision {
                    stage,
                    decision: Decision::Reject,
                    actor,
                    reason: Some(reason),
                    decided_at: at,
                });
            }

            (
                AggregateState::Active(data),
                WorkflowEvent::ChangesRequested {
                    stage,
                    actor,
                    reason,
                    at,
                },
            ) => {
                data.stage_status = StageStatus::NeedsChanges;
                data.stage_updated_at = at;
                data.feedback = Some(reason.clone());
                data.decisions.push(StageDecision {
                    stage,
                    decision: Decision::RequestChanges,
                    actor,
                    reason: Some(reason),
                    decided_at: at,
                });
            }

            (
                AggregateState::Active(data),
                WorkflowEvent::PatchRegenerationRequested { reason, .. },
            ) => {
                data.feedback = Some(reason);
            }

            (
                AggregateState::Active(data),
                WorkflowEvent::PolicyViolationsRecorded { violations, .. },
            ) => {
                // Full replacement; re-evaluation never accumulates.
                data.violations = violations;
            }

            (
                AggregateState::Active(data),
                WorkflowEvent::CiCompleted {
                    conclusion, detail, ..
                },
            ) => {
                if conclusion.is_failing() && data.stage == Stage::Sandbox {
                    let text = detail.unwrap_or_else(|| format!("CI concluded: {}", conclusion));
                    data.stage_status = StageStatus::Blocked;
                    data.ci_failure = Some(text.clone());
                    data.feedback = Some(text);
                }
            }

            (AggregateState::Active(data), WorkflowEvent::PrClosed { at }) => {
                data.stage_status = StageStatus::Blocked;
                data.stage_updated_at = at;
                data.feedback = Some("pull request closed without merge".to_string());
            }

            (AggregateState::Active(data), WorkflowEvent::WorkflowCancelled { .. }) => {
                data.state = WorkflowState::Cancelled;
            }

            (AggregateState::Active(data), WorkflowEvent::WorkflowFailed { .. }) => {
                data.state = WorkflowState::Failed;
            }

            (AggregateState::Active(data), WorkflowEvent::WorkflowCompleted { merged_at }) => {
                data.stage = Stage::Done;
                data.stage_status = StageStatus::Approved;
                data.state = WorkflowState::Done;
                data.stage_updated_at = merged_at;
            }

            // Events on the wrong state shouldn't happen with a correct log.
            _ => {}
        }
    }
}

fn handle_create(
    command: WorkflowCommand,
    now: TimestampUtc,
) -> Result<Vec<WorkflowEvent>, OrchestratorError> {
    let WorkflowCommand::CreateWorkflow {
        goal,
        context,
        repos,
    } = command
    else {
        return Err(OrchestratorError::NotInitialized);
    };

    if goal.as_str().trim().is_empty() {
        return Err(OrchestratorError::Validation {
            message: "goal must not be empty".to_string(),
        });
    }
    if repos.is_empty() {
        return Err(OrchestratorError::Validation {
            message: "at least one repo binding is required".to_string(),
        });
    }
    let primaries = repos
        .iter()
        .filter(|r| r.role == crate::domain::types::RepoRole::Primary)
        .count();
    if primaries != 1 {
        return Err(OrchestratorError::Validation {
            message: format!("exactly one primary repo required, got {}", primaries),
        });
    }
    let keys: BTreeSet<RepoKey> = repos.iter().map(RepoBinding::key).collect();
    if keys.len() != repos.len() {
        return Err(OrchestratorError::Validation {
            message: "duplicate repo bindings".to_string(),
        });
    }

    Ok(vec![
        WorkflowEvent::WorkflowCreated {
            goal,
            context,
            repos,
            created_at: now,
        },
        WorkflowEvent::StageStarted {
            stage: Stage::Feasibility,
            epoch: Epoch::first(),
            feedback: None,
            started_at: now,
        },
    ])
}

/// Restarts `stage` under a fresh epoch, or fails the workflow when a
/// configured attempt bound is exhausted.
fn restart_stage(
    data: &WorkflowData,
    stage: Stage,
    feedback: Option<String>,
    now: TimestampUtc,
    limits: &StageLimits,
) -> Vec<WorkflowEvent> {
    let epoch = data.next_epoch_for(stage);
    if let Some(max) = limits.max_stage_attempts {
        if epoch.0 > u64::from(max) {
            return vec![WorkflowEvent::WorkflowFailed {
                reason: format!("stage '{}' exhausted {} attempts", stage, max),
                at: now,
            }];
        }
    }
    vec![WorkflowEvent::StageStarted {
        stage,
        epoch,
        feedback,
        started_at: now,
    }]
}

/// True when a processor completion targets the live attempt: current stage,
/// current epoch, still processing. Anything else is stale and discarded.
fn completion_matches(data: &WorkflowData, stage: Stage, epoch: Epoch) -> bool {
    if data.stage != stage
        || data.current_epoch(stage) != epoch
        || data.stage_status != StageStatus::Processing
    {
        tracing::debug!(
            reported_stage = %stage,
            reported_epoch = %epoch,
            current_stage = %data.stage,
            current_epoch = %data.current_epoch(data.stage),
            status = ?data.stage_status,
            "discarding stale stage completion"
        );
        return false;
    }
    true
}

fn require_current_stage(
    data: &WorkflowData,
    stage: Stage,
    cmd_name: &str,
) -> Result<(), OrchestratorError> {
    if data.stage != stage {
        return Err(OrchestratorError::InvalidTransition {
            message: format!(
                "{} targets stage '{}' but workflow is at '{}'",
                cmd_name, stage, data.stage
            ),
        });
    }
    Ok(())
}

fn require_status(
    data: &WorkflowData,
    allowed: &[StageStatus],
    cmd_name: &str,
) -> Result<(), OrchestratorError> {
    if !allowed.contains(&data.stage_status) {
        return Err(OrchestratorError::InvalidTransition {
            message: format!(
                "{} not valid while stage '{}' is {:?}",
                cmd_name, data.stage, data.stage_status
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "../tests/aggregate_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "../tests/topology_tests.rs"]
mod topology_tests;
