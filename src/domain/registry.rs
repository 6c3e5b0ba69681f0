//! Routing of workflow commands to per-workflow actors.
//!
//! The registry owns one supervised actor per workflow id and is the only
//! entry point for executing commands. All commands for a given workflow pass
//! through that workflow's actor mailbox, so two concurrent signals for the
//! same workflow are applied strictly one after the other, while different
//! workflows proceed in parallel.

use crate::domain::actor::{create_actor_args, CommandOutcome, WorkflowMessage};
use crate::domain::errors::OrchestratorError;
use crate::domain::services::WorkflowServices;
use crate::domain::supervisor::{SupervisorMsg, WorkflowSupervisor};
use crate::domain::types::{Goal, RepoBinding, TimestampUtc, WorkflowId};
use crate::domain::view::WorkflowView;
use crate::domain::WorkflowCommand;
use ractor::{registry as actor_registry, Actor, ActorRef};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{oneshot, RwLock};

/// Routes commands to per-workflow actors, spawning them on demand.
pub struct WorkflowRegistry {
    store_root: PathBuf,
    services: WorkflowServices,
    snapshot_every: u64,
    supervisors: RwLock<HashMap<String, ActorRef<SupervisorMsg>>>,
}

impl WorkflowRegistry {
    pub fn new(store_root: PathBuf, services: WorkflowServices, snapshot_every: u64) -> Self {
        Self {
            store_root,
            services,
            snapshot_every,
            supervisors: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a new workflow and runs its CreateWorkflow command.
    pub async fn create_workflow(
        &self,
        goal: Goal,
        context: String,
        repos: Vec<RepoBinding>,
    ) -> Result<(WorkflowId, CommandOutcome), OrchestratorError> {
        let id = WorkflowId::new();
        let outcome = self
            .execute(
                &id,
                WorkflowCommand::CreateWorkflow {
                    goal,
                    context,
                    repos,
                },
            )
            .await?;
        Ok((id, outcome))
    }

    /// Executes a command against the workflow's actor.
    pub async fn execute(
        &self,
        workflow_id: &WorkflowId,
        command: WorkflowCommand,
    ) -> Result<CommandOutcome, OrchestratorError> {
        let actor = self.actor_for(&workflow_id.to_string()).await?;
        let (tx, rx) = oneshot::channel();
        actor
            .send_message(WorkflowMessage::Command(Box::new(command), tx))
            .map_err(|e| OrchestratorError::Storage {
                message: format!("workflow actor unavailable: {}", e),
            })?;
        rx.await.map_err(|_| OrchestratorError::Storage {
            message: "workflow actor dropped the reply".to_string(),
        })?
    }

    /// Returns the current view of a workflow.
    pub async fn view(&self, workflow_id: &WorkflowId) -> Result<WorkflowView, OrchestratorError> {
        let actor = self.actor_for(&workflow_id.to_string()).await?;
        let (tx, rx) = oneshot::channel();
        actor
            .send_message(WorkflowMessage::GetView(tx))
            .map_err(|e| OrchestratorError::Storage {
                message: format!("workflow actor unavailable: {}", e),
            })?;
        rx.await.map_err(|_| OrchestratorError::Storage {
            message: "workflow actor dropped the reply".to_string(),
        })
    }

    /// Workflow ids with persisted state under the store root. Used to resume
    /// in-flight workflows after a restart.
    pub fn persisted_workflow_ids(&self) -> Vec<WorkflowId> {
        let Ok(entries) = std::fs::read_dir(&self.store_root) else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .filter(|e| e.path().join("events.jsonl").is_file())
            .filter_map(|e| WorkflowId::from_string(&e.file_name().to_string_lossy()).ok())
            .collect()
    }

    /// Workflows whose current stage has been `processing` past the stuck
    /// threshold. Advisory only; the operator decides whether to retry.
    pub async fn stuck_workflows(&self) -> Result<Vec<WorkflowId>, OrchestratorError> {
        let now = TimestampUtc::now();
        let threshold = self.services.limits.stuck_threshold_secs;
        let mut stuck = Vec::new();
        for id in self.persisted_workflow_ids() {
            let view = self.view(&id).await?;
            if view.is_stuck(now, threshold) {
                stuck.push(id);
            }
        }
        Ok(stuck)
    }

    /// Resolves the live actor ref for a workflow, spawning it under a
    /// supervisor when absent.
    async fn actor_for(
        &self,
        workflow_id: &str,
    ) -> Result<ActorRef<WorkflowMessage>, OrchestratorError> {
        if let Some(cell) = actor_registry::where_is(workflow_id.to_string()) {
            return Ok(cell.into());
        }

        let mut supervisors = self.supervisors.write().await;
        if let Some(supervisor) = supervisors.get(workflow_id) {
            // Name lookup missed but the supervisor is up, so the actor is
            // either mid-respawn or freshly registered; the supervisor holds
            // the authoritative ref.
            let (tx, rx) = oneshot::channel();
            supervisor
                .send_message(SupervisorMsg::Resolve(tx))
                .map_err(|e| OrchestratorError::Storage {
                    message: format!("workflow supervisor unavailable: {}", e),
                })?;
            return rx
                .await
                .ok()
                .flatten()
                .ok_or_else(|| OrchestratorError::Storage {
                    message: format!("workflow actor '{}' is not running", workflow_id),
                });
        }

        let (supervisor, _handle) = WorkflowSupervisor::spawn(None, WorkflowSupervisor, ())
            .await
            .map_err(|e| OrchestratorError::Storage {
                message: format!("failed to spawn supervisor: {}", e),
            })?;

        let (args, _snapshot_rx, _event_rx) = create_actor_args(
            &self.store_root,
            workflow_id,
            self.services.clone(),
            self.snapshot_every,
        );
        let (tx, rx) = oneshot::channel();
        supervisor
            .send_message(SupervisorMsg::Spawn(args, tx))
            .map_err(|e| OrchestratorError::Storage {
                message: format!("failed to spawn workflow actor: {}", e),
            })?;
        // The supervisor acks with the ref once spawn_linked completed.
        let actor = rx.await.map_err(|_| OrchestratorError::Storage {
            message: format!("workflow actor '{}' failed to spawn", workflow_id),
        })?;
        supervisors.insert(workflow_id.to_string(), supervisor);
        Ok(actor)
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
