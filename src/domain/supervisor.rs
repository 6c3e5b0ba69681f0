//! Workflow supervisor for fault-tolerant actor management.
//!
//! The supervisor monitors workflow actors and automatically restarts them if
//! they fail or terminate unexpectedly. A restarted actor re-bootstraps from
//! the event log, so no committed state is lost across a respawn.

use crate::domain::actor::{WorkflowActor, WorkflowActorArgs, WorkflowMessage};
use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::oneshot;

/// Messages for the workflow supervisor.
pub enum SupervisorMsg {
    /// Spawn a new workflow actor and reply with its ref once it is live.
    Spawn(WorkflowActorArgs, oneshot::Sender<ActorRef<WorkflowMessage>>),
    /// Reply with the currently supervised actor, if one is running.
    Resolve(oneshot::Sender<Option<ActorRef<WorkflowMessage>>>),
}

/// The workflow supervisor actor.
pub struct WorkflowSupervisor;

impl WorkflowSupervisor {
    async fn spawn_workflow(
        args: WorkflowActorArgs,
        myself: &ActorRef<SupervisorMsg>,
    ) -> Result<ActorRef<WorkflowMessage>, ActorProcessingErr> {
        // Actors register under the workflow id so callers can resolve the
        // live ref even after a respawn.
        let name = args.aggregate_id.clone();
        let (actor, _handle) =
            WorkflowActor::spawn_linked(Some(name), WorkflowActor, args, myself.get_cell()).await?;
        Ok(actor)
    }
}

#[async_trait]
impl Actor for WorkflowSupervisor {
    type Msg = SupervisorMsg;
    type State = Option<(WorkflowActorArgs, ActorRef<WorkflowMessage>)>;
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        _args: (),
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(None)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        msg: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match msg {
            SupervisorMsg::Spawn(args, reply) => {
                let actor = Self::spawn_workflow(args.clone(), &myself).await?;
                *state = Some((args, actor.clone()));
                if reply.send(actor).is_err() {
                    tracing::debug!("Spawn reply channel closed");
                }
            }
            SupervisorMsg::Resolve(reply) => {
                let _ = reply.send(state.as_ref().map(|(_, actor)| actor.clone()));
            }
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        evt: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if matches!(
            evt,
            SupervisionEvent::ActorFailed(_, _) | SupervisionEvent::ActorTerminated(_, _, _)
        ) {
            if let Some((args, _)) = state.clone() {
                tracing::warn!(
                    workflow_id = %args.aggregate_id,
                    "workflow actor stopped; respawning"
                );
                let actor = Self::spawn_workflow(args.clone(), &myself).await?;
                *state = Some((args, actor));
            }
        }
        Ok(())
    }
}
