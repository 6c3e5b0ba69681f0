//! Workflow actor for CQRS command handling.
//!
//! One actor per workflow id wraps the CQRS framework and serializes every
//! command for that workflow through its mailbox. That single-writer property
//! is what makes epoch checks race-free: two racing completions are handled
//! one after the other against the latest committed state.

use crate::domain::cqrs::WorkflowAggregate;
use crate::domain::directives::{Directive, DirectiveOutbox};
use crate::domain::errors::OrchestratorError;
use crate::domain::services::WorkflowServices;
use crate::domain::view::{WorkflowEventEnvelope, WorkflowView};
use crate::domain::WorkflowCommand;
use crate::domain::WorkflowQuery;
use crate::event_store::{FileEventStore, StoredEvent};
use async_trait::async_trait;
use cqrs_es::{AggregateError, CqrsFramework};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch, RwLock};

/// Result of executing a command: the updated view plus the side effects the
/// committed events imply. Directives are already persisted as events, so the
/// caller can dispatch them without further coordination.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub view: WorkflowView,
    pub directives: Vec<Directive>,
}

/// Messages that can be sent to the workflow actor.
pub enum WorkflowMessage {
    /// Execute a command and return the outcome (or error).
    Command(
        Box<WorkflowCommand>,
        oneshot::Sender<Result<CommandOutcome, OrchestratorError>>,
    ),
    /// Get the current view.
    GetView(oneshot::Sender<WorkflowView>),
}

/// Arguments for spawning a workflow actor.
#[derive(Clone)]
pub struct WorkflowActorArgs {
    /// The aggregate ID (workflow ID).
    pub aggregate_id: String,
    /// Store root; the event store derives the workflow's directory from it.
    pub store_root: PathBuf,
    /// Snapshot after every N events.
    pub snapshot_every: u64,
    /// Shared view for projection.
    pub view: Arc<RwLock<WorkflowView>>,
    /// Watch channel sender for view snapshots.
    pub snapshot_tx: watch::Sender<WorkflowView>,
    /// Broadcast channel sender for event streaming.
    pub event_tx: broadcast::Sender<WorkflowEventEnvelope>,
    /// Services for command handling.
    pub services: WorkflowServices,
}

/// State maintained by the workflow actor.
pub struct WorkflowActorState {
    /// The CQRS framework instance.
    pub cqrs: CqrsFramework<WorkflowAggregate, FileEventStore>,
    /// The aggregate ID.
    pub aggregate_id: String,
    /// Shared view for reading.
    pub view: Arc<RwLock<WorkflowView>>,
    /// Outbox drained after each command.
    pub outbox: DirectiveOutbox,
}

/// The workflow actor.
pub struct WorkflowActor;

impl WorkflowActor {
    /// Builds the CQRS framework from actor arguments.
    pub fn build_cqrs(
        args: &WorkflowActorArgs,
    ) -> (
        CqrsFramework<WorkflowAggregate, FileEventStore>,
        DirectiveOutbox,
    ) {
        let store = FileEventStore::new(&args.store_root, &args.aggregate_id, args.snapshot_every);

        let query = WorkflowQuery::new(
            args.view.clone(),
            args.snapshot_tx.clone(),
            args.event_tx.clone(),
        );
        let outbox = DirectiveOutbox::new();

        let cqrs = CqrsFramework::new(
            store,
            vec![Box::new(query), Box::new(outbox.handle_clone())],
            args.services.clone(),
        );
        (cqrs, outbox)
    }
}

#[async_trait]
impl Actor for WorkflowActor {
    type Msg = WorkflowMessage;
    type State = WorkflowActorState;
    type Arguments = WorkflowActorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let (cqrs, outbox) = WorkflowActor::build_cqrs(&args);

        Ok(WorkflowActorState {
            cqrs,
            aggregate_id: args.aggregate_id,
            view: args.view,
            outbox,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkflowMessage::Command(boxed_cmd, reply) => {
                let cmd = *boxed_cmd;
                let result = state.cqrs.execute(&state.aggregate_id, cmd).await;
                let view = state.view.read().await.clone();

                let mapped = match result {
                    Ok(()) => Ok(CommandOutcome {
                        view,
                        directives: state.outbox.drain(),
                    }),
                    Err(AggregateError::UserError(err)) => Err(err),
                    Err(AggregateError::AggregateConflict) => Err(OrchestratorError::Conflict {
                        message: "aggregate was modified concurrently".to_string(),
                    }),
                    Err(err) => Err(OrchestratorError::Storage {
                        message: err.to_string(),
                    }),
                };

                if reply.send(mapped).is_err() {
                    tracing::debug!("Command reply channel closed");
                }
            }
            WorkflowMessage::GetView(reply) => {
                let view = state.view.read().await.clone();
                if reply.send(view).is_err() {
                    tracing::debug!("View reply channel closed");
                }
            }
        }

        Ok(())
    }
}

/// Bootstraps a WorkflowView by replaying events from an event log file.
///
/// Used when resuming a workflow after a restart: the view is rebuilt from
/// persisted events so read surfaces are consistent before the first new
/// command lands. Returns `WorkflowView::default()` if the log file doesn't
/// exist.
pub fn bootstrap_view_from_events(log_path: &Path, aggregate_id: &str) -> WorkflowView {
    let mut view = WorkflowView::default();

    let file = match File::open(log_path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return view,
        Err(e) => {
            tracing::warn!("Failed to open event log {}: {}", log_path.display(), e);
            return view;
        }
    };

    let reader = BufReader::new(file);
    let mut skipped_lines = 0;

    for line in reader.lines().map_while(Result::ok) {
        if let Ok(stored) = serde_json::from_str::<StoredEvent>(&line) {
            if stored.aggregate_id == aggregate_id {
                view.apply_event(&stored.aggregate_id, &stored.event, stored.sequence);
            }
        } else {
            skipped_lines += 1;
        }
    }

    if skipped_lines > 0 {
        tracing::warn!("Skipped {} unparseable lines in event log", skipped_lines);
    }

    view
}

/// Creates actor arguments for a workflow stored under `store_root`.
///
/// For resumed workflows the initial view is bootstrapped by replaying the
/// event log; for new workflows the view starts empty and is populated by the
/// first CreateWorkflow command.
pub fn create_actor_args(
    store_root: &Path,
    workflow_id: &str,
    services: WorkflowServices,
    snapshot_every: u64,
) -> (
    WorkflowActorArgs,
    watch::Receiver<WorkflowView>,
    broadcast::Receiver<WorkflowEventEnvelope>,
) {
    let store = FileEventStore::new(store_root, workflow_id, snapshot_every);
    let initial_view = bootstrap_view_from_events(&store.log_path(), workflow_id);
    let view = Arc::new(RwLock::new(initial_view.clone()));
    let (snapshot_tx, snapshot_rx) = watch::channel(initial_view);
    let (event_tx, event_rx) = broadcast::channel(64);

    let args = WorkflowActorArgs {
        aggregate_id: workflow_id.to_string(),
        store_root: store_root.to_path_buf(),
        snapshot_every,
        view,
        snapshot_tx,
        event_tx,
        services,
    };

    (args, snapshot_rx, event_rx)
}

#[cfg(test)]
#[path = "tests/actor_tests.rs"]
mod tests;
