//! Domain model for the event-sourced workflow orchestrator.
//!
//! This module provides a strongly typed CQRS/ES domain model: state changes
//! only happen by executing commands against the workflow aggregate, which
//! appends events to a per-workflow log.
//!
//! # Architecture
//!
//! - **Commands** (`cqrs/commands.rs`): Intent to change state
//! - **Events** (`cqrs/events.rs`): Facts that have happened
//! - **Aggregate** (`cqrs/mod.rs`): Command validation and event application
//! - **View** (`view.rs`): Read-only projection for API and queries
//! - **Directives** (`directives.rs`): Side effects derived from committed events
//! - **Actor/Registry** (`actor.rs`, `registry.rs`): Per-workflow serialization

pub mod actor;
pub mod cqrs;
pub mod directives;
pub mod errors;
pub mod ledger;
pub mod registry;
pub mod services;
pub mod stuck;
pub mod supervisor;
pub mod types;
pub mod view;

// Re-export CQRS types
pub use cqrs::*;

// Re-export commonly used types for convenience
pub use actor::{
    bootstrap_view_from_events, create_actor_args, CommandOutcome, WorkflowActor,
    WorkflowActorArgs, WorkflowMessage,
};
pub use directives::{Directive, DirectiveOutbox};
pub use errors::OrchestratorError;
pub use registry::WorkflowRegistry;
pub use services::{StageLimits, WorkflowClock, WorkflowServices};
pub use supervisor::{SupervisorMsg, WorkflowSupervisor};
pub use types::{
    ActorId, ArtifactRef, CiConclusion, Decision, Epoch, Goal, RepoBinding, RepoKey, RepoRole,
    Stage, StageDecision, StageStatus, TimestampUtc, WorkflowId, WorkflowState,
};
pub use view::{WorkflowEventEnvelope, WorkflowView};
