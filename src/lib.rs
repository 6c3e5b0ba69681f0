//! Human-gated orchestration core for AI-assisted code-change proposals.
//!
//! A workflow moves through a fixed pipeline (feasibility → architecture →
//! timeline → summary → patches → policy → sandbox → pr → done). Every stage
//! is processed by an external stage processor and gated by a human decision.
//! The orchestrator is an event-sourced state machine: commands are validated
//! by the [`domain::WorkflowAggregate`], committed as events to an append-only
//! log, and projected into a read-only [`domain::WorkflowView`].
//!
//! Per-workflow serialization is provided by one [`domain::WorkflowActor`]
//! per workflow id, routed through the [`domain::WorkflowRegistry`]. Signals
//! from GitHub webhooks and stage processors enter through [`ingest`], which
//! verifies, deduplicates, and correlates them before dispatch.

pub mod audit_log;
pub mod config;
pub mod domain;
pub mod event_store;
pub mod ingest;
pub mod policy;

pub use audit_log::AuditLogger;
pub use config::OrchestratorConfig;
pub use domain::{
    CommandOutcome, Directive, OrchestratorError, WorkflowCommand, WorkflowEvent, WorkflowRegistry,
    WorkflowView,
};
