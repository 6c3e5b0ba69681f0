//! Side-effect directives derived from committed events.
//!
//! The aggregate is pure, so launching a stage processor or pinging a human
//! gate cannot happen inside `handle`. Instead, every committed `StageStarted`
//! (and `StageReady`) is translated into a [`Directive`] the caller executes
//! after the commit. Directives are derived from persisted events only, which
//! means a crash between commit and dispatch loses at most the dispatch, and
//! replaying the log can re-derive what should be running.

use crate::domain::cqrs::WorkflowAggregate;
use crate::domain::types::{Epoch, RepoKey, Stage};
use crate::domain::WorkflowEvent;
use async_trait::async_trait;
use cqrs_es::Query;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// An instruction to the outside world, produced by a committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    /// Launch the stage processor for this attempt. Carries the epoch the
    /// completion report must echo back.
    StartStageProcessor {
        workflow_id: String,
        stage: Stage,
        epoch: Epoch,
        feedback: Option<String>,
        /// Repositories the processor fans out over; empty for single-shot
        /// stages.
        repos: Vec<RepoKey>,
    },
    /// The stage finished; surface it for a human decision.
    NotifyGate { workflow_id: String, stage: Stage },
}

/// Derives the directives implied by one committed event.
pub fn derive(
    workflow_id: &str,
    event: &WorkflowEvent,
    repos: &[RepoKey],
) -> Option<Directive> {
    match event {
        WorkflowEvent::StageStarted {
            stage,
            epoch,
            feedback,
            ..
        } => Some(Directive::StartStageProcessor {
            workflow_id: workflow_id.to_string(),
            stage: *stage,
            epoch: *epoch,
            feedback: feedback.clone(),
            repos: if stage.is_fan_out() {
                repos.to_vec()
            } else {
                Vec::new()
            },
        }),
        WorkflowEvent::StageReady { stage, .. } => Some(Directive::NotifyGate {
            workflow_id: workflow_id.to_string(),
            stage: *stage,
        }),
        _ => None,
    }
}

/// CQRS query that collects directives as events are committed.
///
/// The workflow actor drains the outbox after each `execute`, so dispatch
/// order follows commit order and is serialized per workflow.
pub struct DirectiveOutbox {
    pending: Arc<Mutex<Vec<Directive>>>,
    repos: Arc<Mutex<Vec<RepoKey>>>,
}

impl DirectiveOutbox {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
            repos: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Takes all directives accumulated since the last drain.
    pub fn drain(&self) -> Vec<Directive> {
        match self.pending.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Shares the internal buffers so the outbox can be both registered as a
    /// query and drained by the actor.
    pub fn handle_clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
            repos: self.repos.clone(),
        }
    }

    fn current_repos(&self) -> Vec<RepoKey> {
        match self.repos.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn remember_repos(&self, repos: Vec<RepoKey>) {
        match self.repos.lock() {
            Ok(mut guard) => *guard = repos,
            Err(poisoned) => *poisoned.into_inner() = repos,
        }
    }

    fn push(&self, directive: Directive) {
        match self.pending.lock() {
            Ok(mut guard) => guard.push(directive),
            Err(poisoned) => poisoned.into_inner().push(directive),
        }
    }
}

impl Default for DirectiveOutbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Query<WorkflowAggregate> for DirectiveOutbox {
    async fn dispatch(
        &self,
        aggregate_id: &str,
        events: &[cqrs_es::EventEnvelope<WorkflowAggregate>],
    ) {
        for envelope in events {
            // Repo bindings arrive on WorkflowCreated and are needed by every
            // later fan-out directive.
            if let WorkflowEvent::WorkflowCreated { repos, .. } = &envelope.payload {
                self.remember_repos(repos.iter().map(|r| r.key()).collect());
            }
            if let Some(directive) = derive(aggregate_id, &envelope.payload, &self.current_repos())
            {
                self.push(directive);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TimestampUtc;

    #[test]
    fn stage_started_yields_processor_directive() {
        let event = WorkflowEvent::StageStarted {
            stage: Stage::Feasibility,
            epoch: Epoch::first(),
            feedback: None,
            started_at: TimestampUtc::now(),
        };
        let directive = derive("wf-1", &event, &[]).expect("directive");
        assert_eq!(
            directive,
            Directive::StartStageProcessor {
                workflow_id: "wf-1".to_string(),
                stage: Stage::Feasibility,
                epoch: Epoch::first(),
                feedback: None,
                repos: vec![],
            }
        );
    }

    #[test]
    fn fan_out_stage_carries_repo_list() {
        let repos = vec![RepoKey::from("acme/api"), RepoKey::from("acme/web")];
        let event = WorkflowEvent::StageStarted {
            stage: Stage::Patches,
            epoch: Epoch::first(),
            feedback: Some("split the migration".to_string()),
            started_at: TimestampUtc::now(),
        };
        match derive("wf-1", &event, &repos) {
            Some(Directive::StartStageProcessor {
                repos: got,
                feedback,
                ..
            }) => {
                assert_eq!(got, repos);
                assert_eq!(feedback.as_deref(), Some("split the migration"));
            }
            other => panic!("unexpected directive: {:?}", other),
        }
    }

    #[test]
    fn stage_ready_yields_gate_notification() {
        let event = WorkflowEvent::StageReady {
            stage: Stage::Summary,
            epoch: Epoch::first(),
            artifact: None,
            at: TimestampUtc::now(),
        };
        assert_eq!(
            derive("wf-1", &event, &[]),
            Some(Directive::NotifyGate {
                workflow_id: "wf-1".to_string(),
                stage: Stage::Summary,
            })
        );
    }

    #[test]
    fn decision_events_yield_nothing() {
        let event = WorkflowEvent::WorkflowCancelled {
            actor: "alice".into(),
            at: TimestampUtc::now(),
        };
        assert_eq!(derive("wf-1", &event, &[]), None);
    }
}
