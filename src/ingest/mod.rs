//! Webhook ingestion: verify, deduplicate, correlate, dispatch.
//!
//! The HTTP layer hands every delivery to [`Ingestor::ingest`] and always
//! acknowledges GitHub with a success status regardless of the outcome;
//! a non-2xx response would only trigger redelivery of a payload we have
//! already decided to drop. What happened to the delivery is recorded in the
//! returned [`IngestOutcome`] and in the logs. Accepted deliveries are only
//! deduplicated after the caller confirms the command reached the
//! orchestrator via [`Ingestor::mark_dispatched`].

pub mod correlate;
pub mod dedupe;
pub mod webhook;

pub use correlate::CorrelationIndex;
pub use dedupe::DeliveryLog;
pub use webhook::{verify_signature, CorrelationHints, WebhookDelivery, WebhookSignal};

use crate::domain::types::{RepoKey, TimestampUtc, WorkflowId};
use crate::domain::WorkflowCommand;
use std::sync::RwLock;

/// What became of one webhook delivery.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Verified, novel, and correlated: dispatch this command, then confirm
    /// with [`Ingestor::mark_dispatched`].
    Accepted {
        workflow_id: WorkflowId,
        command: WorkflowCommand,
    },
    /// Signature missing or invalid; payload was not inspected.
    DroppedBadSignature,
    /// Delivery id already processed within the TTL window.
    Duplicate,
    /// Verified signal with no matching workflow.
    NoMatch,
    /// Event kind or action this service does not consume.
    Ignored,
}

/// Front door for webhook deliveries.
pub struct Ingestor {
    secret: Option<Vec<u8>>,
    deliveries: DeliveryLog,
    index: RwLock<CorrelationIndex>,
}

impl Ingestor {
    /// Creates an ingestor. With no secret configured, signature verification
    /// is skipped; deployments are expected to set one.
    pub fn new(secret: Option<Vec<u8>>, dedupe_ttl_hours: i64) -> Self {
        if secret.is_none() {
            tracing::warn!("webhook secret not configured; signatures will not be verified");
        }
        Self {
            secret,
            deliveries: DeliveryLog::new(dedupe_ttl_hours),
            index: RwLock::new(CorrelationIndex::new()),
        }
    }

    /// Processes one delivery end to end.
    pub fn ingest(&self, delivery: &WebhookDelivery, now: TimestampUtc) -> IngestOutcome {
        if let Some(secret) = &self.secret {
            let verified = delivery
                .signature
                .as_deref()
                .map(|sig| verify_signature(secret, &delivery.body, sig))
                .unwrap_or(false);
            if !verified {
                // Logged and dropped; the HTTP layer still acks so GitHub
                // does not retry a payload we will never accept.
                tracing::warn!(
                    delivery_id = %delivery.delivery_id,
                    event_kind = %delivery.event_kind,
                    "dropping webhook delivery with missing or invalid signature"
                );
                return IngestOutcome::DroppedBadSignature;
            }
        }

        if self.deliveries.contains(&delivery.delivery_id, now) {
            tracing::debug!(
                delivery_id = %delivery.delivery_id,
                "dropping duplicate webhook delivery"
            );
            return IngestOutcome::Duplicate;
        }

        let signal = webhook::parse_signal(&delivery.event_kind, &delivery.body);
        let outcome = self.dispatch(signal);
        match &outcome {
            // An accepted command still has to reach the orchestrator; the
            // caller confirms with `mark_dispatched` once it has. A crash or
            // an unavailable actor leaves the id unmarked, so the redelivery
            // is processed again rather than lost.
            IngestOutcome::Accepted { .. } => {}
            _ => self.deliveries.mark(&delivery.delivery_id, now),
        }
        outcome
    }

    /// Records a delivery as fully processed. Called for `Accepted` outcomes
    /// once the command has actually been dispatched.
    pub fn mark_dispatched(&self, delivery_id: &str, now: TimestampUtc) {
        self.deliveries.mark(delivery_id, now);
    }

    fn dispatch(&self, signal: WebhookSignal) -> IngestOutcome {
        let (repo, hints, command) = match signal {
            WebhookSignal::PrMerged { repo, hints } => (repo, hints, WorkflowCommand::PrMerged),
            WebhookSignal::PrClosed { repo, hints } => (repo, hints, WorkflowCommand::PrClosed),
            WebhookSignal::CiCompleted {
                repo,
                conclusion,
                detail,
                hints,
            } => (
                repo,
                hints,
                WorkflowCommand::CiCompleted { conclusion, detail },
            ),
            WebhookSignal::Ignored => return IngestOutcome::Ignored,
        };

        let resolved = match self.index.read() {
            Ok(index) => index.resolve(&repo, &hints),
            Err(poisoned) => poisoned.into_inner().resolve(&repo, &hints),
        };
        match resolved {
            Some(workflow_id) => IngestOutcome::Accepted {
                workflow_id,
                command,
            },
            None => {
                tracing::debug!(repo = %repo, ?hints, "webhook signal matched no workflow");
                IngestOutcome::NoMatch
            }
        }
    }

    /// Registers the PR a workflow opened, for later correlation.
    pub fn register_pr(&self, repo: RepoKey, pr_number: u64, workflow_id: WorkflowId) {
        self.with_index(|index| {
            index.register_pr(repo, pr_number, workflow_id, TimestampUtc::now())
        });
    }

    /// Registers the head branch a workflow pushes to.
    pub fn register_branch(&self, repo: RepoKey, branch: String, workflow_id: WorkflowId) {
        self.with_index(|index| {
            index.register_branch(repo, branch, workflow_id, TimestampUtc::now())
        });
    }

    /// Registers a commit SHA produced for a workflow.
    pub fn register_sha(&self, repo: RepoKey, sha: String, workflow_id: WorkflowId) {
        self.with_index(|index| index.register_sha(repo, sha, workflow_id, TimestampUtc::now()));
    }

    /// Drops all correlation state for a terminal workflow.
    pub fn unregister(&self, workflow_id: &WorkflowId) {
        self.with_index(|index| index.unregister(workflow_id));
    }

    fn with_index(&self, f: impl FnOnce(&mut CorrelationIndex)) {
        match self.index.write() {
            Ok(mut index) => f(&mut index),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
#[path = "tests/ingestor_tests.rs"]
mod tests;
