//! Correlation of webhook signals to workflows.
//!
//! A workflow registers the identifiers its PRs and branches carry; incoming
//! signals are resolved against those registrations. Resolution preference is
//! PR number, then head branch, then head SHA. When several workflows match
//! the same hint (a reused branch name, say) the most recently created
//! workflow wins.

use crate::domain::types::{RepoKey, TimestampUtc, WorkflowId};
use crate::ingest::webhook::CorrelationHints;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Registration {
    workflow_id: WorkflowId,
    registered_at: TimestampUtc,
}

/// Index from GitHub-side identifiers to workflow ids.
#[derive(Debug, Default)]
pub struct CorrelationIndex {
    by_pr: HashMap<(RepoKey, u64), Vec<Registration>>,
    by_branch: HashMap<(RepoKey, String), Vec<Registration>>,
    by_sha: HashMap<(RepoKey, String), Vec<Registration>>,
}

impl CorrelationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the PR number a workflow opened in `repo`.
    pub fn register_pr(
        &mut self,
        repo: RepoKey,
        pr_number: u64,
        workflow_id: WorkflowId,
        registered_at: TimestampUtc,
    ) {
        self.by_pr.entry((repo, pr_number)).or_default().push(Registration {
            workflow_id,
            registered_at,
        });
    }

    /// Registers the head branch a workflow pushes to in `repo`.
    pub fn register_branch(
        &mut self,
        repo: RepoKey,
        branch: String,
        workflow_id: WorkflowId,
        registered_at: TimestampUtc,
    ) {
        self.by_branch
            .entry((repo, branch))
            .or_default()
            .push(Registration {
                workflow_id,
                registered_at,
            });
    }

    /// Registers a commit SHA produced for a workflow in `repo`.
    pub fn register_sha(
        &mut self,
        repo: RepoKey,
        sha: String,
        workflow_id: WorkflowId,
        registered_at: TimestampUtc,
    ) {
        self.by_sha.entry((repo, sha)).or_default().push(Registration {
            workflow_id,
            registered_at,
        });
    }

    /// Drops every registration for a workflow, called when it reaches a
    /// terminal state.
    pub fn unregister(&mut self, workflow_id: &WorkflowId) {
        for bucket in self.by_pr.values_mut() {
            bucket.retain(|r| &r.workflow_id != workflow_id);
        }
        for bucket in self.by_branch.values_mut() {
            bucket.retain(|r| &r.workflow_id != workflow_id);
        }
        for bucket in self.by_sha.values_mut() {
            bucket.retain(|r| &r.workflow_id != workflow_id);
        }
    }

    /// Resolves hints to a workflow: PR number beats head branch beats head
    /// SHA, most recent registration breaks ties.
    pub fn resolve(&self, repo: &RepoKey, hints: &CorrelationHints) -> Option<WorkflowId> {
        if let Some(pr) = hints.pr_number {
            if let Some(id) = most_recent(self.by_pr.get(&(repo.clone(), pr))) {
                return Some(id);
            }
        }
        if let Some(branch) = &hints.head_branch {
            if let Some(id) = most_recent(self.by_branch.get(&(repo.clone(), branch.clone()))) {
                return Some(id);
            }
        }
        if let Some(sha) = &hints.head_sha {
            if let Some(id) = most_recent(self.by_sha.get(&(repo.clone(), sha.clone()))) {
                return Some(id);
            }
        }
        None
    }
}

fn most_recent(bucket: Option<&Vec<Registration>>) -> Option<WorkflowId> {
    bucket?
        .iter()
        .max_by_key(|r| r.registered_at.0)
        .map(|r| r.workflow_id.clone())
}

#[cfg(test)]
#[path = "tests/correlate_tests.rs"]
mod tests;
