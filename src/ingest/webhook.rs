//! GitHub webhook verification and normalization.
//!
//! Raw deliveries are verified against the shared secret with HMAC-SHA256
//! before any payload field is trusted, then normalized into a
//! [`WebhookSignal`] carrying only what the orchestrator needs: what happened
//! plus the correlation hints (PR number, head branch, head SHA) that tie the
//! delivery back to a workflow.

use crate::domain::types::{CiConclusion, RepoKey};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// One raw webhook delivery as received from GitHub.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    /// `X-GitHub-Delivery` header.
    pub delivery_id: String,
    /// `X-GitHub-Event` header.
    pub event_kind: String,
    /// `X-Hub-Signature-256` header, if present.
    pub signature: Option<String>,
    /// Raw request body.
    pub body: Vec<u8>,
}

/// Correlation hints extracted from a delivery, in resolution preference
/// order: PR number, then head branch, then head SHA.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CorrelationHints {
    pub pr_number: Option<u64>,
    pub head_branch: Option<String>,
    pub head_sha: Option<String>,
}

/// A normalized signal extracted from a verified delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookSignal {
    /// The pull request was merged.
    PrMerged {
        repo: RepoKey,
        hints: CorrelationHints,
    },
    /// The pull request was closed without merging.
    PrClosed {
        repo: RepoKey,
        hints: CorrelationHints,
    },
    /// A CI run reached a terminal conclusion.
    CiCompleted {
        repo: RepoKey,
        conclusion: CiConclusion,
        detail: Option<String>,
        hints: CorrelationHints,
    },
    /// GitHub's ping or any event kind this service does not consume.
    Ignored,
}

/// Verifies the `sha256=<hex>` signature header against the request body.
///
/// Uses the MAC implementation's constant-time comparison; callers must not
/// substitute a byte-equality check.
pub fn verify_signature(secret: &[u8], body: &[u8], signature_header: &str) -> bool {
    let Some(hex_digest) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Parses a verified delivery body into a normalized signal.
///
/// Unknown event kinds and non-terminal actions map to `Ignored`; parsing
/// never fails the delivery, it only degrades to `Ignored` with a log line.
pub fn parse_signal(event_kind: &str, body: &[u8]) -> WebhookSignal {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(event_kind, "unparseable webhook payload: {}", e);
            return WebhookSignal::Ignored;
        }
    };

    let Some(repo) = repo_key(&payload) else {
        return WebhookSignal::Ignored;
    };

    match event_kind {
        "pull_request" => parse_pull_request(repo, &payload),
        "check_suite" => parse_check(repo, payload.get("check_suite")),
        "check_run" => parse_check(repo, payload.get("check_run")),
        "status" => parse_commit_status(repo, &payload),
        _ => WebhookSignal::Ignored,
    }
}

fn parse_pull_request(repo: RepoKey, payload: &Value) -> WebhookSignal {
    if payload.get("action").and_then(Value::as_str) != Some("closed") {
        return WebhookSignal::Ignored;
    }
    let Some(pr) = payload.get("pull_request") else {
        return WebhookSignal::Ignored;
    };
    let hints = CorrelationHints {
        pr_number: pr.get("number").and_then(Value::as_u64),
        head_branch: json_str(pr, &["head", "ref"]),
        head_sha: json_str(pr, &["head", "sha"]),
    };
    if pr.get("merged").and_then(Value::as_bool) == Some(true) {
        WebhookSignal::PrMerged { repo, hints }
    } else {
        WebhookSignal::PrClosed { repo, hints }
    }
}

fn parse_check(repo: RepoKey, check: Option<&Value>) -> WebhookSignal {
    let Some(check) = check else {
        return WebhookSignal::Ignored;
    };
    if check.get("status").and_then(Value::as_str) != Some("completed") {
        return WebhookSignal::Ignored;
    }
    let Some(conclusion) = check
        .get("conclusion")
        .and_then(Value::as_str)
        .and_then(parse_conclusion)
    else {
        return WebhookSignal::Ignored;
    };

    let hints = CorrelationHints {
        pr_number: check
            .get("pull_requests")
            .and_then(Value::as_array)
            .and_then(|prs| prs.first())
            .and_then(|pr| pr.get("number"))
            .and_then(Value::as_u64),
        head_branch: check
            .get("head_branch")
            .and_then(Value::as_str)
            .map(str::to_string),
        head_sha: check
            .get("head_sha")
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    let detail = check
        .get("output")
        .and_then(|o| o.get("summary"))
        .and_then(Value::as_str)
        .map(str::to_string);

    WebhookSignal::CiCompleted {
        repo,
        conclusion,
        detail,
        hints,
    }
}

/// Legacy commit-status API. Only terminal states are consumed; `pending`
/// is ignored like an in-progress check.
fn parse_commit_status(repo: RepoKey, payload: &Value) -> WebhookSignal {
    let conclusion = match payload.get("state").and_then(Value::as_str) {
        Some("success") => CiConclusion::Success,
        Some("failure") | Some("error") => CiConclusion::Failure,
        _ => return WebhookSignal::Ignored,
    };

    let hints = CorrelationHints {
        pr_number: None,
        head_branch: payload
            .get("branches")
            .and_then(Value::as_array)
            .and_then(|branches| branches.first())
            .and_then(|b| b.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        head_sha: payload
            .get("sha")
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    let detail = payload
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    WebhookSignal::CiCompleted {
        repo,
        conclusion,
        detail,
        hints,
    }
}

fn parse_conclusion(s: &str) -> Option<CiConclusion> {
    match s {
        "success" => Some(CiConclusion::Success),
        "failure" => Some(CiConclusion::Failure),
        "cancelled" => Some(CiConclusion::Cancelled),
        "timed_out" => Some(CiConclusion::TimedOut),
        "action_required" => Some(CiConclusion::ActionRequired),
        "neutral" => Some(CiConclusion::Neutral),
        "skipped" => Some(CiConclusion::Skipped),
        other => {
            tracing::debug!(conclusion = other, "unknown CI conclusion");
            None
        }
    }
}

fn repo_key(payload: &Value) -> Option<RepoKey> {
    json_str(payload, &["repository", "full_name"]).map(RepoKey)
}

fn json_str(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(str::to_string)
}

#[cfg(test)]
#[path = "tests/webhook_tests.rs"]
mod tests;
