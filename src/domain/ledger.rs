//! Attribution queries over the decision ledger.
//!
//! The ledger itself is the ordered `StageDecision` list carried by the
//! aggregate and the view; rows are only ever appended, so a correction is a
//! newer row rather than an edit. These helpers answer the audit questions
//! read surfaces ask: who approved a stage, what feedback a stage received,
//! and which decision currently stands.

use crate::domain::types::{ActorId, Decision, Stage, StageDecision};

/// The most recent decision recorded for `stage`, if any.
pub fn latest_for_stage(decisions: &[StageDecision], stage: Stage) -> Option<&StageDecision> {
    decisions.iter().rev().find(|d| d.stage == stage)
}

/// Who approved `stage` most recently, if anyone.
pub fn approver_of(decisions: &[StageDecision], stage: Stage) -> Option<&ActorId> {
    decisions
        .iter()
        .rev()
        .find(|d| d.stage == stage && d.decision == Decision::Approve)
        .map(|d| &d.actor)
}

/// All change-request reasons recorded for `stage`, oldest first.
pub fn feedback_history(decisions: &[StageDecision], stage: Stage) -> Vec<&str> {
    decisions
        .iter()
        .filter(|d| d.stage == stage && d.decision == Decision::RequestChanges)
        .filter_map(|d| d.reason.as_deref())
        .collect()
}

/// Count of decisions of `kind` across the whole workflow.
pub fn count_of(decisions: &[StageDecision], kind: Decision) -> usize {
    decisions.iter().filter(|d| d.decision == kind).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TimestampUtc;

    fn row(stage: Stage, decision: Decision, actor: &str, reason: Option<&str>) -> StageDecision {
        StageDecision {
            stage,
            decision,
            actor: ActorId::from(actor),
            reason: reason.map(str::to_string),
            decided_at: TimestampUtc::now(),
        }
    }

    #[test]
    fn latest_decision_wins_over_earlier_rows() {
        let ledger = vec![
            row(Stage::Patches, Decision::RequestChanges, "alice", Some("split the migration")),
            row(Stage::Patches, Decision::Approve, "alice", None),
        ];
        let latest = latest_for_stage(&ledger, Stage::Patches).expect("has decision");
        assert_eq!(latest.decision, Decision::Approve);
    }

    #[test]
    fn approver_attribution_per_stage() {
        let ledger = vec![
            row(Stage::Feasibility, Decision::Approve, "alice", None),
            row(Stage::Architecture, Decision::Approve, "bob", None),
        ];
        assert_eq!(
            approver_of(&ledger, Stage::Architecture).map(ActorId::as_str),
            Some("bob")
        );
        assert_eq!(approver_of(&ledger, Stage::Timeline), None);
    }

    #[test]
    fn feedback_history_preserves_order() {
        let ledger = vec![
            row(Stage::Summary, Decision::RequestChanges, "alice", Some("too vague")),
            row(Stage::Summary, Decision::RequestChanges, "alice", Some("mention rollout")),
        ];
        assert_eq!(
            feedback_history(&ledger, Stage::Summary),
            vec!["too vague", "mention rollout"]
        );
    }

    #[test]
    fn counts_span_stages() {
        let ledger = vec![
            row(Stage::Feasibility, Decision::Approve, "alice", None),
            row(Stage::Architecture, Decision::Approve, "alice", None),
            row(Stage::Timeline, Decision::RequestChanges, "bob", Some("tighten dates")),
        ];
        assert_eq!(count_of(&ledger, Decision::Approve), 2);
        assert_eq!(count_of(&ledger, Decision::Reject), 0);
    }
}
