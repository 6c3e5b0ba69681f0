//! Stuck-stage classification.
//!
//! A stage attempt is *stuck* when it has been `processing` longer than the
//! configured threshold without a completion report. Stuck is advisory: it
//! never changes state by itself, it only makes an operator retry eligible and
//! lets read surfaces flag the workflow.

use crate::domain::types::{StageStatus, TimestampUtc};
use chrono::Duration;

/// True when a stage in `status` since `updated_at` counts as stuck at `now`.
pub fn is_stuck(
    status: StageStatus,
    updated_at: TimestampUtc,
    now: TimestampUtc,
    threshold_secs: u64,
) -> bool {
    if status != StageStatus::Processing {
        return false;
    }
    let elapsed = now.0.signed_duration_since(updated_at.0);
    elapsed > Duration::seconds(threshold_secs as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> TimestampUtc {
        TimestampUtc(
            Utc.timestamp_opt(1_700_000_000 + secs, 0)
                .single()
                .expect("valid timestamp"),
        )
    }

    #[test]
    fn processing_past_threshold_is_stuck() {
        assert!(is_stuck(StageStatus::Processing, at(0), at(601), 600));
    }

    #[test]
    fn processing_at_threshold_is_not_stuck() {
        // Strictly greater than the threshold.
        assert!(!is_stuck(StageStatus::Processing, at(0), at(600), 600));
    }

    #[test]
    fn non_processing_statuses_are_never_stuck() {
        for status in [
            StageStatus::Pending,
            StageStatus::Ready,
            StageStatus::Approved,
            StageStatus::NeedsChanges,
            StageStatus::Blocked,
            StageStatus::Rejected,
        ] {
            assert!(!is_stuck(status, at(0), at(10_000), 600));
        }
    }
}
