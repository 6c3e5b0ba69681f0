//! External services for the workflow aggregate.
//!
//! Services provide external dependencies (time, operational limits) to the
//! aggregate without coupling it to specific implementations. The aggregate
//! itself performs no I/O.

use crate::domain::types::TimestampUtc;

/// Services injected into the workflow aggregate for command handling.
#[derive(Debug, Clone, Default)]
pub struct WorkflowServices {
    pub clock: WorkflowClock,
    pub limits: StageLimits,
}

/// Clock service for timestamp generation.
#[derive(Debug, Clone, Default)]
pub struct WorkflowClock {
    /// Fixed time for deterministic tests; `None` uses the wall clock.
    frozen: Option<TimestampUtc>,
}

impl WorkflowClock {
    /// Returns the current UTC timestamp.
    pub fn now(&self) -> TimestampUtc {
        self.frozen.unwrap_or_else(TimestampUtc::now)
    }

    /// Creates a clock pinned to a fixed instant.
    pub fn frozen_at(ts: TimestampUtc) -> Self {
        Self { frozen: Some(ts) }
    }
}

/// Operational limits consulted during command validation.
#[derive(Debug, Clone)]
pub struct StageLimits {
    /// A stage still `processing` after this many seconds is classified as
    /// stuck, which makes it eligible for an operator retry.
    pub stuck_threshold_secs: u64,
    /// Optional bound on attempts per stage. `None` means manual retries are
    /// unbounded; exceeding the bound moves the workflow to `failed`.
    pub max_stage_attempts: Option<u32>,
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            stuck_threshold_secs: 600,
            max_stage_attempts: None,
        }
    }
}
