//! Error types for the orchestration domain.

use std::fmt::{Display, Formatter};

/// Errors that can occur during workflow command handling.
///
/// Domain-expected outcomes (a policy block, an invalid gate action) are typed
/// variants returned to the caller; they never mutate state. Infrastructure
/// failures surface as `Storage` and are retryable by the caller.
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// Malformed command, rejected before any state change.
    Validation { message: String },
    /// Invalid state transition attempted.
    InvalidTransition { message: String },
    /// Approval of the policy stage refused because blocking violations exist.
    PolicyBlocked { blocking: usize },
    /// Command executed on an uninitialized workflow.
    NotInitialized,
    /// Optimistic lock failure (concurrent modification detected).
    Conflict { message: String },
    /// Storage/persistence failure.
    Storage { message: String },
}

impl Display for OrchestratorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { message } => write!(f, "validation failed: {}", message),
            Self::InvalidTransition { message } => write!(f, "invalid transition: {}", message),
            Self::PolicyBlocked { blocking } => {
                write!(f, "policy gate blocked: {} blocking violation(s)", blocking)
            }
            Self::NotInitialized => write!(f, "workflow not initialized"),
            Self::Conflict { message } => write!(f, "concurrency conflict: {}", message),
            Self::Storage { message } => write!(f, "storage failure: {}", message),
        }
    }
}

impl std::error::Error for OrchestratorError {}
