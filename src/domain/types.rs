//! Strongly typed domain primitives for the workflow aggregate.
//!
//! These newtypes and closed enums pin down the pipeline topology: the fixed
//! stage order, the per-stage lifecycle, and the identifiers used to correlate
//! asynchronous completions back to the attempt that started them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a workflow.
/// Used as the aggregate_id in the event store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Creates a new random workflow ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a workflow ID from a string.
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user-stated goal driving the proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal(pub String);

impl Goal {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Goal {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Goal {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of the human issuing a gate decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// UTC timestamp attached to events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampUtc(pub DateTime<Utc>);

impl TimestampUtc {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the timestamp as an RFC3339 string.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for TimestampUtc {
    fn default() -> Self {
        Self::now()
    }
}

/// Attempt counter per (workflow, stage). Incremented on every (re)start of a
/// stage; completions carrying a superseded epoch are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Epoch(pub u64);

impl Epoch {
    /// First attempt at a stage.
    pub fn first() -> Self {
        Self(1)
    }

    /// The next attempt.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::first()
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stages in their fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Feasibility,
    Architecture,
    Timeline,
    Summary,
    Patches,
    Policy,
    Sandbox,
    Pr,
    Done,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ORDER: [Stage; 9] = [
        Stage::Feasibility,
        Stage::Architecture,
        Stage::Timeline,
        Stage::Summary,
        Stage::Patches,
        Stage::Policy,
        Stage::Sandbox,
        Stage::Pr,
        Stage::Done,
    ];

    /// The following stage in the fixed order, `None` after `Done`.
    pub fn next(&self) -> Option<Stage> {
        let idx = Stage::ORDER.iter().position(|s| s == self)?;
        Stage::ORDER.get(idx + 1).copied()
    }

    /// Position in the fixed order, used for monotonicity checks.
    pub fn ordinal(&self) -> usize {
        Stage::ORDER
            .iter()
            .position(|s| s == self)
            .unwrap_or(Stage::ORDER.len())
    }

    /// Stages operated per repository. The workflow-level stage only advances
    /// once every bound repository reports completion.
    pub fn is_fan_out(&self) -> bool {
        matches!(self, Stage::Patches | Stage::Sandbox | Stage::Pr)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Feasibility => "feasibility",
            Stage::Architecture => "architecture",
            Stage::Timeline => "timeline",
            Stage::Summary => "summary",
            Stage::Patches => "patches",
            Stage::Policy => "policy",
            Stage::Sandbox => "sandbox",
            Stage::Pr => "pr",
            Stage::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Per-stage lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Processing,
    Ready,
    Approved,
    NeedsChanges,
    Blocked,
    Rejected,
}

/// Coarse workflow-level state retained for legacy clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Active,
    Done,
    Rejected,
    Cancelled,
    Failed,
}

impl WorkflowState {
    /// Terminal workflows accept no further mutating events.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowState::Active)
    }
}

/// Role of a repository within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoRole {
    Primary,
    Secondary,
}

/// `owner/repo` key identifying a bound repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoKey(pub String);

impl RepoKey {
    pub fn new(owner: &str, repo: &str) -> Self {
        Self(format!("{}/{}", owner, repo))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RepoKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RepoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Association of a workflow to a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoBinding {
    pub owner: String,
    pub repo: String,
    pub base_branch: String,
    pub role: RepoRole,
}

impl RepoBinding {
    /// The `owner/repo` key for this binding.
    pub fn key(&self) -> RepoKey {
        RepoKey::new(&self.owner, &self.repo)
    }
}

/// Reference to an artifact produced by a completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub stage: Stage,
    /// Repository the artifact belongs to, for fan-out stages.
    pub repo: Option<RepoKey>,
    pub label: String,
    pub uri: Option<String>,
}

/// Human gate decision kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    RequestChanges,
}

/// One human decision at stage granularity. Append-only; corrections are new
/// rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDecision {
    pub stage: Stage,
    pub decision: Decision,
    pub actor: ActorId,
    pub reason: Option<String>,
    pub decided_at: TimestampUtc,
}

/// Terminal CI conclusion reported for a sandbox run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiConclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    ActionRequired,
    Neutral,
    Skipped,
}

impl CiConclusion {
    /// Conclusions that block the sandbox stage.
    pub fn is_failing(&self) -> bool {
        matches!(
            self,
            CiConclusion::Failure
                | CiConclusion::Cancelled
                | CiConclusion::TimedOut
                | CiConclusion::ActionRequired
        )
    }
}

impl std::fmt::Display for CiConclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CiConclusion::Success => "success",
            CiConclusion::Failure => "failure",
            CiConclusion::Cancelled => "cancelled",
            CiConclusion::TimedOut => "timed_out",
            CiConclusion::ActionRequired => "action_required",
            CiConclusion::Neutral => "neutral",
            CiConclusion::Skipped => "skipped",
        };
        write!(f, "{}", name)
    }
}
