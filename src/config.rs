//! Configuration loading for the orchestrator.
//!
//! Configuration is a YAML file with every field optional; a missing file
//! yields the defaults. The webhook secret can also come from the
//! `ORCHESTRATOR_WEBHOOK_SECRET` environment variable, which takes precedence
//! over the file so secrets stay out of checked-in configs.

use crate::domain::services::{StageLimits, WorkflowClock, WorkflowServices};
use crate::domain::WorkflowRegistry;
use crate::ingest::Ingestor;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root directory for per-workflow event logs and snapshots.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,
    /// Seconds a stage may stay `processing` before it counts as stuck.
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,
    /// Optional bound on attempts per stage; `None` means unbounded.
    #[serde(default)]
    pub max_stage_attempts: Option<u32>,
    /// Hours a processed webhook delivery id is remembered.
    #[serde(default = "default_dedupe_ttl_hours")]
    pub dedupe_ttl_hours: i64,
    /// Snapshot the aggregate after every N events (0 disables snapshots).
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// Shared secret for webhook signature verification.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

fn default_store_root() -> PathBuf {
    PathBuf::from("data/workflows")
}

fn default_stuck_threshold_secs() -> u64 {
    600
}

fn default_dedupe_ttl_hours() -> i64 {
    24
}

fn default_snapshot_every() -> u64 {
    50
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
            max_stage_attempts: None,
            dedupe_ttl_hours: default_dedupe_ttl_hours(),
            snapshot_every: default_snapshot_every(),
            webhook_secret: None,
        }
    }
}

impl OrchestratorConfig {
    /// Loads configuration from a YAML file; a missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => serde_yaml::from_str(&content)
                .with_context(|| format!("invalid config file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to read config file {}", path.display())))
            }
        };

        if let Ok(secret) = std::env::var("ORCHESTRATOR_WEBHOOK_SECRET") {
            if !secret.is_empty() {
                config.webhook_secret = Some(secret);
            }
        }

        Ok(config)
    }

    /// Services handed to every workflow aggregate.
    pub fn services(&self) -> WorkflowServices {
        WorkflowServices {
            clock: WorkflowClock::default(),
            limits: StageLimits {
                stuck_threshold_secs: self.stuck_threshold_secs,
                max_stage_attempts: self.max_stage_attempts,
            },
        }
    }

    /// Builds the workflow registry for this configuration.
    pub fn registry(&self) -> WorkflowRegistry {
        WorkflowRegistry::new(self.store_root.clone(), self.services(), self.snapshot_every)
    }

    /// Builds the webhook ingestor for this configuration.
    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.webhook_secret.as_ref().map(|s| s.as_bytes().to_vec()),
            self.dedupe_ttl_hours,
        )
    }
}
