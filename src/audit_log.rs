//! Structured JSONL audit log.
//!
//! Operational record of everything that crossed the orchestrator's boundary:
//! commands executed, gate decisions, webhook delivery outcomes. Entries are
//! machine-parseable with monotonic sequence numbers, separate from the event
//! store (which holds domain facts) and from tracing (which holds diagnostics).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::types::WorkflowId;
use crate::domain::WorkflowCommand;

/// Structured JSONL audit logger.
pub struct AuditLogger {
    seq: AtomicU64,
    log_file: Mutex<File>,
}

/// A single audit entry in JSONL format.
#[derive(Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence number within this process.
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds.
    pub ts: String,
    /// Component that emitted the entry.
    pub component: String,
    /// Structured entry data.
    pub entry: Value,
}

impl AuditLogger {
    /// Creates an audit logger writing to `<logs_dir>/audit.jsonl`.
    pub fn new(logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(logs_dir.join("audit.jsonl"))?;

        Ok(Self {
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Writes a structured entry. Thread-safe; write failures are swallowed
    /// so auditing never takes the orchestrator down.
    pub fn log(&self, component: &str, entry: impl Serialize) {
        let record = AuditEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            component: component.to_string(),
            entry: serde_json::to_value(entry).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&record) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Records a command executed against a workflow.
    pub fn log_command(&self, workflow_id: &WorkflowId, command: &WorkflowCommand) {
        self.log(
            "Workflow",
            serde_json::json!({
                "type": "CommandExecuted",
                "workflow_id": workflow_id.to_string(),
                "command": command,
            }),
        );
    }

    /// Records a command the aggregate refused.
    pub fn log_rejected_command(
        &self,
        workflow_id: &WorkflowId,
        command_name: &str,
        error: &str,
    ) {
        self.log(
            "Workflow",
            serde_json::json!({
                "type": "CommandRejected",
                "workflow_id": workflow_id.to_string(),
                "command": command_name,
                "error": error,
            }),
        );
    }

    /// Records the outcome of a webhook delivery.
    pub fn log_webhook(&self, delivery_id: &str, event_kind: &str, outcome: &str) {
        self.log(
            "Webhook",
            serde_json::json!({
                "type": "DeliveryProcessed",
                "delivery_id": delivery_id,
                "event_kind": event_kind,
                "outcome": outcome,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use tempfile::tempdir;

    #[test]
    fn entries_carry_monotonic_sequence_numbers() {
        let dir = tempdir().expect("temp dir");
        let logger = AuditLogger::new(dir.path()).expect("logger");

        logger.log_webhook("d-1", "pull_request", "accepted");
        logger.log_webhook("d-2", "check_suite", "duplicate");

        let file = File::open(dir.path().join("audit.jsonl")).expect("log file");
        let entries: Vec<AuditEntry> = std::io::BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .map(|line| serde_json::from_str(&line).expect("valid entry"))
            .collect();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
        assert_eq!(entries[0].component, "Webhook");
    }

    #[test]
    fn command_entries_embed_the_command() {
        let dir = tempdir().expect("temp dir");
        let logger = AuditLogger::new(dir.path()).expect("logger");
        let id = WorkflowId::new();

        logger.log_command(&id, &WorkflowCommand::PrMerged);

        let content =
            std::fs::read_to_string(dir.path().join("audit.jsonl")).expect("log content");
        assert!(content.contains(&id.to_string()));
        assert!(content.contains("CommandExecuted"));
    }
}
