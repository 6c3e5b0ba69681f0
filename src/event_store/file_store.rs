//! JSONL event store scoped to a single workflow.
//!
//! The store owns the on-disk layout: each workflow gets its own directory
//! under the store root, holding `events.jsonl` (append-only, one JSON record
//! per line) and `snapshot.json` (latest aggregate state, replaced
//! atomically). Concurrent writers are fenced twice: an exclusive file lock
//! around the append, and a committed-sequence check that surfaces as
//! `AggregateConflict` when another writer advanced the log in between.

use crate::domain::errors::OrchestratorError;
use crate::domain::types::TimestampUtc;
use crate::domain::WorkflowAggregate;
use crate::domain::WorkflowEvent;
use async_trait::async_trait;
use cqrs_es::{
    Aggregate, AggregateContext, AggregateError, DomainEvent, EventEnvelope, EventStore,
};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOG_FILE: &str = "events.jsonl";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// One line of the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub aggregate_id: String,
    pub sequence: u64,
    pub recorded_at: TimestampUtc,
    pub event_type: String,
    pub event_version: String,
    pub event: WorkflowEvent,
    pub metadata: HashMap<String, String>,
}

/// Persisted aggregate state, written every `snapshot_every` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub aggregate_id: String,
    pub sequence: u64,
    pub snapshot_at: TimestampUtc,
    pub state: WorkflowAggregate,
}

/// Event store bound to one workflow's directory under the store root.
#[derive(Debug, Clone)]
pub struct FileEventStore {
    dir: PathBuf,
    snapshot_every: u64,
}

/// Aggregate context for file-based storage.
pub struct FileAggregateContext<A: Aggregate> {
    /// The aggregate ID.
    pub aggregate_id: String,
    /// The rehydrated aggregate.
    pub aggregate: A,
    /// The current sequence number (last applied event).
    pub current_sequence: u64,
}

impl<A: Aggregate> AggregateContext<A> for FileAggregateContext<A> {
    fn aggregate(&self) -> &A {
        &self.aggregate
    }
}

fn storage_err<E>(e: E) -> AggregateError<OrchestratorError>
where
    E: std::error::Error + Send + Sync + 'static,
{
    AggregateError::UnexpectedError(Box::new(e))
}

impl FileEventStore {
    /// Creates a store for `workflow_id`, rooted at
    /// `<store_root>/<workflow_id>/`.
    pub fn new(store_root: &Path, workflow_id: &str, snapshot_every: u64) -> Self {
        Self {
            dir: store_root.join(workflow_id),
            snapshot_every,
        }
    }

    /// Path of this workflow's event log.
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// Path of this workflow's snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Reads and validates every stored record for `aggregate_id`, in log
    /// order. A missing log is an empty history.
    fn stored_events(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<StoredEvent>, AggregateError<OrchestratorError>> {
        let file = match File::open(self.log_path()) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(e)),
        };
        file.lock_shared().map_err(storage_err)?;

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(storage_err)?;
            let stored: StoredEvent = serde_json::from_str(&line)
                .map_err(|e| AggregateError::DeserializationError(Box::new(e)))?;

            // A misplaced or hand-copied log must not leak another workflow's
            // events into this aggregate.
            if stored.aggregate_id != aggregate_id {
                continue;
            }
            if stored.event_type != stored.event.event_type()
                || stored.event_version != stored.event.event_version()
            {
                return Err(storage_err(std::io::Error::new(
                    ErrorKind::InvalidData,
                    "event type/version mismatch in log",
                )));
            }
            records.push(stored);
        }
        Ok(records)
    }

    fn snapshot_for(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<StoredSnapshot>, AggregateError<OrchestratorError>> {
        let content = match std::fs::read_to_string(self.snapshot_path()) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };
        let snapshot: StoredSnapshot = serde_json::from_str(&content)
            .map_err(|e| AggregateError::DeserializationError(Box::new(e)))?;
        Ok(Some(snapshot).filter(|s| s.aggregate_id == aggregate_id))
    }

    /// Replaces the snapshot via temp file + rename so readers never observe
    /// a half-written file.
    fn replace_snapshot(
        &self,
        snapshot: &StoredSnapshot,
    ) -> Result<(), AggregateError<OrchestratorError>> {
        let path = self.snapshot_path();
        let content = serde_json::to_string(snapshot).map_err(storage_err)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(storage_err)?;
        std::fs::rename(&tmp, path).map_err(storage_err)?;
        Ok(())
    }

    /// Opens the log for appending with an exclusive lock, creating the
    /// workflow directory on first commit.
    fn open_log_for_append(&self) -> Result<File, AggregateError<OrchestratorError>> {
        std::fs::create_dir_all(&self.dir).map_err(storage_err)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.log_path())
            .map_err(storage_err)?;
        file.lock_exclusive().map_err(storage_err)?;
        Ok(file)
    }

    /// Last sequence committed for `aggregate_id`, read under the caller's
    /// lock so the answer cannot go stale before the append.
    fn committed_sequence(
        file: &File,
        aggregate_id: &str,
    ) -> Result<u64, AggregateError<OrchestratorError>> {
        let mut reader = BufReader::new(file.try_clone().map_err(storage_err)?);
        reader.seek(SeekFrom::Start(0)).map_err(storage_err)?;

        let mut last = 0u64;
        for line in reader.lines() {
            let line = line.map_err(storage_err)?;
            let stored: StoredEvent = serde_json::from_str(&line)
                .map_err(|e| AggregateError::DeserializationError(Box::new(e)))?;
            if stored.aggregate_id == aggregate_id {
                last = stored.sequence;
            }
        }
        Ok(last)
    }

    fn snapshot_due(&self, sequence: u64) -> bool {
        self.snapshot_every != 0 && sequence % self.snapshot_every == 0
    }
}

#[async_trait]
impl EventStore<WorkflowAggregate> for FileEventStore {
    type AC = FileAggregateContext<WorkflowAggregate>;

    async fn load_events(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<EventEnvelope<WorkflowAggregate>>, AggregateError<OrchestratorError>> {
        let envelopes = self
            .stored_events(aggregate_id)?
            .into_iter()
            .map(|stored| EventEnvelope {
                aggregate_id: stored.aggregate_id,
                sequence: stored.sequence as usize,
                payload: stored.event,
                metadata: stored.metadata,
            })
            .collect();
        Ok(envelopes)
    }

    async fn load_aggregate(
        &self,
        aggregate_id: &str,
    ) -> Result<Self::AC, AggregateError<OrchestratorError>> {
        let (mut aggregate, mut current_sequence) = match self.snapshot_for(aggregate_id)? {
            Some(snapshot) => (snapshot.state, snapshot.sequence),
            None => (WorkflowAggregate::default(), 0),
        };

        // Fold in the events recorded after the snapshot.
        for stored in self.stored_events(aggregate_id)? {
            if stored.sequence > current_sequence {
                current_sequence = stored.sequence;
                aggregate.apply(stored.event);
            }
        }

        Ok(FileAggregateContext {
            aggregate_id: aggregate_id.to_string(),
            aggregate,
            current_sequence,
        })
    }

    async fn commit(
        &self,
        events: Vec<WorkflowEvent>,
        context: Self::AC,
        metadata: HashMap<String, String>,
    ) -> Result<Vec<EventEnvelope<WorkflowAggregate>>, AggregateError<OrchestratorError>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut file = self.open_log_for_append()?;
        let FileAggregateContext {
            aggregate_id,
            mut aggregate,
            current_sequence,
        } = context;

        if Self::committed_sequence(&file, &aggregate_id)? != current_sequence {
            return Err(AggregateError::AggregateConflict);
        }

        let mut sequence = current_sequence;
        let mut envelopes = Vec::with_capacity(events.len());
        for event in events {
            sequence += 1;
            let record = StoredEvent {
                aggregate_id: aggregate_id.clone(),
                sequence,
                recorded_at: TimestampUtc::now(),
                event_type: event.event_type(),
                event_version: event.event_version(),
                event,
                metadata: metadata.clone(),
            };
            let line = serde_json::to_string(&record).map_err(storage_err)?;
            writeln!(file, "{}", line).map_err(storage_err)?;

            aggregate.apply(record.event.clone());
            envelopes.push(EventEnvelope {
                aggregate_id: aggregate_id.clone(),
                sequence: sequence as usize,
                payload: record.event,
                metadata: metadata.clone(),
            });
        }
        file.sync_all().map_err(storage_err)?;

        if self.snapshot_due(sequence) {
            self.replace_snapshot(&StoredSnapshot {
                aggregate_id,
                sequence,
                snapshot_at: TimestampUtc::now(),
                state: aggregate,
            })?;
        }

        Ok(envelopes)
    }
}

#[cfg(test)]
#[path = "tests/file_store_tests.rs"]
mod tests;
