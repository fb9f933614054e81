//! Event store - where ingested records live and where runs read them back
//!
//! The aggregation driver only sees the `EventSource` trait. Two stores are
//! provided:
//! - `JsonlEventStore` - append-only JSONL file, one record per line
//! - `MemoryEventStore` - in-process vector, for tests and ephemeral runs
//!
//! Both return records for a single topic inside a window, stably sorted by
//! timestamp so equal timestamps keep their append order.

use crate::domain::record::EventRecord;
use crate::domain::types::Window;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("event store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

/// Read side of the event store
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Records for `topic` with `window.start <= timestamp < window.end`,
    /// in non-decreasing timestamp order
    async fn fetch(&self, topic: &str, window: Window) -> Result<Vec<EventRecord>, FetchError>;
}

/// Write side of the event store, used by the ingestor
pub trait EventLog: EventSource {
    fn append(&self, record: &EventRecord) -> std::io::Result<()>;
}

fn select(records: impl Iterator<Item = EventRecord>, topic: &str, window: Window) -> Vec<EventRecord> {
    let mut selected: Vec<EventRecord> =
        records.filter(|r| r.topic == topic && window.contains(r.timestamp)).collect();
    // Stable: ties keep append order
    selected.sort_by_key(|r| r.timestamp);
    selected
}

/// Append-only JSONL event log
pub struct JsonlEventStore {
    path: PathBuf,
    /// Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonlEventStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), "event_store_initialized");
        Self { path, write_lock: Mutex::new(()) }
    }

    fn parse(&self, content: &str) -> Vec<EventRecord> {
        let mut records = Vec::new();
        let mut bad_lines = 0usize;
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    bad_lines += 1;
                    debug!(line = lineno + 1, error = %e, "event_store_bad_line");
                }
            }
        }
        if bad_lines > 0 {
            warn!(path = %self.path.display(), bad_lines = %bad_lines, "event_store_lines_dropped");
        }
        records
    }
}

#[async_trait]
impl EventSource for JsonlEventStore {
    async fn fetch(&self, topic: &str, window: Window) -> Result<Vec<EventRecord>, FetchError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            // Nothing ingested yet
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(select(self.parse(&content).into_iter(), topic, window))
    }
}

impl EventLog for JsonlEventStore {
    fn append(&self, record: &EventRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        debug!(topic = %record.topic, bytes = %line.len(), "event_appended");
        Ok(())
    }
}

/// In-memory event store
#[derive(Default)]
pub struct MemoryEventStore {
    records: RwLock<Vec<EventRecord>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<EventRecord>) -> Self {
        Self { records: RwLock::new(records) }
    }
}

#[async_trait]
impl EventSource for MemoryEventStore {
    async fn fetch(&self, topic: &str, window: Window) -> Result<Vec<EventRecord>, FetchError> {
        let records = self.records.read();
        Ok(select(records.iter().cloned(), topic, window))
    }
}

impl EventLog for MemoryEventStore {
    fn append(&self, record: &EventRecord) -> std::io::Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }
}
