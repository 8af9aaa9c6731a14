//! Destinations for changed records.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::record::Record;

/// Receives batches of records.
///
/// A failed write is reported as [`MigrationError::Sink`]; the caller logs
/// it and moves on.
#[async_trait]
pub trait RecordSink: Debug + Send + Sync {
    async fn write(&self, records: &[Record]) -> Result<()>;

    fn description(&self) -> String;
}

/// Appends one JSON object per record to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn write(&self, records: &[Record]) -> Result<()> {
        let fail = |message: String| MigrationError::sink(self.description(), records.len(), message);

        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record).map_err(|e| fail(e.to_string()))?;
            buffer.push(b'\n');
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| fail(e.to_string()))?;
        file.write_all(&buffer)
            .await
            .map_err(|e| fail(e.to_string()))?;
        file.flush().await.map_err(|e| fail(e.to_string()))?;

        debug!(records = records.len(), path = %self.path.display(), "Appended records");
        Ok(())
    }

    fn description(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record written so far, in write order.
    pub fn records(&self) -> Vec<Record> {
        self.lock().iter().flatten().cloned().collect()
    }

    /// Number of `write` calls received.
    pub fn batch_count(&self) -> usize {
        self.lock().len()
    }

    /// Sizes of the received batches, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().iter().map(Vec::len).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<Record>>> {
        // A poisoned lock still holds every completed write.
        self.batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write(&self, records: &[Record]) -> Result<()> {
        self.lock().push(records.to_vec());
        Ok(())
    }

    fn description(&self) -> String {
        "memory".to_string()
    }
}
