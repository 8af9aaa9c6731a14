//! Persistence of the latest snapshot.
//!
//! The store keeps one local baseline file, overwritten on every save, and
//! uploads each saved snapshot to object storage under a key derived from its
//! timestamp:
//!
//! ```text
//! <prefix>/<YYYY>/<MM>/<DD>/<HH:MM:SS>.csv.gz
//! ```
//!
//! The local file is a single shared resource without locking; callers must
//! not save concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tokio::fs;
use tracing::{debug, instrument};

use crate::archive;
use crate::config::{ArchiveConfig, MigrationConfig};
use crate::error::{MigrationError, Result};
use crate::log_data_op;
use crate::logging::LogConfig;
use crate::record::Snapshot;

/// Object key of the archive for `timestamp`.
pub fn archive_key(prefix: &str, timestamp: &DateTime<Utc>) -> String {
    let prefix = prefix.trim_matches('/');
    let name = timestamp.format("%Y/%m/%d/%H:%M:%S.csv.gz");
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Local baseline plus remote archive of snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    local_path: PathBuf,
    prefix: String,
    remote: Arc<dyn ObjectStore>,
    log: LogConfig,
}

impl SnapshotStore {
    pub fn new(archive: &ArchiveConfig, remote: Arc<dyn ObjectStore>) -> Self {
        Self {
            local_path: archive.local_path.clone(),
            prefix: archive.prefix.clone(),
            remote,
            log: LogConfig::default(),
        }
    }

    /// Builds the store and its object store from a run configuration.
    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        let remote = config.object_store.build()?;
        Ok(Self::new(&config.archive, remote).with_log_config(config.logging.clone()))
    }

    pub fn with_log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote(&self) -> &Arc<dyn ObjectStore> {
        &self.remote
    }

    /// Writes `snapshot` as the new local baseline, then uploads it.
    ///
    /// A local write failure is returned as an I/O error. An upload failure
    /// is returned as [`MigrationError::Upload`] after the local baseline has
    /// already been replaced.
    #[instrument(skip_all, fields(rows = snapshot.len(), %timestamp))]
    pub async fn save(&self, snapshot: &Snapshot, timestamp: &DateTime<Utc>) -> Result<()> {
        let started = Instant::now();
        let bytes = archive::encode(snapshot)?;
        let compressed = bytes.len();

        self.write_local(&bytes).await?;

        let key = archive_key(&self.prefix, timestamp);
        self.remote
            .put(&ObjectPath::from(key.as_str()), PutPayload::from(bytes))
            .await
            .map_err(|source| MigrationError::Upload {
                key: key.clone(),
                source,
            })?;

        log_data_op!(
            self.log,
            key = %key,
            rows = snapshot.len(),
            bytes = compressed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Archived snapshot"
        );
        Ok(())
    }

    /// Reads the local baseline, or `None` when none has been written yet.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let bytes = match fs::read(&self.local_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.local_path.display(), "No baseline snapshot yet");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot = archive::decode(&bytes)?;
        debug!(rows = snapshot.len(), "Loaded baseline snapshot");
        Ok(Some(snapshot))
    }

    /// Keys of every archive uploaded under the prefix, sorted.
    pub async fn archived_keys(&self) -> Result<Vec<String>> {
        let prefix = self.prefix.trim_matches('/');
        let prefix = (!prefix.is_empty()).then(|| ObjectPath::from(prefix));
        let objects: Vec<_> = self.remote.list(prefix.as_ref()).try_collect().await?;
        let mut keys: Vec<String> = objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| key.ends_with(".csv.gz"))
            .collect();
        keys.sort();
        Ok(keys)
    }

    // Temp file plus rename, so a crash never leaves a truncated baseline.
    async fn write_local(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.local_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut tmp = self.local_path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &self.local_path).await?;
        Ok(())
    }
}
