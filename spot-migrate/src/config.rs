//! Migration configuration.
//!
//! One [`MigrationConfig`] value describes a whole run and is handed to each
//! collaborator when it is constructed. It deserializes from JSON, with every
//! field optional:
//!
//! ```json
//! {
//!   "start": "2022-09-28T16:20:00Z",
//!   "end": "2022-09-29T03:10:00Z",
//!   "source": { "database": "spotrank-timestream", "table": "spot-table", "pages_dir": "pages" },
//!   "destination": { "output": "delta.jsonl" },
//!   "object_store": { "kind": "local", "root": "archive" },
//!   "emit_ceased": false
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use object_store::memory::InMemory;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::delta::DeltaEngine;
use crate::error::{MigrationError, Result};
use crate::logging::LogConfig;
use crate::record::RecordField;

/// Source query service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Credential profile of the source account
    pub profile: Option<String>,
    pub region: String,
    pub database: String,
    pub table: String,
    /// Directory of exported result pages to replay instead of a live service
    pub pages_dir: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            profile: None,
            region: "us-west-2".to_string(),
            database: "spotrank-timestream".to_string(),
            table: "spot-table".to_string(),
            pages_dir: None,
        }
    }
}

impl SourceConfig {
    /// The source table and account, as logged at the start of a run.
    pub fn description(&self) -> String {
        let mut text = format!("{}/{}.{}", self.region, self.database, self.table);
        if let Some(profile) = &self.profile {
            text.push_str(&format!(" (profile {profile})"));
        }
        text
    }
}

/// Destination write service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub profile: Option<String>,
    pub database: String,
    pub table: String,
    /// Records per write call
    pub write_batch_size: usize,
    /// JSON-lines file receiving the delta; `None` means `<database>.<table>.jsonl`
    pub output: Option<PathBuf>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            profile: None,
            database: "spotlake".to_string(),
            table: "aws".to_string(),
            write_batch_size: 100,
            output: None,
        }
    }
}

impl DestinationConfig {
    /// The destination table and account, as logged at the start of a run.
    pub fn description(&self) -> String {
        let mut text = format!("{}.{}", self.database, self.table);
        if let Some(profile) = &self.profile {
            text.push_str(&format!(" (profile {profile})"));
        }
        text
    }
}

/// Snapshot archive settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Local baseline file, overwritten every window
    pub local_path: PathBuf,
    /// Object key prefix for uploaded snapshots
    pub prefix: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            local_path: PathBuf::from("latest.csv.gz"),
            prefix: "rawdata".to_string(),
        }
    }
}

/// Where archived snapshots are uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// Process memory; archives vanish with the process
    Memory,
    /// A directory on the local file system
    Local { root: PathBuf },
    /// An S3 bucket (requires the `s3` feature)
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        ObjectStoreConfig::S3 {
            bucket: "spotlake-test".to_string(),
            region: Some("us-west-2".to_string()),
            endpoint: None,
        }
    }
}

impl ObjectStoreConfig {
    /// Builds the configured object store.
    #[instrument(skip(self))]
    pub fn build(&self) -> Result<Arc<dyn ObjectStore>> {
        match self {
            ObjectStoreConfig::Memory => Ok(Arc::new(InMemory::new())),
            ObjectStoreConfig::Local { root } => {
                std::fs::create_dir_all(root)?;
                let store = object_store::local::LocalFileSystem::new_with_prefix(root)?;
                Ok(Arc::new(store))
            }
            ObjectStoreConfig::S3 {
                bucket,
                region,
                endpoint,
            } => build_s3(bucket, region.as_deref(), endpoint.as_deref()),
        }
    }

    pub fn description(&self) -> String {
        match self {
            ObjectStoreConfig::Memory => "memory".to_string(),
            ObjectStoreConfig::Local { root } => format!("file://{}", root.display()),
            ObjectStoreConfig::S3 { bucket, .. } => format!("s3://{bucket}"),
        }
    }
}

#[cfg(feature = "s3")]
fn build_s3(
    bucket: &str,
    region: Option<&str>,
    endpoint: Option<&str>,
) -> Result<Arc<dyn ObjectStore>> {
    use object_store::aws::AmazonS3Builder;
    use object_store::RetryConfig;

    // Credentials come from the standard AWS environment variables.
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_retry(RetryConfig {
            max_retries: 3,
            retry_timeout: std::time::Duration::from_secs(30),
            ..Default::default()
        });
    if let Some(region) = region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    let store = builder.build().map_err(|e| {
        MigrationError::Configuration(format!("Failed to create S3 client: {e}"))
    })?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "s3"))]
fn build_s3(
    bucket: &str,
    _region: Option<&str>,
    _endpoint: Option<&str>,
) -> Result<Arc<dyn ObjectStore>> {
    Err(MigrationError::Configuration(format!(
        "uploading to s3://{bucket} requires building with the `s3` feature"
    )))
}

/// Everything one migration run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub archive: ArchiveConfig,
    pub object_store: ObjectStoreConfig,
    /// First window boundary, inclusive
    pub start: DateTime<Utc>,
    /// Last window boundary, inclusive
    pub end: DateTime<Utc>,
    /// Sampling interval between window boundaries
    pub interval_minutes: u32,
    pub workload_columns: Vec<RecordField>,
    pub feature_columns: Vec<RecordField>,
    /// Forward ceased records to the sink alongside changed ones
    pub emit_ceased: bool,
    pub logging: LogConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            destination: DestinationConfig::default(),
            archive: ArchiveConfig::default(),
            object_store: ObjectStoreConfig::default(),
            start: Utc
                .with_ymd_and_hms(2022, 9, 28, 16, 20, 0)
                .single()
                .unwrap_or_default(),
            end: Utc
                .with_ymd_and_hms(2022, 9, 29, 3, 10, 0)
                .single()
                .unwrap_or_default(),
            interval_minutes: 10,
            workload_columns: RecordField::WORKLOAD.to_vec(),
            feature_columns: RecordField::FEATURE.to_vec(),
            emit_ceased: false,
            logging: LogConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Reads a JSON configuration file; missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: MigrationConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_interval_minutes(mut self, minutes: u32) -> Self {
        self.interval_minutes = minutes;
        self
    }

    pub fn with_object_store(mut self, object_store: ObjectStoreConfig) -> Self {
        self.object_store = object_store;
        self
    }

    pub fn with_local_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive.local_path = path.into();
        self
    }

    pub fn with_pages_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source.pages_dir = Some(dir.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.destination.output = Some(output.into());
        self
    }

    pub fn with_emit_ceased(mut self, emit: bool) -> Self {
        self.emit_ceased = emit;
        self
    }

    pub fn with_logging(mut self, logging: LogConfig) -> Self {
        self.logging = logging;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Delta engine over the configured column sets.
    pub fn delta_engine(&self) -> Result<DeltaEngine> {
        DeltaEngine::new(self.workload_columns.clone(), self.feature_columns.clone())
    }

    /// Checks the settings that would otherwise fail mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(MigrationError::Configuration(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        if self.interval_minutes == 0 {
            return Err(MigrationError::Configuration(
                "interval_minutes must be positive".to_string(),
            ));
        }
        if self.destination.write_batch_size == 0 {
            return Err(MigrationError::Configuration(
                "write_batch_size must be positive".to_string(),
            ));
        }
        if self.archive.local_path.as_os_str().is_empty() {
            return Err(MigrationError::Configuration(
                "archive.local_path must not be empty".to_string(),
            ));
        }
        self.delta_engine()?;
        Ok(())
    }
}
