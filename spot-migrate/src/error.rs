//! Error types for the spot-market migration.
//!
//! Every failure in the crate is a [`MigrationError`]. Errors fall into two
//! tiers: transient failures at the edges (a query page, an upload, a sink
//! write) that the driver logs and skips, and fatal failures that abort the
//! run. [`MigrationError::is_fatal`] draws that line.

use thiserror::Error;

/// Which snapshot of a diff an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSide {
    Previous,
    Current,
}

impl std::fmt::Display for SnapshotSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotSide::Previous => f.write_str("previous"),
            SnapshotSide::Current => f.write_str("current"),
        }
    }
}

/// The main error type for the migration.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A workload identity occurs more than once in a single snapshot.
    #[error("Workload '{workload}' appears more than once in the {side} snapshot")]
    WorkloadCollision {
        /// Decoded workload identity
        workload: String,
        /// Snapshot that holds the duplicate
        side: SnapshotSide,
    },

    /// The merge scan met two unequal keys that are each present on the
    /// other side, which cannot happen for sorted, unique key columns.
    #[error("Workloads '{previous}' and '{current}' are both unmatched and both present on the opposite side")]
    UnmatchedWorkload {
        /// Workload identity at the previous-side cursor
        previous: String,
        /// Workload identity at the current-side cursor
        current: String,
    },

    /// Error from the source query service.
    #[error("Data source error: {message}")]
    DataSource {
        /// Kind of source (e.g., "query", "pages")
        source_type: String,
        /// Detailed error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Uploading an archive to object storage failed.
    #[error("Upload of '{key}' failed: {source}")]
    Upload {
        /// Object key of the archive
        key: String,
        /// Underlying object store error
        #[source]
        source: object_store::Error,
    },

    /// Writing records to the destination sink failed.
    #[error("Sink '{sink}' rejected a batch of {records} records: {message}")]
    Sink {
        /// Sink description
        sink: String,
        /// Number of records in the rejected batch
        records: usize,
        /// Detailed error message
        message: String,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from object storage outside of an archive upload.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error when parsing or processing data.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error when a required column is not found in a result set.
    #[error("Column '{column}' not found in result set")]
    ColumnNotFound { column: String },

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, MigrationError>`.
pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
    /// Creates a new data source error.
    pub fn data_source(source_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataSource {
            source_type: source_type.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new data source error with a source error.
    pub fn data_source_with_source(
        source_type: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::DataSource {
            source_type: source_type.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a new sink error.
    pub fn sink(sink: impl Into<String>, records: usize, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            records,
            message: message.into(),
        }
    }

    /// Returns `true` when the run must stop.
    ///
    /// Uniqueness violations mean every later diff is untrustworthy, and a
    /// broken local baseline or configuration cannot be skipped past. Query,
    /// upload and sink failures only lose the affected window's step.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MigrationError::DataSource { .. }
                | MigrationError::Upload { .. }
                | MigrationError::Sink { .. }
        )
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<MigrationError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| wrap(msg, e.into()))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| wrap(&f(), e.into()))
    }
}

// Fatal invariant errors keep their variant so `is_fatal` still sees them.
fn wrap(msg: &str, err: MigrationError) -> MigrationError {
    match err {
        MigrationError::Internal(inner) => MigrationError::Internal(format!("{msg}: {inner}")),
        MigrationError::Parse(inner) => MigrationError::Parse(format!("{msg}: {inner}")),
        MigrationError::DataSource {
            source_type,
            message,
            source,
        } => MigrationError::DataSource {
            source_type,
            message: format!("{msg}: {message}"),
            source,
        },
        other @ (MigrationError::WorkloadCollision { .. }
        | MigrationError::UnmatchedWorkload { .. }
        | MigrationError::Upload { .. }
        | MigrationError::Sink { .. }) => other,
        other => MigrationError::Internal(format!("{msg}: {other}")),
    }
}
