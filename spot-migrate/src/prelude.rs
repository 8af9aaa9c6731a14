//! Prelude for commonly used types and traits in spot-migrate.

pub use crate::config::{MigrationConfig, ObjectStoreConfig};
pub use crate::delta::{Delta, DeltaEngine};
pub use crate::driver::{Migration, MigrationReport};
pub use crate::error::{ErrorContext, MigrationError, Result};
pub use crate::logging::LogConfig;
pub use crate::record::{Record, RecordField, Snapshot};
pub use crate::sink::RecordSink;
pub use crate::source::QueryClient;
pub use crate::store::SnapshotStore;
