//! # spot-migrate - incremental migration of spot-pricing snapshots
//!
//! spot-migrate moves spot-instance observations from a time-series query
//! service into a destination store without rewriting unchanged rows. Every
//! sampling window becomes a [`Snapshot`](record::Snapshot); consecutive
//! snapshots are diffed on workload identity and only the rows whose feature
//! values changed are written out. Each snapshot is also archived as a
//! gzip-compressed CSV in object storage.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use spot_migrate::prelude::*;
//! use spot_migrate::sink::MemorySink;
//! use spot_migrate::source::StaticPageClient;
//!
//! # async fn example() -> spot_migrate::error::Result<()> {
//! let config = MigrationConfig::default()
//!     .with_object_store(ObjectStoreConfig::Memory)
//!     .with_local_archive("/tmp/spot/latest.csv.gz");
//! let store = SnapshotStore::from_config(&config)?;
//!
//! let migration = Migration::new(
//!     config,
//!     Arc::new(StaticPageClient::new(Vec::new())),
//!     Arc::new(MemorySink::new()),
//!     store,
//! )?;
//! let report = migration.run().await?;
//! println!("{} rows changed", report.rows_changed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! 1. [`source`] pages through the query result.
//! 2. [`codec`] decodes each page, keeping only the spot-pricing columns.
//! 3. [`transform`] normalizes the text columns into typed
//!    [`Record`](record::Record)s with DataFusion.
//! 4. [`delta`] diffs each window against the stored baseline.
//! 5. [`store`] saves the window as the new baseline and uploads it.
//! 6. [`sink`] receives the changed records.
//!
//! [`driver::Migration`] runs these steps for every window of a time range.
//!
//! ## Diffing
//!
//! ```rust
//! use spot_migrate::delta::DeltaEngine;
//! use spot_migrate::record::Snapshot;
//!
//! let engine = DeltaEngine::default();
//! let delta = engine.diff(&Snapshot::default(), &Snapshot::default()).unwrap();
//! assert!(delta.is_empty());
//! ```
//!
//! A workload identity that appears twice in one snapshot is a
//! [`MigrationError::WorkloadCollision`](error::MigrationError::WorkloadCollision)
//! and aborts the run before anything is written.

pub mod archive;
pub mod batch;
pub mod codec;
pub mod config;
pub mod delta;
pub mod driver;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod record;
pub mod sink;
pub mod source;
pub mod store;
pub mod transform;
