//! Snapshot diffing by a single merge scan.
//!
//! [`DeltaEngine::diff`] compares two snapshots keyed by a composite workload
//! identity and returns the records that are new or whose feature vector
//! changed, along with the identities that disappeared.
//!
//! Both snapshots are projected into `(workload key, feature key, row index)`
//! triples and sorted by workload key. A two-pointer scan then walks both
//! sorted views once. Sorting is the only lookup structure: "is this key on
//! the other side" is answered by binary search over the other sorted view,
//! never by a hash index. Correctness therefore rests on the key ordering
//! being total and identical on both sides, which [`CompositeKey`] provides.
//!
//! A duplicated workload identity inside one snapshot is a data-integrity
//! failure and aborts the diff before any output is built.
//!
//! # Example
//!
//! ```rust
//! use spot_migrate::delta::DeltaEngine;
//! use spot_migrate::record::{parse_time, Record, RecordField, Snapshot};
//!
//! # fn main() -> spot_migrate::error::Result<()> {
//! let spot = |instance: &str, sps: i64| -> spot_migrate::error::Result<Record> {
//!     Ok(Record {
//!         time: parse_time("2022-09-28 16:20:00+00:00")?,
//!         instance_type: instance.to_string(),
//!         region: "us-east-1".to_string(),
//!         az: "use1-az1".to_string(),
//!         sps,
//!         interruption_frequency: 3.0,
//!         spot_price: 0.05,
//!         savings: 60.0,
//!         ondemand_price: 0.125,
//!         ceased: false,
//!     })
//! };
//! let previous = Snapshot::new(vec![spot("m5.large", 3)?, spot("c5.large", 2)?]);
//! let current = Snapshot::new(vec![spot("m5.large", 1)?]);
//!
//! let engine = DeltaEngine::new(RecordField::WORKLOAD.to_vec(), RecordField::FEATURE.to_vec())?;
//! let delta = engine.diff(&previous, &current)?;
//! assert_eq!(delta.changed, vec![spot("m5.large", 1)?]);
//! assert_eq!(delta.removed.len(), 1);
//! assert!(delta.removed[0].ceased);
//! # Ok(())
//! # }
//! ```

mod key;

pub use key::CompositeKey;

use tracing::{debug, instrument};

use crate::error::{MigrationError, Result, SnapshotSide};
use crate::record::{Record, RecordField, Snapshot};

/// Result of diffing two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    /// Current-side records that are new or carry a different feature key,
    /// in workload-key order.
    pub changed: Vec<Record>,
    /// Previous-side records whose identity is gone, with feature fields
    /// zeroed and `ceased` set.
    pub removed: Vec<Record>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Diffs snapshots on a configurable workload identity and feature vector.
#[derive(Debug, Clone)]
pub struct DeltaEngine {
    workload: Vec<RecordField>,
    feature: Vec<RecordField>,
}

impl Default for DeltaEngine {
    fn default() -> Self {
        Self {
            workload: RecordField::WORKLOAD.to_vec(),
            feature: RecordField::FEATURE.to_vec(),
        }
    }
}

impl DeltaEngine {
    /// Creates an engine over the given column sets.
    ///
    /// Both sets must be non-empty and disjoint.
    pub fn new(workload: Vec<RecordField>, feature: Vec<RecordField>) -> Result<Self> {
        if workload.is_empty() {
            return Err(MigrationError::Configuration(
                "workload identity needs at least one column".to_string(),
            ));
        }
        if feature.is_empty() {
            return Err(MigrationError::Configuration(
                "feature vector needs at least one column".to_string(),
            ));
        }
        if let Some(shared) = workload.iter().find(|f| feature.contains(f)) {
            return Err(MigrationError::Configuration(format!(
                "column '{shared}' cannot be both workload identity and feature"
            )));
        }
        Ok(Self { workload, feature })
    }

    pub fn workload_fields(&self) -> &[RecordField] {
        &self.workload
    }

    pub fn feature_fields(&self) -> &[RecordField] {
        &self.feature
    }

    /// Computes the changed and removed sets between two snapshots.
    #[instrument(skip_all, fields(previous.rows = previous.len(), current.rows = current.len()))]
    pub fn diff(&self, previous: &Snapshot, current: &Snapshot) -> Result<Delta> {
        let prev = SortedView::build(previous, self, SnapshotSide::Previous)?;
        let curr = SortedView::build(current, self, SnapshotSide::Current)?;

        let mut changed = Vec::new();
        let mut removed = Vec::new();
        let (mut p, mut c) = (0usize, 0usize);

        while p < prev.len() || c < curr.len() {
            if c == curr.len() {
                let entry = &prev.entries[p];
                if curr.contains(&entry.workload) {
                    return Err(collision(&entry.workload, SnapshotSide::Previous));
                }
                removed.push(entry.index);
                p += 1;
                continue;
            }

            if p == prev.len() {
                let entry = &curr.entries[c];
                if prev.contains(&entry.workload) {
                    return Err(collision(&entry.workload, SnapshotSide::Current));
                }
                changed.push(entry.index);
                c += 1;
                continue;
            }

            let before = &prev.entries[p];
            let now = &curr.entries[c];

            if before.workload != now.workload {
                if !prev.contains(&now.workload) {
                    changed.push(now.index);
                    c += 1;
                } else if !curr.contains(&before.workload) {
                    removed.push(before.index);
                    p += 1;
                } else {
                    return Err(MigrationError::UnmatchedWorkload {
                        previous: before.workload.to_string(),
                        current: now.workload.to_string(),
                    });
                }
            } else {
                if before.feature != now.feature {
                    changed.push(now.index);
                }
                p += 1;
                c += 1;
            }
        }

        debug!(
            changed = changed.len(),
            removed = removed.len(),
            "Merge scan complete"
        );

        let previous_rows = previous.records();
        let current_rows = current.records();
        Ok(Delta {
            changed: changed.into_iter().map(|i| current_rows[i].clone()).collect(),
            removed: removed
                .into_iter()
                .map(|i| previous_rows[i].ceased(&self.feature))
                .collect(),
        })
    }
}

fn collision(workload: &CompositeKey, side: SnapshotSide) -> MigrationError {
    MigrationError::WorkloadCollision {
        workload: workload.to_string(),
        side,
    }
}

struct KeyedEntry {
    workload: CompositeKey,
    feature: CompositeKey,
    index: usize,
}

/// A snapshot's key columns sorted by workload key, with source row indices.
struct SortedView {
    entries: Vec<KeyedEntry>,
}

impl SortedView {
    fn build(snapshot: &Snapshot, engine: &DeltaEngine, side: SnapshotSide) -> Result<Self> {
        let mut entries: Vec<KeyedEntry> = snapshot
            .records()
            .iter()
            .enumerate()
            .map(|(index, record)| KeyedEntry {
                workload: CompositeKey::from_record(record, &engine.workload),
                feature: CompositeKey::from_record(record, &engine.feature),
                index,
            })
            .collect();
        entries.sort_by(|a, b| a.workload.cmp(&b.workload));

        if let Some(pair) = entries.windows(2).find(|w| w[0].workload == w[1].workload) {
            return Err(collision(&pair[0].workload, side));
        }

        Ok(Self { entries })
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, workload: &CompositeKey) -> bool {
        self.entries
            .binary_search_by(|entry| entry.workload.cmp(workload))
            .is_ok()
    }
}
