//! The migration run.
//!
//! One run queries the whole time range once, normalizes the result and then
//! walks the sampling grid window by window. Each window is diffed against
//! the stored baseline, saved as the new baseline, and its delta is written
//! to the sink. Windows are processed strictly one after another because the
//! baseline is a single shared file.
//!
//! Upload and sink failures are logged and counted in the
//! [`MigrationReport`]; anything fatal aborts the run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::codec::ResultBuilder;
use crate::config::MigrationConfig;
use crate::delta::{Delta, DeltaEngine};
use crate::error::{MigrationError, Result};
use crate::record::{format_time, Record, Snapshot};
use crate::sink::{JsonLinesSink, RecordSink};
use crate::source::{run_query, JsonPageClient, QueryClient, SpotQuery};
use crate::store::SnapshotStore;
use crate::transform::{group_by_time, normalize};

const OFF_GRID_SAMPLE: usize = 5;

/// Every `interval` step from `start` up to and including `end`.
pub fn date_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Duration,
) -> Vec<DateTime<Utc>> {
    if interval <= Duration::zero() {
        return Vec::new();
    }
    let mut times = Vec::new();
    let mut current = start;
    while current <= end {
        times.push(current);
        current += interval;
    }
    times
}

/// Counters describing one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Result pages fetched from the source
    pub pages_fetched: usize,
    /// False when the query ended early and only a partial result was used
    pub query_complete: bool,
    /// Records left after normalization
    pub records_queried: usize,
    /// Windows diffed and saved
    pub windows_processed: usize,
    /// Grid points with no records
    pub windows_skipped: usize,
    /// Records whose timestamp is not on the sampling grid
    pub off_grid_records: usize,
    pub rows_changed: usize,
    pub rows_removed: usize,
    /// Removed records written to the sink
    pub ceased_forwarded: usize,
    pub upload_failures: usize,
    pub sink_failures: usize,
}

/// A configured migration.
#[derive(Debug)]
pub struct Migration {
    config: MigrationConfig,
    client: Arc<dyn QueryClient>,
    sink: Arc<dyn RecordSink>,
    store: SnapshotStore,
    engine: DeltaEngine,
}

impl Migration {
    /// Creates a migration over explicit collaborators.
    pub fn new(
        config: MigrationConfig,
        client: Arc<dyn QueryClient>,
        sink: Arc<dyn RecordSink>,
        store: SnapshotStore,
    ) -> Result<Self> {
        config.validate()?;
        let engine = config.delta_engine()?;
        Ok(Self {
            config,
            client,
            sink,
            store,
            engine,
        })
    }

    /// Creates a migration whose collaborators all come from `config`.
    ///
    /// Pages are replayed from `source.pages_dir`. Records go to
    /// `destination.output`, or to `<database>.<table>.jsonl` when unset.
    pub async fn from_config(config: MigrationConfig) -> Result<Self> {
        let pages_dir = config.source.pages_dir.clone().ok_or_else(|| {
            MigrationError::Configuration("source.pages_dir is required".to_string())
        })?;
        let client = JsonPageClient::open(&pages_dir).await?;

        let output = config.destination.output.clone().unwrap_or_else(|| {
            format!(
                "{}.{}.jsonl",
                config.destination.database, config.destination.table
            )
            .into()
        });
        let store = SnapshotStore::from_config(&config)?;

        Self::new(
            config,
            Arc::new(client),
            Arc::new(JsonLinesSink::new(output)),
            store,
        )
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Runs the migration over the configured range.
    #[instrument(skip(self), fields(
        start = %self.config.start,
        end = %self.config.end,
        source = %self.client.description(),
        sink = %self.sink.description(),
    ))]
    pub async fn run(&self) -> Result<MigrationReport> {
        let started = Instant::now();
        let mut report = MigrationReport::default();
        info!(
            from = %self.config.source.description(),
            to = %self.config.destination.description(),
            "Starting migration"
        );

        let query = SpotQuery::from_config(&self.config.source)
            .between(&self.config.start, &self.config.end);
        let builder =
            ResultBuilder::spot().with_trace_limit(self.config.logging.max_field_length);
        let outcome = run_query(self.client.as_ref(), &query, builder).await;
        report.pages_fetched = outcome.pages;
        report.query_complete = outcome.is_complete();
        let table = outcome.builder.finish()?;
        self.timing("query", started);

        let transform_started = Instant::now();
        let records = normalize(&table).await?;
        report.records_queried = records.len();
        let mut groups = group_by_time(records);
        self.timing("transform", transform_started);

        let grid = date_range(self.config.start, self.config.end, self.config.interval());
        let on_grid: BTreeSet<_> = grid.iter().copied().collect();
        let off_grid: Vec<_> = groups
            .iter()
            .filter(|(time, _)| !on_grid.contains(*time))
            .map(|(time, records)| (format_time(time), records.len()))
            .collect();
        if !off_grid.is_empty() {
            report.off_grid_records = off_grid.iter().map(|(_, n)| n).sum();
            warn!(
                timestamps = off_grid.len(),
                records = report.off_grid_records,
                sample = ?off_grid.iter().take(OFF_GRID_SAMPLE).collect::<Vec<_>>(),
                "Records outside the sampling grid are ignored"
            );
        }

        let windows_started = Instant::now();
        for timestamp in grid {
            let Some(records) = groups.remove(&timestamp) else {
                warn!(timestamp = %format_time(&timestamp), "No records for window");
                report.windows_skipped += 1;
                continue;
            };
            self.process_window(timestamp, Snapshot::new(records), &mut report)
                .await?;
        }
        self.timing("windows", windows_started);

        info!(
            windows = report.windows_processed,
            skipped = report.windows_skipped,
            changed = report.rows_changed,
            removed = report.rows_removed,
            upload_failures = report.upload_failures,
            sink_failures = report.sink_failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Migration finished"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(timestamp = %format_time(&timestamp), rows = current.len()))]
    async fn process_window(
        &self,
        timestamp: DateTime<Utc>,
        current: Snapshot,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let delta = match self.store.load().await? {
            Some(previous) => self.engine.diff(&previous, &current)?,
            None => {
                debug!("No baseline; every record is new");
                self.engine.diff(&Snapshot::default(), &current)?
            }
        };

        if let Err(e) = self.store.save(&current, &timestamp).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "Snapshot upload failed; baseline kept locally");
            report.upload_failures += 1;
        }

        report.rows_changed += delta.changed.len();
        report.rows_removed += delta.removed.len();

        let Delta { changed, removed } = delta;
        let mut outgoing: Vec<Record> = changed;
        if self.config.emit_ceased {
            report.ceased_forwarded += removed.len();
            outgoing.extend(removed);
        }
        self.forward(&outgoing, report).await?;

        report.windows_processed += 1;
        Ok(())
    }

    async fn forward(&self, records: &[Record], report: &mut MigrationReport) -> Result<()> {
        for chunk in records.chunks(self.config.destination.write_batch_size) {
            if let Err(e) = self.sink.write(chunk).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(error = %e, records = chunk.len(), "Sink write failed; batch dropped");
                report.sink_failures += 1;
            }
        }
        Ok(())
    }

    fn timing(&self, phase: &str, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if self.config.logging.log_timings {
            info!(phase, elapsed_ms, "Phase finished");
        } else {
            debug!(phase, elapsed_ms, "Phase finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 9, 28, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_date_range_inclusive() {
        let grid = date_range(at(16, 20), at(17, 0), Duration::minutes(10));
        assert_eq!(grid.len(), 5);
        assert_eq!(grid.first(), Some(&at(16, 20)));
        assert_eq!(grid.last(), Some(&at(17, 0)));
    }

    #[test]
    fn test_date_range_spans_days() {
        let start = at(16, 20);
        let end = Utc.with_ymd_and_hms(2022, 9, 29, 16, 20, 0).unwrap();
        assert_eq!(date_range(start, end, Duration::minutes(10)).len(), 24 * 6 + 1);
    }

    #[test]
    fn test_date_range_edge_cases() {
        assert_eq!(
            date_range(at(16, 20), at(16, 20), Duration::minutes(10)),
            vec![at(16, 20)]
        );
        assert!(date_range(at(17, 0), at(16, 20), Duration::minutes(10)).is_empty());
        assert!(date_range(at(16, 20), at(17, 0), Duration::zero()).is_empty());
        assert_eq!(
            date_range(at(16, 20), at(16, 45), Duration::minutes(10)).last(),
            Some(&at(16, 40))
        );
    }

    #[tokio::test]
    async fn test_from_config_requires_pages_dir() {
        let config = MigrationConfig::default()
            .with_object_store(crate::config::ObjectStoreConfig::Memory);
        let err = Migration::from_config(config).await.unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }
}
