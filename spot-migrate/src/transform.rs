//! Normalization of decoded query output into [`Record`]s.
//!
//! The decoded table is all text. A single DataFusion query drops duplicate
//! rows, maps interruption-frequency buckets to scores, types the numeric
//! columns, rounds prices and derives the on-demand price from the spot price
//! and the savings percentage.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use datafusion::prelude::SessionContext;
use tracing::{debug, instrument, warn};

use crate::batch::records_from_batch;
use crate::codec::ColumnTable;
use crate::error::{ErrorContext, Result};
use crate::record::Record;

/// Interruption-frequency buckets and the score each maps to.
///
/// Values outside these buckets are read as plain numbers.
pub const INTERRUPTION_SCORES: [(&str, f64); 5] = [
    ("<5%", 3.0),
    ("5-10%", 2.5),
    ("10-15%", 2.0),
    ("15-20%", 1.5),
    (">20%", 1.0),
];

/// Decimal places kept on prices.
pub const PRICE_SCALE: i64 = 5;

const RAW_TABLE: &str = "raw";

fn normalize_sql() -> String {
    let buckets = INTERRUPTION_SCORES
        .iter()
        .map(|(bucket, score)| format!("WHEN '{bucket}' THEN {score:?}"))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        r#"SELECT
    "time",
    "InstanceType",
    "Region",
    "AZ",
    TRY_CAST(TRY_CAST("SPS" AS DOUBLE) AS BIGINT) AS "SPS",
    CASE "IF" {buckets} ELSE TRY_CAST("IF" AS DOUBLE) END AS "IF",
    round(TRY_CAST("SpotPrice" AS DOUBLE), {PRICE_SCALE}) AS "SpotPrice",
    TRY_CAST("Savings" AS DOUBLE) AS "Savings",
    round(
        100.0 * round(TRY_CAST("SpotPrice" AS DOUBLE), {PRICE_SCALE})
            / (100.0 - TRY_CAST("Savings" AS DOUBLE)),
        {PRICE_SCALE}
    ) AS "OndemandPrice"
FROM (SELECT DISTINCT * FROM {RAW_TABLE})
ORDER BY "time""#
    )
}

/// Normalizes a decoded table into records ordered by time.
///
/// Rows with a missing or unparseable value in any column are dropped with
/// a warning.
#[instrument(skip_all, fields(rows = table.num_rows()))]
pub async fn normalize(table: &ColumnTable) -> Result<Vec<Record>> {
    let started = Instant::now();
    let ctx = SessionContext::new();
    ctx.register_batch(RAW_TABLE, table.to_record_batch()?)?;

    let batches = ctx
        .sql(&normalize_sql())
        .await
        .context("Failed to plan normalization query")?
        .collect()
        .await
        .context("Failed to run normalization query")?;

    let mut records = Vec::with_capacity(table.num_rows());
    let mut incomplete = 0usize;
    for batch in &batches {
        for record in records_from_batch(batch)? {
            match record {
                Some(record) => records.push(record),
                None => incomplete += 1,
            }
        }
    }
    if incomplete > 0 {
        warn!(incomplete, "Dropped rows with missing or invalid values");
    }
    debug!(
        records = records.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Normalized query output"
    );
    Ok(records)
}

/// Groups records by timestamp, keeping query order within each group.
pub fn group_by_time(records: Vec<Record>) -> BTreeMap<DateTime<Utc>, Vec<Record>> {
    let mut groups: BTreeMap<DateTime<Utc>, Vec<Record>> = BTreeMap::new();
    for record in records {
        groups.entry(record.time).or_default().push(record);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_page, ColumnInfo, Datum, QueryPage, ResultBuilder, Row};
    use chrono::TimeZone;

    const COLUMNS: [&str; 8] = [
        "InstanceType",
        "Region",
        "AZ",
        "SPS",
        "IF",
        "SpotPrice",
        "Savings",
        "time",
    ];

    fn table(rows: &[[Option<&str>; 8]]) -> ColumnTable {
        let page = QueryPage {
            column_info: COLUMNS
                .iter()
                .map(|name| ColumnInfo::scalar(*name, "VARCHAR"))
                .collect(),
            rows: rows
                .iter()
                .map(|row| Row {
                    data: row
                        .iter()
                        .map(|v| v.map_or_else(Datum::null, Datum::scalar))
                        .collect(),
                })
                .collect(),
            ..Default::default()
        };
        decode_page(ResultBuilder::spot(), &page)
            .unwrap()
            .finish()
            .unwrap()
    }

    fn row<'a>(instance: &'a str, interruption: &'a str, time: &'a str) -> [Option<&'a str>; 8] {
        [
            Some(instance),
            Some("us-east-1"),
            Some("use1-az1"),
            Some("3"),
            Some(interruption),
            Some("0.0500049"),
            Some("60"),
            Some(time),
        ]
    }

    #[tokio::test]
    async fn test_normalize_maps_and_derives() {
        let table = table(&[row("m5.large", "<5%", "2022-09-28 16:20:00.000000000")]);
        let records = normalize(&table).await.unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.time, Utc.with_ymd_and_hms(2022, 9, 28, 16, 20, 0).unwrap());
        assert_eq!(record.sps, 3);
        assert_eq!(record.interruption_frequency, 3.0);
        assert_eq!(record.spot_price, 0.05);
        assert_eq!(record.savings, 60.0);
        assert_eq!(record.ondemand_price, 0.125);
        assert!(!record.ceased);
    }

    #[tokio::test]
    async fn test_every_bucket_is_mapped() {
        let rows: Vec<_> = INTERRUPTION_SCORES
            .iter()
            .enumerate()
            .map(|(i, (bucket, _))| {
                let names = ["a", "b", "c", "d", "e"];
                row(names[i], bucket, "2022-09-28 16:20:00.000000000")
            })
            .collect();
        let records = normalize(&table(&rows)).await.unwrap();
        let mut scores: Vec<f64> = records.iter().map(|r| r.interruption_frequency).collect();
        scores.sort_by(f64::total_cmp);
        assert_eq!(scores, vec![1.0, 1.5, 2.0, 2.5, 3.0]);
    }

    #[tokio::test]
    async fn test_duplicates_dropped_and_sorted_by_time() {
        let table = table(&[
            row("m5.large", "<5%", "2022-09-28 16:30:00.000000000"),
            row("m5.large", "<5%", "2022-09-28 16:20:00.000000000"),
            row("m5.large", "<5%", "2022-09-28 16:30:00.000000000"),
        ]);
        let records = normalize(&table).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].time < records[1].time);
    }

    #[tokio::test]
    async fn test_incomplete_rows_dropped() {
        let mut missing = row("c5.large", "<5%", "2022-09-28 16:20:00.000000000");
        missing[3] = None;
        let mut garbage = row("c5.xlarge", "<5%", "2022-09-28 16:20:00.000000000");
        garbage[5] = Some("n/a");
        let table = table(&[
            row("m5.large", ">20%", "2022-09-28 16:20:00.000000000"),
            missing,
            garbage,
        ]);
        let records = normalize(&table).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].instance_type, "m5.large");
        assert_eq!(records[0].interruption_frequency, 1.0);
    }

    #[tokio::test]
    async fn test_bad_time_row_dropped() {
        let table = table(&[
            row("m5.large", "<5%", "2022-09-28 16:20:00.000000000"),
            row("c5.large", "<5%", "not-a-time"),
        ]);
        let records = normalize(&table).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].instance_type, "m5.large");
    }

    #[tokio::test]
    async fn test_empty_table() {
        let records = normalize(&table(&[])).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_group_by_time() {
        let table = table(&[
            row("a", "<5%", "2022-09-28 16:20:00.000000000"),
            row("b", "<5%", "2022-09-28 16:30:00.000000000"),
            row("c", "<5%", "2022-09-28 16:20:00.000000000"),
        ]);
        let groups = group_by_time(normalize(&table).await.unwrap());
        assert_eq!(groups.len(), 2);
        let first = groups.values().next().unwrap();
        assert_eq!(first.len(), 2);
    }
}
