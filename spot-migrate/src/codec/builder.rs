//! Accumulation of retained scalar columns across query pages.

use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::{MigrationError, Result};

/// Columns retained from the spot-pricing table.
pub const SPOT_COLUMNS: [&str; 8] = [
    "SpotPrice",
    "Savings",
    "SPS",
    "AZ",
    "Region",
    "InstanceType",
    "IF",
    "time",
];

const TIME_COLUMN: &str = "time";
const DEFAULT_TRACE_LIMIT: usize = 256;
const UTC_SUFFIX: &str = "+00:00";

/// Collects whitelisted scalar values while pages are decoded.
///
/// A builder is owned by one query run and threaded through
/// [`decode_page`](super::decode_page) by value, so separate queries never
/// share decoding state.
#[derive(Debug, Clone)]
pub struct ResultBuilder {
    columns: Vec<(String, Vec<Option<String>>)>,
    rows_decoded: usize,
    trace_limit: usize,
}

impl ResultBuilder {
    /// Creates a builder retaining exactly `columns`, in that order.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|name| (name.into(), Vec::new()))
                .collect(),
            rows_decoded: 0,
            trace_limit: DEFAULT_TRACE_LIMIT,
        }
    }

    /// Builder over [`SPOT_COLUMNS`].
    pub fn spot() -> Self {
        Self::new(SPOT_COLUMNS)
    }

    /// Caps the length of each decoded row logged at `trace`.
    pub fn with_trace_limit(mut self, limit: usize) -> Self {
        self.trace_limit = limit;
        self
    }

    pub fn trace_limit(&self) -> usize {
        self.trace_limit
    }

    pub fn retains(&self, name: &str) -> bool {
        self.columns.iter().any(|(column, _)| column == name)
    }

    pub fn rows_decoded(&self) -> usize {
        self.rows_decoded
    }

    /// Values collected so far for `name`, if the column is retained.
    pub fn values(&self, name: &str) -> Option<&[Option<String>]> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, values)| values.as_slice())
    }

    /// An empty builder retaining the same columns and trace limit.
    pub fn empty_like(&self) -> Self {
        Self::new(self.columns.iter().map(|(name, _)| name.clone()))
            .with_trace_limit(self.trace_limit)
    }

    /// Appends everything `other` collected. Both builders must retain the
    /// same columns in the same order.
    pub fn absorb(&mut self, other: ResultBuilder) {
        for ((_, values), (_, more)) in self.columns.iter_mut().zip(other.columns) {
            values.extend(more);
        }
        self.rows_decoded += other.rows_decoded;
    }

    pub(crate) fn retain(&mut self, name: &str, value: Option<&str>) {
        let Some((_, values)) = self.columns.iter_mut().find(|(column, _)| column == name) else {
            return;
        };
        let value = match value {
            Some(text) if name == TIME_COLUMN => Some(normalize_time(text)),
            Some(text) => Some(text.to_string()),
            None => None,
        };
        values.push(value);
    }

    pub(crate) fn row_done(&mut self) {
        self.rows_decoded += 1;
    }

    /// Finishes decoding; every retained column must have the same length.
    pub fn finish(self) -> Result<ColumnTable> {
        let expected = self.columns.first().map_or(0, |(_, values)| values.len());
        if let Some((name, values)) = self
            .columns
            .iter()
            .find(|(_, values)| values.len() != expected)
        {
            return Err(MigrationError::Parse(format!(
                "column '{name}' has {} values, expected {expected}",
                values.len()
            )));
        }
        Ok(ColumnTable {
            columns: self.columns,
            num_rows: expected,
        })
    }
}

/// Drops sub-second precision and pins the value to UTC.
fn normalize_time(text: &str) -> String {
    let whole_seconds = text.split('.').next().unwrap_or(text);
    format!("{whole_seconds}{UTC_SUFFIX}")
}

/// Decoded query output: column name to ordered values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnTable {
    columns: Vec<(String, Vec<Option<String>>)>,
    num_rows: usize,
}

impl ColumnTable {
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&[Option<String>]> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, values)| values.as_slice())
    }

    /// All columns as nullable UTF-8 arrays.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|(name, _)| Field::new(name, DataType::Utf8, true))
            .collect();
        let arrays: Vec<ArrayRef> = self
            .columns
            .iter()
            .map(|(_, values)| {
                Arc::new(values.iter().map(|v| v.as_deref()).collect::<StringArray>()) as ArrayRef
            })
            .collect();
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    #[test]
    fn test_time_is_truncated_and_suffixed() {
        let mut b = ResultBuilder::spot();
        b.retain("time", Some("2022-09-28 16:20:00.000000000"));
        assert_eq!(
            b.values("time").unwrap()[0].as_deref(),
            Some("2022-09-28 16:20:00+00:00")
        );
    }

    #[test]
    fn test_unlisted_columns_are_ignored() {
        let mut b = ResultBuilder::spot();
        b.retain("measure_value::double", Some("1.0"));
        assert!(!b.retains("measure_value::double"));
        assert!(b.values("measure_value::double").is_none());
    }

    #[test]
    fn test_finish_rejects_ragged_columns() {
        let mut b = ResultBuilder::new(["a", "b"]);
        b.retain("a", Some("1"));
        assert!(b.finish().is_err());
    }

    #[test]
    fn test_record_batch_keeps_nulls() {
        let mut b = ResultBuilder::new(["Region", "SPS"]);
        b.retain("Region", Some("us-east-1"));
        b.retain("SPS", None);
        b.row_done();
        let table = b.finish().unwrap();
        assert_eq!(table.num_rows(), 1);

        let batch = table.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.num_columns(), 2);
        assert!(batch.column(1).is_null(0));
    }

    #[test]
    fn test_absorb_appends_page_results() {
        let mut total = ResultBuilder::new(["Region"]);
        let mut page = total.empty_like();
        page.retain("Region", Some("eu-west-1"));
        page.row_done();
        total.absorb(page);
        assert_eq!(total.rows_decoded(), 1);
        assert_eq!(total.values("Region").unwrap().len(), 1);
    }

    #[test]
    fn test_empty_builder_finishes_empty() {
        let table = ResultBuilder::spot().finish().unwrap();
        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.column_names().count(), SPOT_COLUMNS.len());
    }
}
