//! Spot-market observations and the snapshots built from them.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// Text layout of the `time` column after codec normalisation.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// One observation of a spot workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(with = "time_text")]
    pub time: DateTime<Utc>,
    #[serde(rename = "InstanceType")]
    pub instance_type: String,
    #[serde(rename = "Region")]
    pub region: String,
    #[serde(rename = "AZ")]
    pub az: String,
    #[serde(rename = "SPS")]
    pub sps: i64,
    #[serde(rename = "IF")]
    pub interruption_frequency: f64,
    #[serde(rename = "SpotPrice")]
    pub spot_price: f64,
    #[serde(rename = "Savings")]
    pub savings: f64,
    #[serde(rename = "OndemandPrice")]
    pub ondemand_price: f64,
    /// Set only on records of a removed set.
    #[serde(rename = "Ceased", default, skip_serializing_if = "std::ops::Not::not")]
    pub ceased: bool,
}

impl Record {
    /// Text form of one field, as used in composite keys.
    ///
    /// Floats use Rust's shortest round-trip formatting, so a value read back
    /// from an archive renders identically to the value that was written.
    pub fn field_text(&self, field: RecordField) -> Cow<'_, str> {
        match field {
            RecordField::Time => Cow::Owned(format_time(&self.time)),
            RecordField::InstanceType => Cow::Borrowed(&self.instance_type),
            RecordField::Region => Cow::Borrowed(&self.region),
            RecordField::Az => Cow::Borrowed(&self.az),
            RecordField::Sps => Cow::Owned(self.sps.to_string()),
            RecordField::InterruptionFrequency => {
                Cow::Owned(self.interruption_frequency.to_string())
            }
            RecordField::SpotPrice => Cow::Owned(self.spot_price.to_string()),
            RecordField::Savings => Cow::Owned(self.savings.to_string()),
            RecordField::OndemandPrice => Cow::Owned(self.ondemand_price.to_string()),
        }
    }

    /// Resets one field to its zero value.
    pub fn zero_field(&mut self, field: RecordField) {
        match field {
            RecordField::Time => self.time = DateTime::<Utc>::UNIX_EPOCH,
            RecordField::InstanceType => self.instance_type.clear(),
            RecordField::Region => self.region.clear(),
            RecordField::Az => self.az.clear(),
            RecordField::Sps => self.sps = 0,
            RecordField::InterruptionFrequency => self.interruption_frequency = 0.0,
            RecordField::SpotPrice => self.spot_price = 0.0,
            RecordField::Savings => self.savings = 0.0,
            RecordField::OndemandPrice => self.ondemand_price = 0.0,
        }
    }

    /// Copy of this record marked as no longer observed.
    pub fn ceased(&self, feature: &[RecordField]) -> Record {
        let mut record = self.clone();
        for field in feature {
            record.zero_field(*field);
        }
        record.ceased = true;
        record
    }
}

/// Addressable record columns, named as in the source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordField {
    #[serde(rename = "time")]
    Time,
    #[serde(rename = "InstanceType")]
    InstanceType,
    #[serde(rename = "Region")]
    Region,
    #[serde(rename = "AZ")]
    Az,
    #[serde(rename = "SPS")]
    Sps,
    #[serde(rename = "IF")]
    InterruptionFrequency,
    #[serde(rename = "SpotPrice")]
    SpotPrice,
    #[serde(rename = "Savings")]
    Savings,
    #[serde(rename = "OndemandPrice")]
    OndemandPrice,
}

impl RecordField {
    /// Archive column order.
    pub const ALL: [RecordField; 9] = [
        RecordField::Time,
        RecordField::InstanceType,
        RecordField::Region,
        RecordField::Az,
        RecordField::Sps,
        RecordField::InterruptionFrequency,
        RecordField::SpotPrice,
        RecordField::Savings,
        RecordField::OndemandPrice,
    ];

    /// Default workload identity: instance type, region, availability zone.
    pub const WORKLOAD: [RecordField; 3] = [
        RecordField::InstanceType,
        RecordField::Region,
        RecordField::Az,
    ];

    /// Default feature vector: SPS, interruption frequency, spot price.
    pub const FEATURE: [RecordField; 3] = [
        RecordField::Sps,
        RecordField::InterruptionFrequency,
        RecordField::SpotPrice,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            RecordField::Time => "time",
            RecordField::InstanceType => "InstanceType",
            RecordField::Region => "Region",
            RecordField::Az => "AZ",
            RecordField::Sps => "SPS",
            RecordField::InterruptionFrequency => "IF",
            RecordField::SpotPrice => "SpotPrice",
            RecordField::Savings => "Savings",
            RecordField::OndemandPrice => "OndemandPrice",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for RecordField {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        RecordField::ALL
            .into_iter()
            .find(|field| field.column_name() == s)
            .ok_or_else(|| MigrationError::ColumnNotFound {
                column: s.to_string(),
            })
    }
}

/// All records observed at one logical timestamp.
///
/// A snapshot is never mutated after construction. It carries no ordering
/// guarantee; the delta engine sorts its own views.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    records: Vec<Record>,
}

impl Snapshot {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Timestamp of the first record, if any.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.first().map(|r| r.time)
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl From<Vec<Record>> for Snapshot {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

/// Renders a timestamp as `YYYY-MM-DD HH:MM:SS+00:00`.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parses the normalised `time` column.
///
/// Accepts the offset-suffixed form produced by the codec as well as RFC 3339
/// and bare `YYYY-MM-DD HH:MM:SS` values.
pub fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(time) = DateTime::parse_from_str(text, TIME_FORMAT) {
        return Ok(time.with_timezone(&Utc));
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| MigrationError::Parse(format!("invalid timestamp '{text}': {e}")))
}

mod time_text {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_time(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_time(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn record(instance_type: &str, region: &str, az: &str, sps: i64, price: f64) -> Record {
        Record {
            time: Utc.with_ymd_and_hms(2022, 9, 28, 16, 20, 0).unwrap(),
            instance_type: instance_type.to_string(),
            region: region.to_string(),
            az: az.to_string(),
            sps,
            interruption_frequency: 3.0,
            spot_price: price,
            savings: 70.0,
            ondemand_price: (100.0 * price / 30.0 * 100_000.0).round() / 100_000.0,
            ceased: false,
        }
    }

    #[test]
    fn test_parse_time_formats() {
        let expected = Utc.with_ymd_and_hms(2022, 9, 28, 16, 20, 0).unwrap();
        assert_eq!(parse_time("2022-09-28 16:20:00+00:00").unwrap(), expected);
        assert_eq!(parse_time("2022-09-28T16:20:00Z").unwrap(), expected);
        assert_eq!(parse_time("2022-09-28 16:20:00").unwrap(), expected);
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_format_time_round_trips() {
        let time = Utc.with_ymd_and_hms(2022, 9, 29, 3, 10, 0).unwrap();
        let text = format_time(&time);
        assert_eq!(text, "2022-09-29 03:10:00+00:00");
        assert_eq!(parse_time(&text).unwrap(), time);
    }

    #[test]
    fn test_field_text() {
        let r = record("m5.large", "us-east-1", "use1-az1", 3, 0.0342);
        assert_eq!(r.field_text(RecordField::InstanceType), "m5.large");
        assert_eq!(r.field_text(RecordField::Sps), "3");
        assert_eq!(r.field_text(RecordField::SpotPrice), "0.0342");
        assert_eq!(r.field_text(RecordField::InterruptionFrequency), "3");
    }

    #[test]
    fn test_ceased_zeroes_features_only() {
        let r = record("m5.large", "us-east-1", "use1-az1", 3, 0.0342);
        let gone = r.ceased(&RecordField::FEATURE);
        assert!(gone.ceased);
        assert_eq!(gone.sps, 0);
        assert_eq!(gone.spot_price, 0.0);
        assert_eq!(gone.interruption_frequency, 0.0);
        assert_eq!(gone.instance_type, "m5.large");
        assert_eq!(gone.savings, r.savings);
    }

    #[test]
    fn test_record_field_from_str() {
        assert_eq!("AZ".parse::<RecordField>().unwrap(), RecordField::Az);
        assert_eq!(
            "IF".parse::<RecordField>().unwrap(),
            RecordField::InterruptionFrequency
        );
        assert!("measure_name".parse::<RecordField>().is_err());
    }

    #[test]
    fn test_record_json_shape() {
        let r = record("c5.xlarge", "eu-west-1", "euw1-az2", 2, 0.07);
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["InstanceType"], "c5.xlarge");
        assert_eq!(value["time"], "2022-09-28 16:20:00+00:00");
        assert!(value.get("Ceased").is_none());

        let gone = r.ceased(&RecordField::FEATURE);
        let value = serde_json::to_value(&gone).unwrap();
        assert_eq!(value["Ceased"], true);
    }
}
