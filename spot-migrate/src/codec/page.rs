//! Wire model of one page of time-series query results.
//!
//! Field names follow the source service's JSON encoding, so exported pages
//! deserialize directly.

use serde::{Deserialize, Serialize};

/// One page of a paginated query response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    /// Token for the following page; absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub column_info: Vec<ColumnInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_status: Option<QueryStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryStatus {
    #[serde(default)]
    pub progress_percentage: Option<f64>,
    #[serde(default)]
    pub cumulative_bytes_scanned: Option<i64>,
    #[serde(default)]
    pub cumulative_bytes_metered: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Row {
    #[serde(default)]
    pub data: Vec<Datum>,
}

/// Column metadata. Nested columns (array elements, time-series values)
/// usually carry no name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Type")]
    pub column_type: ColumnType,
}

impl ColumnInfo {
    pub fn scalar(name: impl Into<String>, scalar_type: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            column_type: ColumnType {
                scalar_type: Some(scalar_type.into()),
                ..Default::default()
            },
        }
    }
}

/// Exactly one member is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_column_info: Option<Box<ColumnInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_series_measure_value_column_info: Option<Box<ColumnInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_column_info: Option<Vec<ColumnInfo>>,
}

/// One typed cell value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Datum {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_series_value: Option<Vec<TimeSeriesDataPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_value: Option<Vec<Datum>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_value: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_value: Option<bool>,
}

impl Datum {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self {
            scalar_value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn null() -> Self {
        Self {
            null_value: Some(true),
            ..Default::default()
        }
    }

    pub fn is_null(&self) -> bool {
        self.null_value.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeSeriesDataPoint {
    pub time: String,
    pub value: Datum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_exported_page() {
        let json = r#"{
            "QueryId": "q-1",
            "NextToken": "t-2",
            "ColumnInfo": [
                {"Name": "Region", "Type": {"ScalarType": "VARCHAR"}},
                {"Name": "prices", "Type": {"ArrayColumnInfo": {"Type": {"ScalarType": "DOUBLE"}}}}
            ],
            "Rows": [
                {"Data": [
                    {"ScalarValue": "us-west-2"},
                    {"ArrayValue": [{"ScalarValue": "0.1"}, {"NullValue": true}]}
                ]}
            ],
            "QueryStatus": {"ProgressPercentage": 100.0, "CumulativeBytesScanned": 42}
        }"#;

        let page: QueryPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.next_token.as_deref(), Some("t-2"));
        assert_eq!(page.column_info.len(), 2);
        assert!(page.column_info[1].column_type.array_column_info.is_some());
        let array = page.rows[0].data[1].array_value.as_ref().unwrap();
        assert!(array[1].is_null());
        assert_eq!(
            page.query_status.unwrap().cumulative_bytes_scanned,
            Some(42)
        );
    }
}
