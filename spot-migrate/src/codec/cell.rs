//! Decoding of individual datums into [`Cell`] values.

use std::fmt;

use super::builder::ResultBuilder;
use super::page::{ColumnInfo, Datum, Row};
use crate::error::{MigrationError, Result};

/// A decoded cell of any shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Scalar(String),
    Array(Vec<Cell>),
    Row(Vec<NamedCell>),
    TimeSeries(Vec<TimePoint>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedCell {
    pub name: Option<String>,
    pub cell: Cell,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimePoint {
    pub time: String,
    pub value: Cell,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("NULL"),
            Cell::Scalar(value) => f.write_str(value),
            Cell::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Cell::Row(fields) => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str("}")
            }
            Cell::TimeSeries(points) => {
                f.write_str("[")?;
                for (i, point) in points.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{{time={}, value={}}}", point.time, point.value)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl fmt::Display for NamedCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}={}", self.cell),
            None => write!(f, "{}", self.cell),
        }
    }
}

/// Decodes one row against its column metadata.
pub(crate) fn decode_row(
    columns: &[ColumnInfo],
    row: &Row,
    builder: &mut ResultBuilder,
) -> Result<Vec<NamedCell>> {
    if columns.len() != row.data.len() {
        return Err(MigrationError::Parse(format!(
            "row has {} cells but {} columns are declared",
            row.data.len(),
            columns.len()
        )));
    }
    columns
        .iter()
        .zip(&row.data)
        .map(|(info, datum)| {
            Ok(NamedCell {
                name: info.name.clone(),
                cell: decode_datum(info, datum, builder)?,
            })
        })
        .collect()
}

/// Decodes one datum, retaining whitelisted scalars in `builder`.
pub(crate) fn decode_datum(
    info: &ColumnInfo,
    datum: &Datum,
    builder: &mut ResultBuilder,
) -> Result<Cell> {
    if datum.is_null() {
        if let Some(name) = &info.name {
            builder.retain(name, None);
        }
        return Ok(Cell::Null);
    }

    let column_type = &info.column_type;

    if let Some(measure) = &column_type.time_series_measure_value_column_info {
        let points = datum
            .time_series_value
            .as_ref()
            .ok_or_else(|| shape_error(info, "TimeSeriesValue"))?;
        return points
            .iter()
            .map(|point| {
                Ok(TimePoint {
                    time: point.time.clone(),
                    value: decode_datum(measure, &point.value, builder)?,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Cell::TimeSeries);
    }

    if let Some(element) = &column_type.array_column_info {
        let items = datum
            .array_value
            .as_ref()
            .ok_or_else(|| shape_error(info, "ArrayValue"))?;
        return items
            .iter()
            .map(|item| decode_datum(element, item, builder))
            .collect::<Result<Vec<_>>>()
            .map(Cell::Array);
    }

    if let Some(fields) = &column_type.row_column_info {
        let row = datum
            .row_value
            .as_ref()
            .ok_or_else(|| shape_error(info, "RowValue"))?;
        return decode_row(fields, row, builder).map(Cell::Row);
    }

    let value = datum
        .scalar_value
        .as_ref()
        .ok_or_else(|| shape_error(info, "ScalarValue"))?;
    if let Some(name) = &info.name {
        builder.retain(name, Some(value));
    }
    Ok(Cell::Scalar(value.clone()))
}

fn shape_error(info: &ColumnInfo, expected: &str) -> MigrationError {
    MigrationError::Parse(format!(
        "column '{}' expected a {expected} datum",
        info.name.as_deref().unwrap_or("<unnamed>")
    ))
}
