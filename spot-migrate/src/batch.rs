//! Arrow conversions for [`Record`] slices.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::error::{MigrationError, Result};
use crate::record::{format_time, parse_time, Record, RecordField};

fn data_type(field: RecordField) -> DataType {
    match field {
        RecordField::Time
        | RecordField::InstanceType
        | RecordField::Region
        | RecordField::Az => DataType::Utf8,
        RecordField::Sps => DataType::Int64,
        RecordField::InterruptionFrequency
        | RecordField::SpotPrice
        | RecordField::Savings
        | RecordField::OndemandPrice => DataType::Float64,
    }
}

/// Schema of an archived snapshot, in archive column order.
pub fn record_schema() -> SchemaRef {
    Arc::new(Schema::new(
        RecordField::ALL
            .iter()
            .map(|field| Field::new(field.column_name(), data_type(*field), false))
            .collect::<Vec<_>>(),
    ))
}

/// Builds one batch holding `records` in order.
pub fn to_record_batch(records: &[Record]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = RecordField::ALL
        .iter()
        .map(|field| -> ArrayRef {
            match field {
                RecordField::Time => Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| format_time(&r.time)),
                )),
                RecordField::InstanceType => Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| r.instance_type.as_str()),
                )),
                RecordField::Region => Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| r.region.as_str()),
                )),
                RecordField::Az => Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| r.az.as_str()),
                )),
                RecordField::Sps => {
                    Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.sps)))
                }
                RecordField::InterruptionFrequency => Arc::new(Float64Array::from_iter_values(
                    records.iter().map(|r| r.interruption_frequency),
                )),
                RecordField::SpotPrice => Arc::new(Float64Array::from_iter_values(
                    records.iter().map(|r| r.spot_price),
                )),
                RecordField::Savings => Arc::new(Float64Array::from_iter_values(
                    records.iter().map(|r| r.savings),
                )),
                RecordField::OndemandPrice => Arc::new(Float64Array::from_iter_values(
                    records.iter().map(|r| r.ondemand_price),
                )),
            }
        })
        .collect();
    Ok(RecordBatch::try_new(record_schema(), columns)?)
}

/// Reads records back out of a batch.
///
/// Columns are located by name and cast to the record types, so any batch
/// with the record column names works regardless of physical string or
/// numeric types. A row with a null in any column, or a `time` that does
/// not parse, comes back as `None`.
pub fn records_from_batch(batch: &RecordBatch) -> Result<Vec<Option<Record>>> {
    let time = strings(batch, RecordField::Time)?;
    let instance_type = strings(batch, RecordField::InstanceType)?;
    let region = strings(batch, RecordField::Region)?;
    let az = strings(batch, RecordField::Az)?;
    let sps = typed_column(batch, RecordField::Sps)?;
    let sps = sps.as_primitive::<Int64Type>();
    let interruption = typed_column(batch, RecordField::InterruptionFrequency)?;
    let interruption = interruption.as_primitive::<Float64Type>();
    let spot_price = typed_column(batch, RecordField::SpotPrice)?;
    let spot_price = spot_price.as_primitive::<Float64Type>();
    let savings = typed_column(batch, RecordField::Savings)?;
    let savings = savings.as_primitive::<Float64Type>();
    let ondemand = typed_column(batch, RecordField::OndemandPrice)?;
    let ondemand = ondemand.as_primitive::<Float64Type>();

    let rows = (0..batch.num_rows())
        .map(|row| {
            let (Some(time), Some(instance_type), Some(region), Some(az)) = (
                &time[row],
                &instance_type[row],
                &region[row],
                &az[row],
            ) else {
                return None;
            };
            let numeric = [
                sps.is_null(row),
                interruption.is_null(row),
                spot_price.is_null(row),
                savings.is_null(row),
                ondemand.is_null(row),
            ];
            if numeric.iter().any(|null| *null) {
                return None;
            }
            let time = parse_time(time).ok()?;
            Some(Record {
                time,
                instance_type: instance_type.clone(),
                region: region.clone(),
                az: az.clone(),
                sps: sps.value(row),
                interruption_frequency: interruption.value(row),
                spot_price: spot_price.value(row),
                savings: savings.value(row),
                ondemand_price: ondemand.value(row),
                ceased: false,
            })
        })
        .collect();
    Ok(rows)
}

fn typed_column(batch: &RecordBatch, field: RecordField) -> Result<ArrayRef> {
    let column = batch
        .column_by_name(field.column_name())
        .ok_or_else(|| MigrationError::ColumnNotFound {
            column: field.column_name().to_string(),
        })?;
    Ok(cast(column, &data_type(field))?)
}

fn strings(batch: &RecordBatch, field: RecordField) -> Result<Vec<Option<String>>> {
    let column = typed_column(batch, field)?;
    Ok(column
        .as_string::<i32>()
        .iter()
        .map(|value| value.map(str::to_string))
        .collect())
}
