//! Decoding of time-series query pages into a flat column table.
//!
//! Result pages carry typed, possibly nested cells: scalars, arrays, nested
//! rows with their own column metadata, and time series of `(time, value)`
//! points. [`decode_page`] walks every cell of a page and hands the scalar
//! values of whitelisted columns to a [`ResultBuilder`]. Once all pages have
//! been decoded, [`ResultBuilder::finish`] yields a [`ColumnTable`].
//!
//! ```rust,ignore
//! use spot_migrate::codec::{decode_page, ResultBuilder};
//!
//! let mut builder = ResultBuilder::spot();
//! for page in pages {
//!     builder = decode_page(builder, &page)?;
//! }
//! let table = builder.finish()?;
//! ```

mod builder;
mod cell;
pub mod page;

pub use builder::{ColumnTable, ResultBuilder, SPOT_COLUMNS};
pub use cell::{Cell, NamedCell, TimePoint};
pub use page::{ColumnInfo, ColumnType, Datum, QueryPage, Row, TimeSeriesDataPoint};

use tracing::trace;

use crate::error::Result;
use crate::logging::truncate_field;

/// Decodes every row of `page` into `builder` and returns it.
///
/// At `trace` level each decoded row is logged, cut to the builder's
/// [trace limit](ResultBuilder::with_trace_limit).
pub fn decode_page(mut builder: ResultBuilder, page: &QueryPage) -> Result<ResultBuilder> {
    for row in &page.rows {
        let cells = cell::decode_row(&page.column_info, row, &mut builder)?;
        builder.row_done();
        if tracing::enabled!(tracing::Level::TRACE) {
            let rendered = cells
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            trace!(row = %truncate_field(&rendered, builder.trace_limit()), "Decoded row");
        }
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::scalar("InstanceType", "VARCHAR"),
            ColumnInfo::scalar("Region", "VARCHAR"),
            ColumnInfo::scalar("AZ", "VARCHAR"),
            ColumnInfo::scalar("SPS", "VARCHAR"),
            ColumnInfo::scalar("IF", "VARCHAR"),
            ColumnInfo::scalar("SpotPrice", "VARCHAR"),
            ColumnInfo::scalar("Savings", "VARCHAR"),
            ColumnInfo::scalar("measure_name", "VARCHAR"),
            ColumnInfo::scalar("time", "TIMESTAMP"),
            ColumnInfo::scalar("measure_value::double", "DOUBLE"),
        ]
    }

    fn spot_row(instance_type: &str, price: &str) -> Row {
        Row {
            data: [
                instance_type,
                "us-east-1",
                "use1-az1",
                "3",
                "<5%",
                price,
                "70",
                "spot",
                "2022-09-28 16:20:00.000000000",
                "0.0",
            ]
            .into_iter()
            .map(Datum::scalar)
            .collect(),
        }
    }

    #[test]
    fn test_decode_pages_accumulate() {
        let first = QueryPage {
            column_info: spot_columns(),
            rows: vec![spot_row("m5.large", "0.03")],
            next_token: Some("next".to_string()),
            ..Default::default()
        };
        let second = QueryPage {
            column_info: spot_columns(),
            rows: vec![spot_row("c5.large", "0.02"), spot_row("r5.large", "0.04")],
            ..Default::default()
        };

        let builder = decode_page(ResultBuilder::spot(), &first).unwrap();
        let builder = decode_page(builder, &second).unwrap();
        assert_eq!(builder.rows_decoded(), 3);

        let table = builder.finish().unwrap();
        assert_eq!(table.num_rows(), 3);
        assert_eq!(
            table.column("InstanceType").unwrap()[2].as_deref(),
            Some("r5.large")
        );
        assert_eq!(
            table.column("time").unwrap()[0].as_deref(),
            Some("2022-09-28 16:20:00+00:00")
        );
        assert!(table.column("measure_name").is_none());
    }

    #[test]
    fn test_independent_builders_do_not_share_state() {
        let page = QueryPage {
            column_info: spot_columns(),
            rows: vec![spot_row("m5.large", "0.03")],
            ..Default::default()
        };
        let a = decode_page(ResultBuilder::spot(), &page).unwrap();
        let b = decode_page(ResultBuilder::spot(), &page).unwrap();
        let a = decode_page(a, &page).unwrap();
        assert_eq!(a.rows_decoded(), 2);
        assert_eq!(b.rows_decoded(), 1);
    }

    #[test]
    fn test_trace_limit_survives_decoding() {
        let page = QueryPage {
            column_info: spot_columns(),
            rows: vec![spot_row("m5.large", "0.03")],
            ..Default::default()
        };
        let builder = ResultBuilder::spot().with_trace_limit(16);
        assert_eq!(builder.empty_like().trace_limit(), 16);
        let builder = decode_page(builder, &page).unwrap();
        assert_eq!(builder.trace_limit(), 16);
        assert_eq!(ResultBuilder::spot().trace_limit(), 256);
    }

    #[test]
    fn test_row_width_mismatch_fails() {
        let page = QueryPage {
            column_info: spot_columns(),
            rows: vec![Row {
                data: vec![Datum::scalar("m5.large")],
            }],
            ..Default::default()
        };
        assert!(decode_page(ResultBuilder::spot(), &page).is_err());
    }
}
