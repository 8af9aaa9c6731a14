//! Gzip-compressed CSV encoding of snapshots.
//!
//! Archives have a header row and the columns of [`record_schema`] in that
//! order. The `ceased` flag is never archived.

use std::io::{Cursor, Read, Write};

use arrow::csv::{ReaderBuilder, WriterBuilder};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;

use crate::batch::{record_schema, records_from_batch, to_record_batch};
use crate::error::{MigrationError, Result};
use crate::record::Snapshot;

/// Largest decompressed archive accepted (512 MiB).
pub const MAX_DECOMPRESSED_SIZE: u64 = 512 * 1024 * 1024;

const READ_BATCH_SIZE: usize = 8192;

// Matches nothing: an empty text field is an empty string, never null.
const NO_NULLS: &str = "a^";

/// Encodes a snapshot as gzip CSV bytes.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let batch = to_record_batch(snapshot.records())?;
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut writer = WriterBuilder::new().with_header(true).build(encoder);
    writer.write(&batch)?;
    let mut encoder = writer.into_inner();
    encoder.flush()?;
    Ok(encoder.finish()?)
}

/// Decodes gzip CSV bytes produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let mut csv = Vec::new();
    GzDecoder::new(bytes)
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut csv)?;
    if csv.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(MigrationError::Parse(format!(
            "archive expands beyond {MAX_DECOMPRESSED_SIZE} bytes"
        )));
    }

    let no_nulls = Regex::new(NO_NULLS)
        .map_err(|e| MigrationError::Internal(format!("invalid null pattern: {e}")))?;
    let reader = ReaderBuilder::new(record_schema())
        .with_header(true)
        .with_batch_size(READ_BATCH_SIZE)
        .with_null_regex(no_nulls)
        .build(Cursor::new(csv))?;

    let mut records = Vec::new();
    for batch in reader {
        for record in records_from_batch(&batch?)? {
            let record = record.ok_or_else(|| {
                MigrationError::Parse(format!("archive row {} has an invalid field", records.len()))
            })?;
            records.push(record);
        }
    }
    Ok(Snapshot::new(records))
}
