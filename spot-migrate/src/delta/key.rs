//! Composite keys over record fields.

use std::fmt;

use crate::record::{Record, RecordField};

/// A composite key built from several record fields.
///
/// Each field is written as `<byte length>:<text>`, so no choice of field
/// content can make two different field tuples encode to the same key.
/// Ordering is plain byte-wise ordering of the encoding, which is total and
/// consistent between the two snapshots of a diff.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey(String);

impl CompositeKey {
    pub fn from_record(record: &Record, fields: &[RecordField]) -> Self {
        let mut encoded = String::new();
        for field in fields {
            let text = record.field_text(*field);
            encoded.push_str(&text.len().to_string());
            encoded.push(':');
            encoded.push_str(&text);
        }
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the encoding back into field texts.
    pub fn fields(&self) -> Vec<&str> {
        let mut parts = Vec::new();
        let mut rest = self.0.as_str();
        while let Some((len, tail)) = rest.split_once(':') {
            let Ok(len) = len.parse::<usize>() else {
                break;
            };
            if len > tail.len() || !tail.is_char_boundary(len) {
                break;
            }
            parts.push(&tail[..len]);
            rest = &tail[len..];
        }
        parts
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fields().join("/"))
    }
}
