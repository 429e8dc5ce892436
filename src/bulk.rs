//! Batch writer: picks the bulk-copy or multi-row insert path.

use crate::coerce::{CoercedRow, TypedValue};
use crate::destination::{Destination, DestinationError};
use crate::schema::SchemaDescriptor;
use std::fmt::Write;

/// Batches at or above this size go through `COPY`.
pub const DEFAULT_COPY_THRESHOLD: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct BulkLoader {
    copy_threshold: usize,
}

impl Default for BulkLoader {
    fn default() -> Self {
        Self::new(DEFAULT_COPY_THRESHOLD)
    }
}

impl BulkLoader {
    pub fn new(copy_threshold: usize) -> Self {
        Self { copy_threshold }
    }

    /// Write one file's rows as a single batch. Returns the rows loaded.
    pub async fn load<D: Destination + ?Sized>(
        &self,
        destination: &D,
        schema: &SchemaDescriptor,
        rows: &[CoercedRow],
    ) -> Result<u64, DestinationError> {
        if rows.is_empty() {
            return Ok(0);
        }

        if rows.len() >= self.copy_threshold {
            tracing::debug!("Inserting, using copy, {} records", rows.len());
            let payload = encode_copy_payload(rows);
            destination.copy_rows(&schema.column_names(), payload).await
        } else {
            tracing::debug!("Inserting {} records", rows.len());
            destination.insert_rows(schema, rows).await
        }
    }
}

/// Render rows as tab-delimited CSV: one line per row, null as an empty
/// unquoted field, text quoted only when it has to be.
pub fn encode_copy_payload(rows: &[CoercedRow]) -> String {
    let mut out = String::with_capacity(rows.len() * 64);
    for row in rows {
        encode_copy_line(&mut out, row);
    }
    out
}

pub(crate) fn encode_copy_line(out: &mut String, row: &CoercedRow) {
    for (i, value) in row.values().iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        match value {
            TypedValue::Null => {}
            TypedValue::Bool(true) => out.push('t'),
            TypedValue::Bool(false) => out.push('f'),
            TypedValue::Int(v) => {
                let _ = write!(out, "{}", v);
            }
            TypedValue::Float(v) => {
                let _ = write!(out, "{}", v);
            }
            TypedValue::Text(s) => push_text_field(out, s),
        }
    }
    out.push('\n');
}

fn push_text_field(out: &mut String, s: &str) {
    let needs_quotes =
        s.is_empty() || s == "\\." || s.contains(['\t', '"', '\n', '\r']);

    if !needs_quotes {
        out.push_str(s);
        return;
    }

    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
}
