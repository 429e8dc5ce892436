//! In-memory destination for tests.

use crate::bulk::encode_copy_line;
use crate::coerce::CoercedRow;
use crate::destination::{Destination, DestinationError};
use crate::schema::{ColumnInfo, SchemaDescriptor};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stores every accepted row as its encoded copy line.
pub struct MemoryDestination {
    columns: Vec<ColumnInfo>,
    rows: Mutex<Vec<String>>,
    reject_when: Option<fn(&str) -> bool>,
    describe_calls: AtomicUsize,
    copy_calls: AtomicUsize,
    insert_calls: AtomicUsize,
}

impl MemoryDestination {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self {
            columns,
            rows: Mutex::new(Vec::new()),
            reject_when: None,
            describe_calls: AtomicUsize::new(0),
            copy_calls: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
        }
    }

    /// A cut-down `aclist` table.
    pub fn aclist() -> Self {
        Self::new(vec![
            ColumnInfo::new("Id", 23),
            ColumnInfo::new("Icao", 1043),
            ColumnInfo::new("Reg", 1043),
            ColumnInfo::new("Alt", 23),
            ColumnInfo::new("Lat", 701),
            ColumnInfo::new("Long", 701),
            ColumnInfo::new("Spd", 701),
            ColumnInfo::new("Mil", 16),
        ])
    }

    /// Reject any batch holding a row whose encoded line matches.
    pub fn rejecting(mut self, predicate: fn(&str) -> bool) -> Self {
        self.reject_when = Some(predicate);
        self
    }

    pub fn rows(&self) -> Vec<String> {
        self.rows.lock().clone()
    }

    pub fn truncate(&self) {
        self.rows.lock().clear();
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn copy_calls(&self) -> usize {
        self.copy_calls.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    fn accept(&self, lines: Vec<String>) -> Result<u64, DestinationError> {
        if let Some(reject) = self.reject_when {
            if let Some(bad) = lines.iter().find(|l| reject(l)) {
                return Err(DestinationError::Rejected(format!("bad row: {}", bad)));
            }
        }
        let count = lines.len() as u64;
        self.rows.lock().extend(lines);
        Ok(count)
    }
}

/// Split a copy payload into row lines, honouring quoted newlines.
fn split_payload(payload: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in payload.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            '\n' if !quoted => lines.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn describe(&self) -> Result<Vec<ColumnInfo>, DestinationError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.columns.clone())
    }

    async fn copy_rows(&self, _columns: &[&str], payload: String) -> Result<u64, DestinationError> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        self.accept(split_payload(&payload))
    }

    async fn insert_rows(
        &self,
        _schema: &SchemaDescriptor,
        rows: &[CoercedRow],
    ) -> Result<u64, DestinationError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let lines = rows
            .iter()
            .map(|row| {
                let mut line = String::new();
                encode_copy_line(&mut line, row);
                line.pop();
                line
            })
            .collect();
        self.accept(lines)
    }
}
