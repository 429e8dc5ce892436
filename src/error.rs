//! Per-file failures and run diagnostics.
//!
//! Nothing in here aborts a run. A failing archive member becomes a
//! [`FileFailure`] in the run's report, and the remaining members carry on.

use crate::archive::ArchiveError;
use crate::decode::DecodeError;
use crate::destination::DestinationError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Why one archive member could not be processed.
#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("Malformed data: {0}")]
    Decode(#[from] DecodeError),
    #[error("Load failed: {0}")]
    Load(#[from] DestinationError),
    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    NotFound,
    CorruptArchive,
    MalformedData,
    LoadFailure,
    Worker,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::CorruptArchive => "corrupt archive",
            Self::MalformedData => "malformed data",
            Self::LoadFailure => "load failure",
            Self::Worker => "worker failure",
        };
        f.write_str(s)
    }
}

impl FileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Archive(ArchiveError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Archive(ArchiveError::InvalidUtf8 { .. }) => ErrorKind::MalformedData,
            Self::Archive(_) => ErrorKind::CorruptArchive,
            Self::Decode(_) => ErrorKind::MalformedData,
            Self::Load(_) => ErrorKind::LoadFailure,
            Self::Worker(_) => ErrorKind::Worker,
        }
    }
}

impl From<tokio::task::JoinError> for FileError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Worker(e.to_string())
    }
}

/// A member that failed, as recorded in a run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub member: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Records known to be lost with this member (0 when it never decoded).
    pub records_lost: usize,
}

/// Run-wide diagnostics sink, shared by all workers.
#[derive(Debug, Default)]
pub struct Diagnostics {
    unmapped: Mutex<BTreeMap<String, u64>>,
    coercion_failures: AtomicU64,
    failures: Mutex<Vec<FileFailure>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_unmapped<'a, I: IntoIterator<Item = &'a String>>(&self, fields: I) {
        let mut unmapped = self.unmapped.lock();
        for field in fields {
            *unmapped.entry(field.clone()).or_default() += 1;
        }
    }

    pub fn record_coercion_failures(&self, count: u64) {
        self.coercion_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failure(&self, failure: FileFailure) {
        self.failures.lock().push(failure);
    }

    /// Unmapped source field → number of records that carried it.
    pub fn unmapped_fields(&self) -> BTreeMap<String, u64> {
        self.unmapped.lock().clone()
    }

    pub fn coercion_failures(&self) -> u64 {
        self.coercion_failures.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> Vec<FileFailure> {
        self.failures.lock().clone()
    }
}
