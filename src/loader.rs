//! Archive → table load driver.

use crate::archive::{ArchiveError, ArchiveReader};
use crate::bulk::{BulkLoader, DEFAULT_COPY_THRESHOLD};
use crate::coerce::{coerce, CoercedRow};
use crate::decode::decode;
use crate::destination::Destination;
use crate::error::{Diagnostics, FileError, FileFailure};
use crate::pool::{self, UnitOutcome};
use crate::schema::{SchemaDescriptor, SchemaError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::Instrument;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Live counters for a load run.
#[derive(Debug, Default)]
pub struct LoaderStats {
    pub files_total: AtomicU64,
    pub files_done: AtomicU64,
    pub files_failed: AtomicU64,
    pub records_seen: AtomicU64,
    pub rows_loaded: AtomicU64,
}

impl LoaderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LoaderStatsSnapshot {
        LoaderStatsSnapshot {
            files_total: self.files_total.load(Ordering::Relaxed),
            files_done: self.files_done.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            records_seen: self.records_seen.load(Ordering::Relaxed),
            rows_loaded: self.rows_loaded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoaderStatsSnapshot {
    pub files_total: u64,
    pub files_done: u64,
    pub files_failed: u64,
    pub records_seen: u64,
    pub rows_loaded: u64,
}

/// Configuration for the loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Maximum members processed at once (and database connections held)
    pub workers: usize,
    /// Batches at least this large go through `COPY`
    pub copy_threshold: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            copy_threshold: DEFAULT_COPY_THRESHOLD,
        }
    }
}

impl LoaderConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_copy_threshold(mut self, copy_threshold: usize) -> Self {
        self.copy_threshold = copy_threshold;
        self
    }
}

/// Summary of a finished load run.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub files_attempted: usize,
    pub files_failed: usize,
    pub records_seen: u64,
    pub rows_loaded: u64,
    pub coercion_failures: u64,
    /// Source fields with no destination column → records carrying them.
    pub unmapped_fields: BTreeMap<String, u64>,
    /// Failed members in archive order.
    pub failures: Vec<FileFailure>,
}

impl LoadReport {
    pub fn files_loaded(&self) -> usize {
        self.files_attempted - self.files_failed
    }
}

/// Loads every member of an archive into the destination.
pub struct Loader<D: Destination> {
    destination: Arc<D>,
    config: LoaderConfig,
    stats: Arc<LoaderStats>,
    diagnostics: Arc<Diagnostics>,
}

impl<D: Destination> Loader<D> {
    pub fn new(destination: Arc<D>, config: LoaderConfig) -> Self {
        Self {
            destination,
            config,
            stats: Arc::new(LoaderStats::new()),
            diagnostics: Arc::new(Diagnostics::new()),
        }
    }

    /// Use a caller-owned diagnostics sink.
    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn stats(&self) -> Arc<LoaderStats> {
        Arc::clone(&self.stats)
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        Arc::clone(&self.diagnostics)
    }

    /// Resolve the schema, then load every member.
    ///
    /// Only schema resolution and listing the archive can fail the run;
    /// member failures are reported in the [`LoadReport`].
    pub async fn run(&self, archive: &ArchiveReader) -> Result<LoadReport, LoadError> {
        tracing::info!("Getting column names from database");
        let schema = SchemaDescriptor::resolve(self.destination.as_ref()).await?;
        self.run_with_schema(archive, Arc::new(schema)).await
    }

    /// Load every member against an already resolved schema.
    pub async fn run_with_schema(
        &self,
        archive: &ArchiveReader,
        schema: Arc<SchemaDescriptor>,
    ) -> Result<LoadReport, LoadError> {
        let members = {
            let archive = archive.clone();
            tokio::task::spawn_blocking(move || archive.list_members()).await??
        };

        tracing::info!(
            "Loading {} data files from {} with {} workers",
            members.len(),
            archive.path().display(),
            self.config.workers
        );
        self.stats
            .files_total
            .store(members.len() as u64, Ordering::Relaxed);

        let start = Instant::now();
        let unit = Arc::new(MemberLoader {
            archive: archive.clone(),
            schema,
            destination: Arc::clone(&self.destination),
            bulk: BulkLoader::new(self.config.copy_threshold),
            stats: Arc::clone(&self.stats),
            diagnostics: Arc::clone(&self.diagnostics),
        });

        let outcomes = pool::run_ordered(members.clone(), self.config.workers, move |_, member| {
            let unit = Arc::clone(&unit);
            async move { unit.load(member).await }
        })
        .await;

        let mut report = LoadReport {
            files_attempted: members.len(),
            ..Default::default()
        };

        for (member, outcome) in members.into_iter().zip(outcomes) {
            let result = match outcome {
                UnitOutcome::Done(result) => result,
                UnitOutcome::Panicked(message) => Err(MemberFailure::new(FileError::Worker(message))),
            };
            match result {
                Ok(loaded) => {
                    report.records_seen += loaded.records as u64;
                    report.rows_loaded += loaded.rows_loaded;
                }
                Err(failure) => {
                    report.files_failed += 1;
                    report.records_seen += failure.records_lost as u64;
                    report.failures.push(FileFailure {
                        member,
                        kind: failure.error.kind(),
                        message: failure.error.to_string(),
                        records_lost: failure.records_lost,
                    });
                }
            }
        }

        report.coercion_failures = self.diagnostics.coercion_failures();
        report.unmapped_fields = self.diagnostics.unmapped_fields();

        tracing::info!(
            "Loaded {} rows from {}/{} files in {:?} ({} failed)",
            report.rows_loaded,
            report.files_loaded(),
            report.files_attempted,
            start.elapsed(),
            report.files_failed
        );

        Ok(report)
    }
}

struct MemberLoad {
    records: usize,
    rows_loaded: u64,
}

struct MemberFailure {
    error: FileError,
    records_lost: usize,
}

impl MemberFailure {
    fn new(error: FileError) -> Self {
        Self {
            error,
            records_lost: 0,
        }
    }
}

struct CoercedBatch {
    rows: Vec<CoercedRow>,
    unmapped: Vec<String>,
    failures: usize,
}

/// Everything one unit of work needs, shared read-only across workers.
struct MemberLoader<D: Destination> {
    archive: ArchiveReader,
    schema: Arc<SchemaDescriptor>,
    destination: Arc<D>,
    bulk: BulkLoader,
    stats: Arc<LoaderStats>,
    diagnostics: Arc<Diagnostics>,
}

impl<D: Destination> MemberLoader<D> {
    async fn load(&self, member: String) -> Result<MemberLoad, MemberFailure> {
        let span = tracing::info_span!("load", member = %member);
        let result = self.load_inner(&member).instrument(span.clone()).await;

        self.stats.files_done.fetch_add(1, Ordering::Relaxed);
        if let Err(failure) = &result {
            self.stats.files_failed.fetch_add(1, Ordering::Relaxed);
            self.diagnostics.record_failure(FileFailure {
                member: member.clone(),
                kind: failure.error.kind(),
                message: failure.error.to_string(),
                records_lost: failure.records_lost,
            });
            span.in_scope(|| {
                tracing::error!(
                    "Unable to load {}/{}: {} ({} records not loaded)",
                    self.archive.path().display(),
                    member,
                    failure.error,
                    failure.records_lost
                );
            });
        }

        result
    }

    async fn load_inner(&self, member: &str) -> Result<MemberLoad, MemberFailure> {
        tracing::debug!("Parsing {}/{}", self.archive.path().display(), member);

        let batch = {
            let archive = self.archive.clone();
            let schema = Arc::clone(&self.schema);
            let member = member.to_string();
            tokio::task::spawn_blocking(move || coerce_member(&archive, &schema, &member))
                .await
                .map_err(FileError::from)
                .and_then(|r| r)
                .map_err(MemberFailure::new)?
        };

        let records = batch.rows.len();
        self.stats
            .records_seen
            .fetch_add(records as u64, Ordering::Relaxed);
        self.diagnostics.record_unmapped(&batch.unmapped);
        if batch.failures > 0 {
            self.diagnostics.record_coercion_failures(batch.failures as u64);
            tracing::debug!("{} values could not be coerced and were nulled", batch.failures);
        }

        let rows_loaded = self
            .bulk
            .load(self.destination.as_ref(), &self.schema, &batch.rows)
            .await
            .map_err(|e| MemberFailure {
                error: FileError::Load(e),
                records_lost: records,
            })?;

        self.stats.rows_loaded.fetch_add(rows_loaded, Ordering::Relaxed);
        tracing::debug!("Loaded {} of {} records", rows_loaded, records);

        Ok(MemberLoad {
            records,
            rows_loaded,
        })
    }
}

/// Read, decode and coerce one member. Runs on the blocking pool.
fn coerce_member(
    archive: &ArchiveReader,
    schema: &SchemaDescriptor,
    member: &str,
) -> Result<CoercedBatch, FileError> {
    let text = archive.read_member(member)?;
    let snapshot = decode(&text)?;

    let mut batch = CoercedBatch {
        rows: Vec::with_capacity(snapshot.records.len()),
        unmapped: Vec::new(),
        failures: 0,
    };

    for record in &snapshot.records {
        let coerced = coerce(schema, record);
        batch.rows.push(coerced.row);
        batch.unmapped.extend(coerced.unmapped);
        batch.failures += coerced.failures;
    }

    if !batch.unmapped.is_empty() {
        let mut distinct: Vec<&str> = batch.unmapped.iter().map(String::as_str).collect();
        distinct.sort_unstable();
        distinct.dedup();
        tracing::debug!(
            "{} columns not in database: {}",
            distinct.len(),
            distinct.join(",")
        );
    }

    Ok(batch)
}
