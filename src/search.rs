//! Time/geo-windowed search over an archive.

use crate::archive::{ArchiveError, ArchiveReader};
use crate::decode::decode;
use crate::error::{Diagnostics, FileError, FileFailure};
use crate::geo::{RadiusFilter, EARTH_RADIUS_MILES};
use crate::pool::{self, UnitOutcome};
use crate::types::{GeoPoint, Sighting};
use crate::window::{self, SelectedMember, TimeWindow, WindowError};
use chrono::NaiveTime;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Time window error: {0}")]
    Window(#[from] WindowError),
    #[error("Worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Live counters for a search run.
#[derive(Debug, Default)]
pub struct SearchStats {
    pub files_selected: AtomicU64,
    pub files_done: AtomicU64,
    pub files_failed: AtomicU64,
    pub records_scanned: AtomicU64,
    pub sightings: AtomicU64,
}

impl SearchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SearchStatsSnapshot {
        SearchStatsSnapshot {
            files_selected: self.files_selected.load(Ordering::Relaxed),
            files_done: self.files_done.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            records_scanned: self.records_scanned.load(Ordering::Relaxed),
            sightings: self.sightings.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchStatsSnapshot {
    pub files_selected: u64,
    pub files_done: u64,
    pub files_failed: u64,
    pub records_scanned: u64,
    pub sightings: u64,
}

/// Configuration for a search.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub window: TimeWindow,
    pub center: GeoPoint,
    /// Search radius; `<= 0` keeps every record
    pub radius: f64,
    /// Sphere radius distances are measured on (3959 for miles)
    pub unit_radius: f64,
    pub workers: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            window: TimeWindow::new(hm(19, 0), hm(20, 0)),
            center: GeoPoint::new(41.6667600, -74.1495897),
            radius: 5.0,
            unit_radius: EARTH_RADIUS_MILES,
            workers: 10,
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

impl SearchConfig {
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_center(mut self, center: GeoPoint) -> Self {
        self.center = center;
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_unit_radius(mut self, unit_radius: f64) -> Self {
        self.unit_radius = unit_radius;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn filter(&self) -> RadiusFilter {
        RadiusFilter::new(self.center, self.radius).with_unit_radius(self.unit_radius)
    }
}

/// Result of a search run.
#[derive(Debug, Clone, Default)]
pub struct SearchReport {
    pub files_selected: usize,
    pub files_failed: usize,
    pub records_scanned: u64,
    /// Sightings in time-window member order, then record order.
    pub sightings: Vec<Sighting>,
    pub failures: Vec<FileFailure>,
}

/// Searches archive members for aircraft near a point during a time window.
pub struct Searcher {
    config: SearchConfig,
    stats: Arc<SearchStats>,
    diagnostics: Arc<Diagnostics>,
}

impl Searcher {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            stats: Arc::new(SearchStats::new()),
            diagnostics: Arc::new(Diagnostics::new()),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn stats(&self) -> Arc<SearchStats> {
        Arc::clone(&self.stats)
    }

    /// Select members by time, then filter each one by distance.
    ///
    /// Listing the archive or a member name without a parsable time fails
    /// the run; anything wrong inside a member only fails that member.
    pub async fn run(&self, archive: &ArchiveReader) -> Result<SearchReport, SearchError> {
        let members = {
            let archive = archive.clone();
            tokio::task::spawn_blocking(move || archive.list_members()).await??
        };
        let selected = window::select(&members, &self.config.window)?;

        tracing::info!(
            "Selected {} of {} files between {} and {}",
            selected.len(),
            members.len(),
            self.config.window.start,
            self.config.window.end
        );
        self.stats
            .files_selected
            .store(selected.len() as u64, Ordering::Relaxed);

        let start = Instant::now();
        let unit = Arc::new(MemberSearch {
            archive: archive.clone(),
            filter: self.config.filter(),
            stats: Arc::clone(&self.stats),
            diagnostics: Arc::clone(&self.diagnostics),
        });

        let outcomes = pool::run_ordered(selected.clone(), self.config.workers, move |_, member| {
            let unit = Arc::clone(&unit);
            async move { unit.search(member).await }
        })
        .await;

        let mut report = SearchReport {
            files_selected: selected.len(),
            ..Default::default()
        };

        for (member, outcome) in selected.into_iter().zip(outcomes) {
            let result = match outcome {
                UnitOutcome::Done(result) => result,
                UnitOutcome::Panicked(message) => Err(FileError::Worker(message)),
            };
            match result {
                Ok(found) => {
                    report.records_scanned += found.scanned as u64;
                    report.sightings.extend(found.sightings);
                }
                Err(e) => {
                    report.files_failed += 1;
                    report.failures.push(FileFailure {
                        member: member.name,
                        kind: e.kind(),
                        message: e.to_string(),
                        records_lost: 0,
                    });
                }
            }
        }

        tracing::info!(
            "Found {} sightings in {} files in {:?} ({} failed)",
            report.sightings.len(),
            report.files_selected,
            start.elapsed(),
            report.files_failed
        );

        Ok(report)
    }
}

struct MemberHits {
    scanned: usize,
    sightings: Vec<Sighting>,
}

struct MemberSearch {
    archive: ArchiveReader,
    filter: RadiusFilter,
    stats: Arc<SearchStats>,
    diagnostics: Arc<Diagnostics>,
}

impl MemberSearch {
    async fn search(&self, member: SelectedMember) -> Result<MemberHits, FileError> {
        let name = member.name.clone();
        let span = tracing::info_span!("search", member = %name);

        let result = {
            let archive = self.archive.clone();
            let filter = self.filter;
            let span = span.clone();
            tokio::task::spawn_blocking(move || {
                span.in_scope(|| search_member(&archive, &filter, &member))
            })
            .await
            .map_err(FileError::from)
            .and_then(|r| r)
        };

        self.stats.files_done.fetch_add(1, Ordering::Relaxed);
        match &result {
            Ok(hits) => {
                self.stats
                    .records_scanned
                    .fetch_add(hits.scanned as u64, Ordering::Relaxed);
                self.stats
                    .sightings
                    .fetch_add(hits.sightings.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.files_failed.fetch_add(1, Ordering::Relaxed);
                self.diagnostics.record_failure(FileFailure {
                    member: name.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                    records_lost: 0,
                });
                span.in_scope(|| {
                    tracing::error!(
                        "Unable to search {}/{}: {}",
                        self.archive.path().display(),
                        name,
                        e
                    );
                });
            }
        }

        result
    }
}

/// Decode one member and keep the records the filter retains.
fn search_member(
    archive: &ArchiveReader,
    filter: &RadiusFilter,
    member: &SelectedMember,
) -> Result<MemberHits, FileError> {
    let text = archive.read_member(&member.name)?;
    let snapshot = decode(&text)?.with_timestamp(member.time);
    let scanned = snapshot.records.len();
    let server_time_ms = snapshot.server_time_ms;

    let sightings: Vec<Sighting> = snapshot
        .records
        .into_iter()
        .filter_map(|record| {
            let distance = filter.distance_to(&record);
            filter.retains(distance).then(|| Sighting {
                record,
                distance,
                timestamp: member.time,
                server_time_ms,
            })
        })
        .collect();

    tracing::info!("Found {} aircraft at {}", sightings.len(), member.time);
    Ok(MemberHits { scanned, sightings })
}

/// Write sightings as JSON Lines.
pub fn write_sightings<W: Write>(mut out: W, sightings: &[Sighting]) -> io::Result<()> {
    for sighting in sightings {
        serde_json::to_writer(&mut out, sighting)?;
        out.write_all(b"\n")?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::write_archive;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    fn snapshot(records: &str) -> String {
        format!(r#"{{"acList": [{}]}}"#, records)
    }

    fn searcher(center: GeoPoint, radius: f64, workers: usize) -> Searcher {
        Searcher::new(
            SearchConfig::default()
                .with_window(TimeWindow::parse("19:00", "20:00").unwrap())
                .with_center(center)
                .with_radius(radius)
                .with_workers(workers),
        )
    }

    #[tokio::test]
    async fn test_only_members_inside_window_are_searched() {
        let dir = tempdir().unwrap();
        let record = r#"{"Lat": 40.0, "Long": -74.0, "Icao": "ABC123"}"#;
        let path = write_archive(
            dir.path(),
            "day.zip",
            &[
                ("18:59.json", snapshot(record).as_str()),
                ("19:30.json", snapshot(record).as_str()),
                ("20:01.json", snapshot(record).as_str()),
            ],
        );

        let report = searcher(GeoPoint::new(40.0, -74.1), 10.0, 2)
            .run(&ArchiveReader::new(&path))
            .await
            .unwrap();

        assert_eq!(report.files_selected, 1);
        assert_eq!(report.sightings.len(), 1);
        assert_eq!(report.sightings[0].timestamp, hm(19, 30));
    }

    #[tokio::test]
    async fn test_record_near_center_is_found_with_distance() {
        let dir = tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            "day.zip",
            &[(
                "19:30.json",
                snapshot(r#"{"Lat": 40.0, "Long": -74.0, "Icao": "ABC123"}"#).as_str(),
            )],
        );

        let report = searcher(GeoPoint::new(40.0, -74.1), 10.0, 1)
            .run(&ArchiveReader::new(&path))
            .await
            .unwrap();

        assert_eq!(report.sightings.len(), 1);
        let sighting = &report.sightings[0];
        assert_eq!(sighting.record.icao(), Some("ABC123"));
        let d = sighting.distance.unwrap();
        assert!(d > 0.0 && d < 10.0, "got {d}");
    }

    #[tokio::test]
    async fn test_record_exactly_at_center_is_excluded() {
        let dir = tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            "day.zip",
            &[(
                "19:30.json",
                snapshot(
                    r#"{"Lat": 40.0, "Long": -74.0, "Icao": "ONTOP"},
                       {"Lat": 40.0, "Long": -74.05, "Icao": "NEAR"},
                       {"Lat": 45.0, "Long": -74.0, "Icao": "FAR"},
                       {"Icao": "NOPOS"}"#,
                )
                .as_str(),
            )],
        );

        let report = searcher(GeoPoint::new(40.0, -74.0), 10.0, 1)
            .run(&ArchiveReader::new(&path))
            .await
            .unwrap();

        let found: Vec<_> = report.sightings.iter().filter_map(|s| s.record.icao()).collect();
        assert_eq!(found, vec!["NEAR"]);
        assert_eq!(report.records_scanned, 4);
    }

    #[tokio::test]
    async fn test_zero_radius_keeps_everything() {
        let dir = tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            "day.zip",
            &[(
                "19:30.json",
                snapshot(r#"{"Lat": 45.0, "Long": -74.0}, {"Icao": "NOPOS"}"#).as_str(),
            )],
        );

        let report = searcher(GeoPoint::new(40.0, -74.0), 0.0, 1)
            .run(&ArchiveReader::new(&path))
            .await
            .unwrap();

        assert_eq!(report.sightings.len(), 2);
        assert!(report.sightings[0].distance.unwrap() > 300.0);
        assert_eq!(report.sightings[1].distance, None);
    }

    #[tokio::test]
    async fn test_results_follow_member_order() {
        let dir = tempdir().unwrap();
        let members: Vec<(String, String)> = (0..12)
            .map(|i| {
                let record = format!(r#"{{"Lat": 40.0, "Long": -74.01, "Icao": "AC{:02}"}}"#, i);
                (format!("19:{:02}.json", i), snapshot(&record))
            })
            .collect();
        let refs: Vec<(&str, &str)> = members
            .iter()
            .map(|(n, c)| (n.as_str(), c.as_str()))
            .collect();
        let path = write_archive(dir.path(), "day.zip", &refs);

        let report = searcher(GeoPoint::new(40.0, -74.0), 5.0, 4)
            .run(&ArchiveReader::new(&path))
            .await
            .unwrap();

        let found: Vec<_> = report.sightings.iter().filter_map(|s| s.record.icao()).collect();
        let expected: Vec<_> = (0..12).map(|i| format!("AC{:02}", i)).collect();
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn test_bad_member_is_skipped() {
        let dir = tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            "day.zip",
            &[
                ("19:10.json", "not json"),
                ("19:20.json", snapshot(r#"{"Lat": 40.0, "Long": -74.01}"#).as_str()),
            ],
        );

        let report = searcher(GeoPoint::new(40.0, -74.0), 5.0, 2)
            .run(&ArchiveReader::new(&path))
            .await
            .unwrap();

        assert_eq!(report.files_failed, 1);
        assert_eq!(report.failures[0].member, "19:10.json");
        assert_eq!(report.failures[0].kind, ErrorKind::MalformedData);
        assert_eq!(report.sightings.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_member_name_fails_search() {
        let dir = tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            "day.zip",
            &[("19:10.json", snapshot("").as_str()), ("manifest.txt", "hello")],
        );

        let err = searcher(GeoPoint::new(40.0, -74.0), 5.0, 1)
            .run(&ArchiveReader::new(&path))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Window(WindowError::MalformedMemberName { .. })));
    }

    #[tokio::test]
    async fn test_sightings_carry_server_time() {
        let dir = tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            "day.zip",
            &[
                (
                    "19:30.json",
                    r#"{"stm": 1466451000000, "acList": [{"Lat": 40.0, "Long": -74.01}]}"#,
                ),
                ("19:40.json", snapshot(r#"{"Lat": 40.0, "Long": -74.01}"#).as_str()),
            ],
        );

        let report = searcher(GeoPoint::new(40.0, -74.0), 5.0, 2)
            .run(&ArchiveReader::new(&path))
            .await
            .unwrap();

        assert_eq!(report.sightings.len(), 2);
        assert_eq!(report.sightings[0].server_time_ms, Some(1466451000000));
        assert_eq!(report.sightings[1].server_time_ms, None);

        let mut out = Vec::new();
        write_sightings(&mut out, &report.sightings).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].contains(r#""server_time_ms":1466451000000"#));
        assert!(!lines[1].contains("server_time_ms"));
    }

    /// Records every event with the `member` of its enclosing `search` span.
    mod capture {
        use parking_lot::Mutex;
        use std::fmt;
        use std::sync::Once;
        use tracing::field::{Field, Visit};
        use tracing::span::{Attributes, Id};
        use tracing::{Event, Subscriber};
        use tracing_subscriber::layer::{Context, SubscriberExt};
        use tracing_subscriber::registry::LookupSpan;
        use tracing_subscriber::Layer;

        static INSTALL: Once = Once::new();
        static EVENTS: Mutex<Vec<(String, Option<String>)>> = parking_lot::const_mutex(Vec::new());

        #[derive(Default)]
        struct Fields {
            member: Option<String>,
            message: Option<String>,
        }

        impl Visit for Fields {
            fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
                match field.name() {
                    "member" => self.member = Some(format!("{:?}", value)),
                    "message" => self.message = Some(format!("{:?}", value)),
                    _ => {}
                }
            }
        }

        struct SpanMember(String);

        struct MemberCapture;

        impl<S> Layer<S> for MemberCapture
        where
            S: Subscriber + for<'a> LookupSpan<'a>,
        {
            fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
                let mut fields = Fields::default();
                attrs.record(&mut fields);
                if let (Some(member), Some(span)) = (fields.member, ctx.span(id)) {
                    span.extensions_mut().insert(SpanMember(member));
                }
            }

            fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
                let mut fields = Fields::default();
                event.record(&mut fields);
                let member = ctx.event_scope(event).and_then(|scope| {
                    scope.from_root().find_map(|span| {
                        if span.name() != "search" {
                            return None;
                        }
                        span.extensions().get::<SpanMember>().map(|m| m.0.clone())
                    })
                });
                EVENTS
                    .lock()
                    .push((fields.message.unwrap_or_default(), member));
            }
        }

        pub fn install() {
            INSTALL.call_once(|| {
                let subscriber = tracing_subscriber::registry().with(MemberCapture);
                let _ = tracing::subscriber::set_global_default(subscriber);
            });
        }

        /// Span member of the first event whose message contains `needle`.
        pub fn member_of(needle: &str) -> Option<Option<String>> {
            EVENTS
                .lock()
                .iter()
                .find(|(message, _)| message.contains(needle))
                .map(|(_, member)| member.clone())
        }
    }

    #[tokio::test]
    async fn test_member_work_runs_inside_its_span() {
        capture::install();

        let dir = tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            "day.zip",
            &[
                ("19:25.json", snapshot(r#"{"Lat": 40.0, "Long": -74.01}"#).as_str()),
                ("19:26.json", "not json"),
            ],
        );

        let report = searcher(GeoPoint::new(40.0, -74.0), 5.0, 2)
            .run(&ArchiveReader::new(&path))
            .await
            .unwrap();
        assert_eq!(report.files_failed, 1);

        assert_eq!(
            capture::member_of("aircraft at 19:25:00"),
            Some(Some("19:25.json".to_string()))
        );
        assert_eq!(
            capture::member_of("/19:26.json: "),
            Some(Some("19:26.json".to_string()))
        );
    }

    #[test]
    fn test_write_sightings_jsonl() {
        let sighting = Sighting {
            record: crate::decode::decode(r#"{"acList": [{"Icao": "ABC123"}]}"#)
                .unwrap()
                .records
                .remove(0),
            distance: Some(2.5),
            timestamp: hm(19, 30),
            server_time_ms: None,
        };

        let mut out = Vec::new();
        write_sightings(&mut out, &[sighting.clone(), sighting]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"Icao":"ABC123","distance":2.5,"timestamp":"19:30:00"}"#
        );
    }
}
