//! ADS-B Exchange archive loader and search library.
//!
//! This library provides functionality to:
//! - Decode the per-snapshot JSON members of a zip archive
//! - Reconcile aircraft records against a live table schema and bulk-load them
//! - Select snapshots by time of day and filter aircraft by distance
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │   Archive   │───▶│   Decode    │───▶│   Coerce    │───▶│    Bulk     │
//! │   (zip)     │    │  (acList)   │    │  (schema)   │    │(COPY/INSERT)│
//! └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘
//!        │                  │                                     │
//!        ▼                  ▼                                     ▼
//! ┌─────────────┐    ┌─────────────┐                       ┌─────────────┐
//! │   Window    │───▶│     Geo     │                       │ Destination │
//! │ (time sel.) │    │ (haversine) │                       │ (Postgres)  │
//! └─────────────┘    └─────────────┘                       └─────────────┘
//!
//!  Loader / Searcher drive one unit per member through the worker pool.
//! ```
//!
//! # Example
//!
//! ```no_run
//! use adsbx_archive::{
//!     archive::ArchiveReader,
//!     search::{write_sightings, SearchConfig, Searcher},
//!     window::TimeWindow,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let archive = ArchiveReader::new("2016-06-20.zip");
//!     let config = SearchConfig::default().with_window(TimeWindow::parse("19:00", "20:00")?);
//!
//!     let report = Searcher::new(config).run(&archive).await?;
//!     write_sightings(std::io::stdout().lock(), &report.sightings)?;
//!
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod bulk;
pub mod coerce;
pub mod config;
pub mod decode;
pub mod destination;
pub mod error;
pub mod geo;
pub mod loader;
pub mod pool;
pub mod schema;
pub mod search;
pub mod types;
pub mod window;

#[cfg(test)]
mod testing;

pub use archive::ArchiveReader;
pub use bulk::BulkLoader;
pub use config::Config;
pub use destination::{Destination, PgDestination};
pub use error::{Diagnostics, ErrorKind, FileFailure};
pub use loader::{LoadReport, Loader, LoaderConfig};
pub use schema::SchemaDescriptor;
pub use search::{SearchConfig, SearchReport, Searcher};
pub use types::{AircraftRecord, GeoPoint, Sighting, Snapshot};
pub use window::TimeWindow;
