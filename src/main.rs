//! ADS-B Exchange archive CLI
//!
//! Loads archived snapshots into PostgreSQL, or searches them for aircraft
//! near a point during a time window.

use adsbx_archive::{
    archive::ArchiveReader,
    config::{self, Config},
    destination::PgDestination,
    geo::EARTH_RADIUS_MILES,
    loader::{LoadReport, Loader, LoaderConfig},
    search::{self, SearchConfig, SearchReport, Searcher},
    types::GeoPoint,
    window::TimeWindow,
    FileFailure,
};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "adsbx-archive")]
#[command(about = "Load and search archived ADS-B Exchange snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file
    #[arg(short, long, default_value = "loader.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every snapshot in an archive into the database
    Load {
        /// Zip archive of JSON snapshots
        archive: PathBuf,

        /// Number of workers (and database connections)
        #[arg(short, long)]
        pool: Option<usize>,

        /// Destination table
        #[arg(short, long)]
        table: Option<String>,

        /// Batches at least this large are loaded with COPY
        #[arg(long)]
        copy_threshold: Option<usize>,

        /// Connection URL, overrides the [database] connection settings
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },

    /// Find aircraft near a point during a time window
    Search {
        /// Zip archive of JSON snapshots
        archive: PathBuf,

        /// Start of the time window (e.g. 19:00)
        #[arg(short, long, default_value = "19:00")]
        start: String,

        /// End of the time window (e.g. 20:00)
        #[arg(short, long, default_value = "20:00")]
        end: String,

        /// Latitude of the search center
        #[arg(long, default_value = "41.6667600", allow_hyphen_values = true)]
        lat: f64,

        /// Longitude of the search center
        #[arg(long, default_value = "-74.1495897", allow_hyphen_values = true)]
        lon: f64,

        /// Search radius, 0 keeps every aircraft
        #[arg(short, long, default_value = "5.0")]
        radius: f64,

        /// Sphere radius distances are measured on (3959 miles, 6371 km)
        #[arg(long, default_value_t = EARTH_RADIUS_MILES)]
        unit_radius: f64,

        /// Number of workers
        #[arg(short, long)]
        pool: Option<usize>,

        /// Output file for JSON Lines sightings ("-" for stdout)
        #[arg(short, long, default_value = "aircraft.jsonl")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Load {
            archive,
            pool,
            table,
            copy_threshold,
            database_url,
        } => {
            run_load(
                config,
                &archive,
                pool,
                table,
                copy_threshold,
                database_url.as_deref(),
            )
            .await?;
        }

        Commands::Search {
            archive,
            start,
            end,
            lat,
            lon,
            radius,
            unit_radius,
            pool,
            output,
        } => {
            let search_config = SearchConfig::default()
                .with_window(TimeWindow::parse(&start, &end)?)
                .with_center(GeoPoint::new(lat, lon))
                .with_radius(radius)
                .with_unit_radius(unit_radius)
                .with_workers(pool.unwrap_or(config.search.pool));
            run_search(search_config, &archive, &output).await?;
        }
    }

    Ok(())
}

async fn run_load(
    config: Config,
    archive_path: &Path,
    pool: Option<usize>,
    table: Option<String>,
    copy_threshold: Option<usize>,
    database_url: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let workers = pool.unwrap_or(config.loader.pool);
    let table = table.unwrap_or_else(|| config.database.table.clone());
    let options = config::connect_options(&config.database, database_url)?;

    tracing::info!("Loading archive {}", archive_path.display());
    tracing::info!("Destination table: {}", table);
    tracing::info!("Workers: {}", workers);

    let destination = Arc::new(PgDestination::connect_lazy(
        options,
        table,
        u32::try_from(workers).unwrap_or(u32::MAX),
    ));
    let loader_config = LoaderConfig::default()
        .with_workers(workers)
        .with_copy_threshold(copy_threshold.unwrap_or(config.loader.copy_threshold));
    let loader = Loader::new(Arc::clone(&destination), loader_config);
    let stats = loader.stats();

    // Spawn stats reporting task
    let stats_handle = {
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let s = stats.snapshot();
                tracing::info!(
                    "Stats: files={}/{}, failed={}, records={}, loaded={}",
                    s.files_done,
                    s.files_total,
                    s.files_failed,
                    s.records_seen,
                    s.rows_loaded
                );
            }
        })
    };

    let archive = ArchiveReader::new(archive_path);
    let result = loader.run(&archive).await;

    stats_handle.abort();
    destination.close().await;

    print_load_summary(&result?);
    Ok(())
}

async fn run_search(
    search_config: SearchConfig,
    archive_path: &Path,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Searching archive {}", archive_path.display());
    tracing::info!(
        "Window {} to {}, within {} of {}",
        search_config.window.start,
        search_config.window.end,
        search_config.radius,
        search_config.center
    );

    let searcher = Searcher::new(search_config);
    let archive = ArchiveReader::new(archive_path);
    let report = searcher.run(&archive).await?;

    if output == Path::new("-") {
        search::write_sightings(io::stdout().lock(), &report.sightings)?;
    } else {
        let file = File::create(output)?;
        search::write_sightings(BufWriter::new(file), &report.sightings)?;
        tracing::info!("Wrote {} sightings to {}", report.sightings.len(), output.display());
    }

    print_search_summary(&report);
    Ok(())
}

fn print_load_summary(report: &LoadReport) {
    tracing::info!("Final statistics:");
    tracing::info!("  Files attempted: {}", report.files_attempted);
    tracing::info!("  Files loaded: {}", report.files_loaded());
    tracing::info!("  Files failed: {}", report.files_failed);
    tracing::info!("  Records seen: {}", report.records_seen);
    tracing::info!("  Rows loaded: {}", report.rows_loaded);
    tracing::info!("  Coercion failures: {}", report.coercion_failures);

    if !report.unmapped_fields.is_empty() {
        tracing::info!("  Unmapped fields:");
        for (field, count) in &report.unmapped_fields {
            tracing::info!("    {}: {} records", field, count);
        }
    }

    print_failures(&report.failures);
}

fn print_search_summary(report: &SearchReport) {
    tracing::info!("Final statistics:");
    tracing::info!("  Files selected: {}", report.files_selected);
    tracing::info!("  Files failed: {}", report.files_failed);
    tracing::info!("  Records scanned: {}", report.records_scanned);
    tracing::info!("  Sightings: {}", report.sightings.len());

    print_failures(&report.failures);
}

fn print_failures(failures: &[FileFailure]) {
    for failure in failures {
        tracing::warn!(
            "  {} ({}): {}, {} records lost",
            failure.member,
            failure.kind,
            failure.message,
            failure.records_lost
        );
    }
}
