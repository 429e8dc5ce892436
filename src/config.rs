//! Config file (`loader.toml`).
//!
//! ```toml
//! [database]
//! host = "localhost"
//! port = 5432
//! user = "postgres"
//! password = "secret"
//! database = "adsb"
//! table = "aclist"
//!
//! [loader]
//! pool = 5
//! copy_threshold = 100
//!
//! [search]
//! pool = 10
//! ```
//!
//! Every key is optional. A missing file means all defaults.

use crate::bulk::DEFAULT_COPY_THRESHOLD;
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid database URL: {0}")]
    DatabaseUrl(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub loader: LoaderSection,
    pub search: SearchSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            database: "adsb".to_string(),
            table: "aclist".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderSection {
    pub pool: usize,
    pub copy_threshold: usize,
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            pool: 5,
            copy_threshold: DEFAULT_COPY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchSection {
    pub pool: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self { pool: 10 }
    }
}

impl Config {
    pub fn from_toml(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`, or defaults when it does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(path, &raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Connection options from a URL, falling back to the config's fields.
pub fn connect_options(
    database: &DatabaseConfig,
    url: Option<&str>,
) -> Result<PgConnectOptions, ConfigError> {
    match url {
        Some(url) => Ok(url.parse()?),
        None => Ok(database.connect_options()),
    }
}
