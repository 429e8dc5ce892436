//! Zip archive access.
//!
//! Every call opens the container, does its work and drops the handle before
//! returning, so parallel workers never hold more archive descriptors than
//! there are units in flight.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Member not found in archive: {member}")]
    NotFound { member: String },
    #[error("Cannot open archive {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("Corrupt archive {path}: {source}")]
    Corrupt { path: PathBuf, source: ZipError },
    #[error("Failed to read member {member}: {source}")]
    Read { member: String, source: io::Error },
    #[error("Member {member} is not valid UTF-8")]
    InvalidUtf8 { member: String },
}

/// Read-only handle on an archive path. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    path: Arc<PathBuf>,
}

impl ArchiveReader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: Arc::new(path.as_ref().to_path_buf()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<ZipArchive<File>, ArchiveError> {
        let file = File::open(self.path.as_path()).map_err(|source| ArchiveError::Open {
            path: self.path.to_path_buf(),
            source,
        })?;
        ZipArchive::new(file).map_err(|source| ArchiveError::Corrupt {
            path: self.path.to_path_buf(),
            source,
        })
    }

    /// Member names in central-directory order. Directory entries are skipped.
    pub fn list_members(&self) -> Result<Vec<String>, ArchiveError> {
        let mut archive = self.open()?;
        let mut names = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(|source| ArchiveError::Corrupt {
                path: self.path.to_path_buf(),
                source,
            })?;
            if !entry.is_dir() {
                names.push(entry.name().to_string());
            }
        }

        Ok(names)
    }

    /// Extract one member and decode it as UTF-8.
    pub fn read_member(&self, name: &str) -> Result<String, ArchiveError> {
        let mut archive = self.open()?;
        let mut entry = archive.by_name(name).map_err(|e| match e {
            ZipError::FileNotFound => ArchiveError::NotFound {
                member: name.to_string(),
            },
            source => ArchiveError::Corrupt {
                path: self.path.to_path_buf(),
                source,
            },
        })?;

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| ArchiveError::Read {
                member: name.to_string(),
                source,
            })?;

        String::from_utf8(bytes).map_err(|_| ArchiveError::InvalidUtf8 {
            member: name.to_string(),
        })
    }
}
