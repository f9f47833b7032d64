//! Commit ledger and commit-based change detection.
//!
//! The ledger stores the last commit that was fully processed for a
//! repository, as trimmed plain text. A missing file means no prior commit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

/// Errors from ledger writes.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to create ledger directory {}: {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to write ledger {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Last processed commit for one repository.
#[derive(Debug, Clone)]
pub struct CommitLedger {
    path: PathBuf,
}

impl CommitLedger {
    /// Create a ledger backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded commit.
    ///
    /// Returns an empty string if the file is absent or unreadable.
    pub fn read(&self) -> String {
        match fs::read_to_string(&self.path) {
            Ok(raw) => raw.trim().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read commit ledger, treating as empty"
                );
                String::new()
            }
        }
    }

    /// Record `commit` as processed.
    pub fn write(&self, commit: &str) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, commit.trim())
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|source| LedgerError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// Whether the config repository moved since the last processed commit.
///
/// An empty ledger compares unequal to any real commit.
pub fn is_config_changed(last: &str, current: &str) -> bool {
    last != current
}

/// Whether the agent repository moved from a previously recorded commit.
///
/// A first run has nothing to diff against and returns false.
pub fn needs_self_update_check(last: &str, current: &str) -> bool {
    !last.is_empty() && last != current
}
