//! Drift detection and apply for managed files.
//!
//! Every target is compared byte-for-byte against its desired content. No
//! hashes, sizes or timestamps are consulted, so an out-of-band edit is
//! always detected. Only drifted destinations are written, and only drifted
//! destinations contribute their [`SyncEffect`] to the result.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::target::{FileTarget, SyncEffect};

/// Errors that abort a file sync batch.
#[derive(Debug, Error)]
pub enum FileSyncError {
    #[error("failed to read source {}: {source}", .path.display())]
    ReadSource { path: PathBuf, source: io::Error },

    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to walk directory {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

/// Outcome of syncing a batch of targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Restart requests in the order they were produced, not deduplicated.
    pub restart_services: Vec<String>,

    /// OR of the reboot flags of every drifted target.
    pub reboot: bool,

    /// Destinations that were written.
    pub written: Vec<PathBuf>,
}

impl SyncResult {
    fn record(&mut self, dest: &Path, effect: Option<&SyncEffect>) {
        self.written.push(dest.to_path_buf());
        if let Some(effect) = effect {
            self.restart_services
                .extend(effect.restart_services.iter().cloned());
            self.reboot |= effect.reboot;
        }
    }

    /// Returns true if nothing was written.
    pub fn is_unchanged(&self) -> bool {
        self.written.is_empty()
    }
}

/// Applies [`FileTarget`]s relative to a config directory.
#[derive(Debug, Clone)]
pub struct FileReconciler {
    source_root: PathBuf,
}

impl FileReconciler {
    /// Create a reconciler resolving source paths against `source_root`.
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
        }
    }

    /// Converge every target in declaration order.
    ///
    /// The first I/O failure stops the batch; targets before it stay applied.
    pub fn reconcile(&self, targets: &[FileTarget]) -> Result<SyncResult, FileSyncError> {
        let mut result = SyncResult::default();

        for target in targets {
            let mode = target.mode();
            let effect = target.sync_effect();

            match target {
                FileTarget::File {
                    src_path,
                    dest_path,
                    ..
                } => {
                    let src = self.source_root.join(src_path);
                    if sync_file(&src, dest_path, mode)? {
                        result.record(dest_path, effect);
                    }
                }
                FileTarget::Directory {
                    src_path,
                    dest_path,
                    ..
                } => {
                    let src = self.source_root.join(src_path);
                    sync_directory(&src, dest_path, mode, effect, &mut result)?;
                }
                FileTarget::Content {
                    content,
                    dest_path,
                    ..
                } => {
                    if sync_content(content.as_bytes(), dest_path, mode)? {
                        result.record(dest_path, effect);
                    }
                }
            }
        }

        debug!(
            targets = targets.len(),
            written = result.written.len(),
            reboot = result.reboot,
            "File sync finished"
        );

        Ok(result)
    }
}

/// Returns true if both files can be read and hold identical bytes.
fn files_equal(a: &Path, b: &Path) -> bool {
    match (fs::read(a), fs::read(b)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

fn content_matches(dest: &Path, content: &[u8]) -> bool {
    fs::read(dest).map(|current| current == content).unwrap_or(false)
}

/// Copy `src` to `dest` if they differ. Returns whether a write happened.
fn sync_file(src: &Path, dest: &Path, mode: u32) -> Result<bool, FileSyncError> {
    if files_equal(src, dest) {
        return Ok(false);
    }

    let bytes = fs::read(src).map_err(|source| FileSyncError::ReadSource {
        path: src.to_path_buf(),
        source,
    })?;
    write_with_mode(dest, &bytes, mode)?;

    info!(
        src = %src.display(),
        dest = %dest.display(),
        mode = %format!("{mode:o}"),
        "Synced file"
    );
    Ok(true)
}

/// Write literal content to `dest` if it differs.
fn sync_content(content: &[u8], dest: &Path, mode: u32) -> Result<bool, FileSyncError> {
    if content_matches(dest, content) {
        return Ok(false);
    }

    write_with_mode(dest, content, mode)?;

    info!(
        dest = %dest.display(),
        bytes = content.len(),
        mode = %format!("{mode:o}"),
        "Synced content"
    );
    Ok(true)
}

/// Mirror the tree under `src` into `dest`.
///
/// Each drifted file records its own copy of `effect`.
fn sync_directory(
    src: &Path,
    dest: &Path,
    mode: u32,
    effect: Option<&SyncEffect>,
    result: &mut SyncResult,
) -> Result<(), FileSyncError> {
    create_dir(dest)?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| FileSyncError::Walk {
            path: src.to_path_buf(),
            source,
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            create_dir(&target)?;
            continue;
        }

        if sync_file(entry.path(), &target, mode)? {
            result.record(&target, effect);
        }
    }

    Ok(())
}

fn create_dir(path: &Path) -> Result<(), FileSyncError> {
    fs::create_dir_all(path).map_err(|source| FileSyncError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Path a write to `dest` should replace.
///
/// A symlinked destination resolves to its target so the link survives.
fn write_target(dest: &Path) -> PathBuf {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.file_type().is_symlink() => fs::canonicalize(dest)
            .or_else(|_| {
                fs::read_link(dest).map(|link| match dest.parent() {
                    Some(parent) => parent.join(link),
                    None => link,
                })
            })
            .unwrap_or_else(|_| dest.to_path_buf()),
        _ => dest.to_path_buf(),
    }
}

/// Write `bytes` to a temporary sibling, apply `mode`, then rename into place.
fn write_with_mode(dest: &Path, bytes: &[u8], mode: u32) -> Result<(), FileSyncError> {
    let resolved = write_target(dest);
    if resolved != dest {
        debug!(link = %dest.display(), target = %resolved.display(), "Writing through symlink");
    }
    let dest = resolved.as_path();

    if let Some(parent) = dest.parent() {
        create_dir(parent)?;
    }

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{file_name}.edge-cd.tmp"));

    let write = || -> io::Result<()> {
        fs::write(&tmp, bytes)?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
        fs::rename(&tmp, dest)
    };

    write().map_err(|source| {
        let _ = fs::remove_file(&tmp);
        FileSyncError::Write {
            path: dest.to_path_buf(),
            source,
        }
    })
}
