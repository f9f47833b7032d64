//! Version control client.
//!
//! The agent only needs three things from git: bring a checkout up to date,
//! read its HEAD commit, and list the files changed between two commits.
//! [`GitClient`] shells out to the `git` binary; [`MockVcs`] records calls
//! for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::exec::CommandLine;

/// URL prefix marking a repository that already lives on local disk.
pub const LOCAL_SCHEME: &str = "file://";

/// Filesystem path of a `file://` URL, or `None` for remote URLs.
pub fn local_path(url: &str) -> Option<&Path> {
    url.strip_prefix(LOCAL_SCHEME).map(Path::new)
}

/// Version control operations used by the reconciler.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clone `url` into `dest` if absent, otherwise fetch and hard-reset to `branch`.
    ///
    /// A non-empty `scope` restricts the checkout to those paths.
    async fn clone_or_sync(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
        scope: &[String],
    ) -> Result<()>;

    /// Commit currently checked out in `dest`.
    async fn current_commit(&self, dest: &Path) -> Result<String>;

    /// Paths changed between two commits, relative to the repository root.
    async fn changed_files(&self, dest: &Path, from: &str, to: &str) -> Result<Vec<String>>;
}

/// [`VersionControl`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitClient {
    program: String,
}

impl GitClient {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    fn git(&self, dest: &Path) -> CommandLine {
        CommandLine::new(&self.program)
            .arg("-C")
            .arg(dest.display().to_string())
    }

    /// Commands that bring `dest` up to date.
    ///
    /// `cloned` tells whether a checkout already exists at `dest`.
    pub fn sync_commands(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
        scope: &[String],
        cloned: bool,
    ) -> Vec<CommandLine> {
        let mut commands = Vec::new();

        if cloned {
            commands.push(self.git(dest).args(["fetch", "origin", branch]));
            commands.push(self.git(dest).args(["reset", "--hard", "FETCH_HEAD"]));
        } else {
            let mut clone = CommandLine::new(&self.program)
                .args(["clone", "--branch", branch, "--single-branch"]);
            if !scope.is_empty() {
                clone = clone.arg("--sparse");
            }
            commands.push(clone.arg(url).arg(dest.display().to_string()));
        }

        if !scope.is_empty() {
            commands.push(
                self.git(dest)
                    .args(["sparse-checkout", "set"])
                    .args(scope.iter().cloned()),
            );
        }

        commands
    }
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionControl for GitClient {
    async fn clone_or_sync(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
        scope: &[String],
    ) -> Result<()> {
        let cloned = dest.join(".git").exists();
        if !cloned {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            info!(url, branch, dest = %dest.display(), "Cloning repository");
        } else {
            debug!(url, branch, dest = %dest.display(), "Syncing repository");
        }

        for command in self.sync_commands(url, branch, dest, scope, cloned) {
            command.run().await?;
        }
        Ok(())
    }

    async fn current_commit(&self, dest: &Path) -> Result<String> {
        let out = self.git(dest).args(["rev-parse", "HEAD"]).run().await?;
        let commit = out.trim();
        if commit.is_empty() {
            anyhow::bail!("git rev-parse returned no commit for {}", dest.display());
        }
        Ok(commit.to_string())
    }

    async fn changed_files(&self, dest: &Path, from: &str, to: &str) -> Result<Vec<String>> {
        let out = self
            .git(dest)
            .args(["diff", "--name-only", from, to])
            .run()
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// In-memory [`VersionControl`] for tests.
#[derive(Debug, Default)]
pub struct MockVcs {
    commits: Mutex<HashMap<PathBuf, String>>,
    changed: Mutex<Vec<String>>,
    synced: Mutex<Vec<String>>,
    diffs: Mutex<Vec<(String, String)>>,
    fail_sync: bool,
}

impl MockVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose syncs always fail.
    pub fn failing_sync() -> Self {
        Self {
            fail_sync: true,
            ..Self::default()
        }
    }

    /// Set the commit reported for `dest`.
    pub async fn set_commit(&self, dest: impl Into<PathBuf>, commit: &str) {
        self.commits
            .lock()
            .await
            .insert(dest.into(), commit.to_string());
    }

    /// Set the file list returned by every diff.
    pub async fn set_changed_files(&self, files: &[&str]) {
        *self.changed.lock().await = files.iter().map(|f| f.to_string()).collect();
    }

    /// URLs passed to `clone_or_sync`, in call order.
    pub async fn synced(&self) -> Vec<String> {
        self.synced.lock().await.clone()
    }

    /// `(from, to)` pairs passed to `changed_files`.
    pub async fn diffs(&self) -> Vec<(String, String)> {
        self.diffs.lock().await.clone()
    }
}

#[async_trait]
impl VersionControl for MockVcs {
    async fn clone_or_sync(
        &self,
        url: &str,
        _branch: &str,
        _dest: &Path,
        _scope: &[String],
    ) -> Result<()> {
        self.synced.lock().await.push(url.to_string());
        if self.fail_sync {
            anyhow::bail!("mock sync failure for {url}");
        }
        Ok(())
    }

    async fn current_commit(&self, dest: &Path) -> Result<String> {
        self.commits
            .lock()
            .await
            .get(dest)
            .cloned()
            .with_context(|| format!("no commit for {}", dest.display()))
    }

    async fn changed_files(&self, _dest: &Path, from: &str, to: &str) -> Result<Vec<String>> {
        self.diffs
            .lock()
            .await
            .push((from.to_string(), to.to_string()));
        Ok(self.changed.lock().await.clone())
    }
}
