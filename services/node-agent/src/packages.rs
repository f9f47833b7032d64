//! Package manager wrappers.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::exec::CommandLine;

/// Package operations used by the reconciler.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Refresh the package index.
    async fn refresh_index(&self) -> Result<()>;

    /// Install every package in `names` that is missing. Refreshes first.
    async fn ensure_installed(&self, names: &[String]) -> Result<()>;

    /// Upgrade every package in `names`. Refreshes first.
    async fn upgrade(&self, names: &[String]) -> Result<()>;
}

/// Supported package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Apt,
    Dnf,
    Apk,
    Opkg,
}

impl PackageManagerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Apk => "apk",
            Self::Opkg => "opkg",
        }
    }

    pub fn refresh_command(&self) -> CommandLine {
        match self {
            Self::Apt => apt_get().arg("update"),
            Self::Dnf => CommandLine::new("dnf").args(["makecache", "-y"]),
            Self::Apk => CommandLine::new("apk").arg("update"),
            Self::Opkg => CommandLine::new("opkg").arg("update"),
        }
    }

    pub fn install_command(&self, names: &[String]) -> CommandLine {
        let base = match self {
            Self::Apt => apt_get().args(["install", "-y"]),
            Self::Dnf => CommandLine::new("dnf").args(["install", "-y"]),
            Self::Apk => CommandLine::new("apk").arg("add"),
            Self::Opkg => CommandLine::new("opkg").arg("install"),
        };
        base.args(names.iter().cloned())
    }

    pub fn upgrade_command(&self, names: &[String]) -> CommandLine {
        let base = match self {
            Self::Apt => apt_get().args(["install", "-y", "--only-upgrade"]),
            Self::Dnf => CommandLine::new("dnf").args(["upgrade", "-y"]),
            Self::Apk => CommandLine::new("apk").arg("upgrade"),
            Self::Opkg => CommandLine::new("opkg").arg("upgrade"),
        };
        base.args(names.iter().cloned())
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn apt_get() -> CommandLine {
    CommandLine::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
}

/// [`PackageManager`] that runs the distribution's CLI.
#[derive(Debug, Clone)]
pub struct CommandPackageManager {
    kind: PackageManagerKind,
}

impl CommandPackageManager {
    pub fn new(kind: PackageManagerKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl PackageManager for CommandPackageManager {
    async fn refresh_index(&self) -> Result<()> {
        self.kind.refresh_command().run().await?;
        Ok(())
    }

    async fn ensure_installed(&self, names: &[String]) -> Result<()> {
        self.refresh_index().await?;
        if names.is_empty() {
            return Ok(());
        }

        info!(manager = %self.kind, packages = ?names, "Installing packages");
        self.kind.install_command(names).run().await?;
        Ok(())
    }

    async fn upgrade(&self, names: &[String]) -> Result<()> {
        self.refresh_index().await?;
        if names.is_empty() {
            return Ok(());
        }

        info!(manager = %self.kind, packages = ?names, "Upgrading packages");
        self.kind.upgrade_command(names).run().await?;
        Ok(())
    }
}

/// A call observed by [`MockPackageManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageCall {
    Refresh,
    Install(Vec<String>),
    Upgrade(Vec<String>),
}

/// Recording [`PackageManager`] for tests.
#[derive(Debug, Default)]
pub struct MockPackageManager {
    calls: Mutex<Vec<PackageCall>>,
    fail: bool,
}

impl MockPackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose install and upgrade calls fail after refreshing.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub async fn calls(&self) -> Vec<PackageCall> {
        self.calls.lock().await.clone()
    }

    /// Number of install calls seen so far.
    pub async fn install_count(&self) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| matches!(c, PackageCall::Install(_)))
            .count()
    }
}

#[async_trait]
impl PackageManager for MockPackageManager {
    async fn refresh_index(&self) -> Result<()> {
        self.calls.lock().await.push(PackageCall::Refresh);
        Ok(())
    }

    async fn ensure_installed(&self, names: &[String]) -> Result<()> {
        self.refresh_index().await?;
        self.calls
            .lock()
            .await
            .push(PackageCall::Install(names.to_vec()));
        if self.fail {
            anyhow::bail!("mock install failure");
        }
        Ok(())
    }

    async fn upgrade(&self, names: &[String]) -> Result<()> {
        self.refresh_index().await?;
        self.calls
            .lock()
            .await
            .push(PackageCall::Upgrade(names.to_vec()));
        if self.fail {
            anyhow::bail!("mock upgrade failure");
        }
        Ok(())
    }
}
