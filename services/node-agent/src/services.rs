//! Service manager and reboot wrappers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::exec::CommandLine;

/// Service operations used by the reconciler.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Enable `name` to start on boot.
    async fn enable(&self, name: &str) -> Result<()>;

    /// Restart `name`.
    async fn restart(&self, name: &str) -> Result<()>;

    /// Start `name`. Managers without a start concept keep this no-op.
    async fn start(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Triggers a node reboot.
///
/// The outcome is not reported back; implementations log failures.
#[async_trait]
pub trait Reboot: Send + Sync {
    async fn reboot(&self);
}

/// Supported init systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceManagerKind {
    Systemd,
    Openrc,
    Procd,
}

impl ServiceManagerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Systemd => "systemd",
            Self::Openrc => "openrc",
            Self::Procd => "procd",
        }
    }

    pub fn enable_command(&self, name: &str) -> CommandLine {
        match self {
            Self::Systemd => CommandLine::new("systemctl").args(["enable", name]),
            Self::Openrc => CommandLine::new("rc-update").args(["add", name, "default"]),
            Self::Procd => init_script(name).arg("enable"),
        }
    }

    pub fn restart_command(&self, name: &str) -> CommandLine {
        match self {
            Self::Systemd => CommandLine::new("systemctl").args(["restart", name]),
            Self::Openrc => CommandLine::new("rc-service").args([name, "restart"]),
            Self::Procd => init_script(name).arg("restart"),
        }
    }

    pub fn start_command(&self, name: &str) -> CommandLine {
        match self {
            Self::Systemd => CommandLine::new("systemctl").args(["start", name]),
            Self::Openrc => CommandLine::new("rc-service").args([name, "start"]),
            Self::Procd => init_script(name).arg("start"),
        }
    }

    pub fn reboot_command(&self) -> CommandLine {
        match self {
            Self::Systemd => CommandLine::new("systemctl").arg("reboot"),
            Self::Openrc | Self::Procd => CommandLine::new("reboot"),
        }
    }
}

impl fmt::Display for ServiceManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn init_script(name: &str) -> CommandLine {
    CommandLine::new(format!("/etc/init.d/{name}"))
}

/// [`ServiceManager`] that runs the init system's CLI.
#[derive(Debug, Clone)]
pub struct CommandServiceManager {
    kind: ServiceManagerKind,
}

impl CommandServiceManager {
    pub fn new(kind: ServiceManagerKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl ServiceManager for CommandServiceManager {
    async fn enable(&self, name: &str) -> Result<()> {
        self.kind.enable_command(name).run().await?;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        info!(manager = %self.kind, service = name, "Restarting service");
        self.kind.restart_command(name).run().await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.kind.start_command(name).run().await?;
        Ok(())
    }
}

/// [`Reboot`] that runs the init system's reboot command.
#[derive(Debug, Clone)]
pub struct CommandReboot {
    command: CommandLine,
}

impl CommandReboot {
    pub fn new(kind: ServiceManagerKind) -> Self {
        Self {
            command: kind.reboot_command(),
        }
    }
}

#[async_trait]
impl Reboot for CommandReboot {
    async fn reboot(&self) {
        warn!(command = %self.command, "Rebooting node");
        if let Err(e) = self.command.run().await {
            error!(error = %e, "Reboot command failed");
        }
    }
}

/// A call observed by [`MockServiceManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Enable(String),
    Restart(String),
    Start(String),
}

/// Recording [`ServiceManager`] for tests.
#[derive(Debug, Default)]
pub struct MockServiceManager {
    calls: Mutex<Vec<ServiceCall>>,
    fail_restarts: bool,
}

impl MockServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose restarts always fail.
    pub fn failing_restarts() -> Self {
        Self {
            fail_restarts: true,
            ..Self::default()
        }
    }

    pub async fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().await.clone()
    }

    /// Names passed to `restart`, in call order.
    pub async fn restarted(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                ServiceCall::Restart(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names passed to `enable`, in call order.
    pub async fn enabled(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                ServiceCall::Enable(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ServiceManager for MockServiceManager {
    async fn enable(&self, name: &str) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(ServiceCall::Enable(name.to_string()));
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(ServiceCall::Restart(name.to_string()));
        if self.fail_restarts {
            anyhow::bail!("mock restart failure for {name}");
        }
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(ServiceCall::Start(name.to_string()));
        Ok(())
    }
}

/// Counting [`Reboot`] for tests.
#[derive(Debug, Default)]
pub struct MockReboot {
    count: AtomicU64,
}

impl MockReboot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reboots(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reboot for MockReboot {
    async fn reboot(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ServiceManagerKind::Systemd, "systemctl enable app", "systemctl restart app", "systemctl start app", "systemctl reboot")]
    #[case(ServiceManagerKind::Openrc, "rc-update add app default", "rc-service app restart", "rc-service app start", "reboot")]
    #[case(ServiceManagerKind::Procd, "/etc/init.d/app enable", "/etc/init.d/app restart", "/etc/init.d/app start", "reboot")]
    fn test_commands(
        #[case] kind: ServiceManagerKind,
        #[case] enable: &str,
        #[case] restart: &str,
        #[case] start: &str,
        #[case] reboot: &str,
    ) {
        assert_eq!(kind.enable_command("app").to_string(), enable);
        assert_eq!(kind.restart_command("app").to_string(), restart);
        assert_eq!(kind.start_command("app").to_string(), start);
        assert_eq!(kind.reboot_command().to_string(), reboot);
    }

    struct NoStart;

    #[async_trait]
    impl ServiceManager for NoStart {
        async fn enable(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn restart(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_start_is_noop() {
        assert!(NoStart.start("app").await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let sm = MockServiceManager::new();
        sm.enable("a").await.unwrap();
        sm.restart("a").await.unwrap();
        sm.start("b").await.unwrap();

        assert_eq!(sm.enabled().await, vec!["a"]);
        assert_eq!(sm.restarted().await, vec!["a"]);
        assert_eq!(sm.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_mock_reboot_counts() {
        let reboot = MockReboot::new();
        reboot.reboot().await;
        assert_eq!(reboot.reboots(), 1);
    }
}
