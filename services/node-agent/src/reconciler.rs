//! Reconciliation loop for converging node state.
//!
//! Each iteration runs these steps in order and never goes back:
//! - Sync the agent repository, then the config repository
//! - Compare the config commit with its ledger entry
//! - Install packages if the config changed, upgrade if asked to
//! - Detect changes to the agent's own entry point
//! - Converge managed files
//! - Reboot, or restart every service that asked for it
//! - Record the config commit
//!
//! Collaborator failures are logged and the iteration carries on. The next
//! iteration re-evaluates everything, so failed work is retried there.

use std::sync::Arc;

use edge_cd_reconcile::{
    is_config_changed, needs_self_update_check, CommitLedger, FileReconciler, RuntimeState,
};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::desired::{DesiredState, RepoSpec};
use crate::packages::PackageManager;
use crate::services::{Reboot, ServiceManager};
use crate::vcs::VersionControl;

/// External systems the reconciler drives.
#[derive(Clone)]
pub struct Collaborators {
    pub vcs: Arc<dyn VersionControl>,
    pub packages: Arc<dyn PackageManager>,
    pub services: Arc<dyn ServiceManager>,
    pub reboot: Arc<dyn Reboot>,
}

/// What one iteration did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    /// Config repository moved since the last recorded commit.
    pub config_changed: bool,

    /// Required packages were installed.
    pub packages_installed: bool,

    /// Required packages were upgraded.
    pub packages_upgraded: bool,

    /// The agent's entry point changed and its service was scheduled.
    pub self_update: bool,

    /// Number of managed files written.
    pub files_written: usize,

    /// File convergence error, if the batch was aborted.
    pub file_sync_error: Option<String>,

    /// Services restarted successfully, in restart order.
    pub restarted_services: Vec<String>,

    /// A reboot was triggered and the iteration stopped there.
    pub reboot_triggered: bool,

    /// The config commit was written to its ledger.
    pub config_commit_persisted: bool,
}

/// Reconciler for converging node state.
pub struct Reconciler {
    config: Config,
    desired: DesiredState,
    collaborators: Collaborators,
    iteration: u64,
}

impl Reconciler {
    /// Create a new reconciler from an already loaded desired state.
    pub fn new(config: Config, desired: DesiredState, collaborators: Collaborators) -> Self {
        Self {
            config,
            desired,
            collaborators,
            iteration: 0,
        }
    }

    /// Desired state used by the most recent iteration.
    pub fn desired(&self) -> &DesiredState {
        &self.desired
    }

    /// Run the reconciliation loop until shutdown.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            config_repo = %self.config.config_repo.url,
            spec = %self.config.spec_path().display(),
            "Starting reconciliation loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.iteration += 1;
            let span = info_span!("iteration", n = self.iteration);
            let report = self.run_once().instrument(span).await;
            debug!(?report, "Iteration finished");

            let interval = self.desired.polling_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconciler shutting down");
    }

    /// Perform a single reconciliation pass.
    pub async fn run_once(&mut self) -> IterationReport {
        let mut report = IterationReport::default();
        let mut state = RuntimeState::new();

        let agent_repo = self.desired.edge_cd.repo.clone();
        self.sync_repo("edge-cd", &agent_repo).await;

        let config_repo = self.config.config_repo.clone();
        if config_repo.is_local() {
            debug!(
                path = %config_repo.root().display(),
                "Config repository is local, skipping sync"
            );
        } else {
            self.sync_repo("config", &config_repo).await;
        }

        self.reload_desired_state();

        let config_ledger = CommitLedger::new(self.config.config_commit_path());
        let config_commit = self.config_commit(&config_repo).await;
        if let Some(current) = &config_commit {
            let last = config_ledger.read();
            report.config_changed = is_config_changed(&last, current);
            debug!(
                last = %last,
                current = %current,
                changed = report.config_changed,
                "Checked config commit"
            );
        }

        // Only a fully converged config commit is recorded.
        let mut converged = true;
        let packages = self.desired.package_manager.required_packages.clone();

        if report.config_changed {
            match self.collaborators.packages.ensure_installed(&packages).await {
                Ok(()) => report.packages_installed = true,
                Err(e) => {
                    error!(error = %e, "Failed to install packages");
                    converged = false;
                }
            }
        }

        if self.desired.package_manager.auto_upgrade {
            match self.collaborators.packages.upgrade(&packages).await {
                Ok(()) => report.packages_upgraded = true,
                Err(e) => warn!(error = %e, "Failed to upgrade packages"),
            }
        }

        report.self_update = self.detect_self_update(&mut state).await;

        let files = FileReconciler::new(self.config.config_dir());
        match files.reconcile(&self.desired.files) {
            Ok(result) => {
                report.files_written = result.written.len();
                state.merge(&result);
            }
            Err(e) => {
                error!(error = %e, "File sync aborted");
                report.file_sync_error = Some(e.to_string());
                converged = false;
            }
        }

        if state.reboot() {
            warn!("Reboot required, skipping service restarts");
            self.collaborators.reboot.reboot().await;
            report.reboot_triggered = true;
            return report;
        }

        for service in state.services_to_restart() {
            if self.restart_service(&service).await {
                report.restarted_services.push(service);
            }
        }

        match config_commit {
            Some(commit) if converged => match config_ledger.write(&commit) {
                Ok(()) => report.config_commit_persisted = true,
                Err(e) => error!(error = %e, "Failed to record config commit"),
            },
            Some(commit) => {
                warn!(commit = %commit, "Config not fully converged, leaving ledger unchanged");
            }
            None => {}
        }

        info!(
            config_changed = report.config_changed,
            files_written = report.files_written,
            restarted = report.restarted_services.len(),
            "Reconciliation complete"
        );
        report
    }

    async fn sync_repo(&self, label: &str, repo: &RepoSpec) {
        if let Err(e) = self
            .collaborators
            .vcs
            .clone_or_sync(&repo.url, &repo.branch, &repo.dest_path, &repo.sparse_paths)
            .await
        {
            warn!(
                repo = label,
                url = %repo.url,
                error = %e,
                "Repository sync failed, using checkout on disk"
            );
        }
    }

    /// Re-read the spec; keep the previous one if it no longer loads.
    fn reload_desired_state(&mut self) {
        match DesiredState::load(&self.config.spec_path()) {
            Ok(desired) => {
                if desired != self.desired {
                    info!("Desired state changed");
                }
                self.desired = desired;
            }
            Err(e) => {
                warn!(error = %e, "Failed to reload desired state, keeping previous");
            }
        }
    }

    /// Current config commit, or `None` when it is not tracked.
    async fn config_commit(&self, repo: &RepoSpec) -> Option<String> {
        if repo.is_local() {
            return None;
        }

        match self.collaborators.vcs.current_commit(&repo.dest_path).await {
            Ok(commit) => Some(commit),
            Err(e) => {
                warn!(error = %e, "Failed to read config commit, treating as unchanged");
                None
            }
        }
    }

    /// Schedule the agent's own restart if its entry point changed.
    ///
    /// Always re-enables the agent service. Returns true if a restart was
    /// scheduled.
    async fn detect_self_update(&self, state: &mut RuntimeState) -> bool {
        let agent = &self.desired.edge_cd;
        let ledger = CommitLedger::new(self.config.agent_commit_path(&self.desired));
        let last = ledger.read();

        let current = match self.collaborators.vcs.current_commit(&agent.repo.dest_path).await {
            Ok(commit) => Some(commit),
            Err(e) => {
                warn!(error = %e, "Failed to read edge-cd commit");
                None
            }
        };

        let mut scheduled = false;
        let mut diffed = true;

        if let Some(current) = &current {
            if needs_self_update_check(&last, current) {
                match self
                    .collaborators
                    .vcs
                    .changed_files(&agent.repo.dest_path, &last, current)
                    .await
                {
                    Ok(changed) => {
                        if changed.iter().any(|path| path == &agent.entrypoint) {
                            info!(
                                from = %last,
                                to = %current,
                                service = %agent.service_name,
                                "edge-cd entry point changed, scheduling restart"
                            );
                            state.add_service_restart(agent.service_name.as_str());
                            scheduled = true;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to diff edge-cd commits");
                        diffed = false;
                    }
                }
            }
        }

        if let Err(e) = self.collaborators.services.enable(&agent.service_name).await {
            warn!(service = %agent.service_name, error = %e, "Failed to enable edge-cd service");
        }

        // A failed diff leaves the ledger alone so the next pass retries it.
        if let Some(current) = current.filter(|_| diffed) {
            if let Err(e) = ledger.write(&current) {
                error!(error = %e, "Failed to record edge-cd commit");
            }
        }

        scheduled
    }

    /// Enable then restart `name`. Returns true if the restart succeeded.
    async fn restart_service(&self, name: &str) -> bool {
        let services = &self.collaborators.services;

        if let Err(e) = services.enable(name).await {
            warn!(service = name, error = %e, "Failed to enable service");
        }

        match services.restart(name).await {
            Ok(()) => {
                info!(service = name, "Service restarted");
                true
            }
            Err(e) => {
                error!(service = name, error = %e, "Failed to restart service");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_default_is_noop() {
        let report = IterationReport::default();
        assert!(!report.config_changed);
        assert!(!report.reboot_triggered);
        assert!(report.restarted_services.is_empty());
    }
}
