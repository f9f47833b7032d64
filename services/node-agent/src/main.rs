//! edge-cd
//!
//! Converges this node to the desired state held in a git repository and
//! keeps doing so every polling interval.
//!
//! ## Architecture
//!
//! - **Reconciler**: syncs repositories, installs packages, converges files,
//!   restarts services or reboots
//! - **Collaborators**: git, the package manager and the init system, each
//!   driven through its CLI

use std::sync::Arc;

use anyhow::{Context, Result};
use edge_cd_node_agent::{
    Collaborators, CommandPackageManager, CommandReboot, CommandServiceManager, Config,
    DesiredState, GitClient, Reconciler, VersionControl,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to EDGE_CD_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting edge-cd");
    info!(
        config_repo = %config.config_repo.url,
        branch = %config.config_repo.branch,
        spec = %config.spec_path().display(),
        state_dir = %config.state_dir.display(),
        "Configuration loaded"
    );

    let vcs = Arc::new(GitClient::new());

    // The spec lives in the config repository, so it must be on disk first.
    if !config.config_repo.is_local() {
        let repo = &config.config_repo;
        if let Err(e) = vcs
            .clone_or_sync(&repo.url, &repo.branch, &repo.dest_path, &repo.sparse_paths)
            .await
        {
            warn!(error = %e, "Initial config sync failed, trying checkout on disk");
        }
    }

    let desired = DesiredState::load(&config.spec_path()).context("failed to load desired state")?;
    info!(
        package_manager = %desired.package_manager.name,
        service_manager = %desired.service_manager.name,
        files = desired.files.len(),
        interval_secs = desired.polling_interval().as_secs(),
        "Desired state loaded"
    );

    let collaborators = Collaborators {
        vcs,
        packages: Arc::new(CommandPackageManager::new(desired.package_manager.name)),
        services: Arc::new(CommandServiceManager::new(desired.service_manager.name)),
        reboot: Arc::new(CommandReboot::new(desired.service_manager.name)),
    };

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut reconciler = Reconciler::new(config, desired, collaborators);
    let mut reconciler_handle = tokio::spawn(async move {
        reconciler.run(shutdown_rx).await;
    });

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        result = &mut reconciler_handle => {
            if let Err(e) = result {
                error!(error = %e, "Reconciler task panicked");
            }
            return Ok(());
        }
    }

    // Signal shutdown and let the current iteration finish
    let _ = shutdown_tx.send(true);
    if let Err(e) = reconciler_handle.await {
        error!(error = %e, "Reconciler task panicked");
    }

    info!("edge-cd shutdown complete");
    Ok(())
}
