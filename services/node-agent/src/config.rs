//! Bootstrap configuration for the agent.
//!
//! Only what is needed to find the desired state comes from the environment;
//! everything else lives in the spec file inside the config repository.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::desired::{DesiredState, RepoSpec};

/// Agent configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository holding the desired state.
    pub config_repo: RepoSpec,

    /// Directory inside the config repository that holds the spec and sources.
    pub config_path: PathBuf,

    /// Spec file name inside `config_path`.
    pub spec_file: String,

    /// Directory for commit ledgers.
    pub state_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("EDGE_CD_CONFIG_REPO_URL")
            .context("Missing config repository. Set EDGE_CD_CONFIG_REPO_URL.")?;

        let branch =
            std::env::var("EDGE_CD_CONFIG_REPO_BRANCH").unwrap_or_else(|_| "main".to_string());

        let dest_path = std::env::var("EDGE_CD_CONFIG_REPO_DEST")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/local/src/edge-cd-config"));

        let config_path = std::env::var("EDGE_CD_CONFIG_PATH").unwrap_or_default();

        let spec_file =
            std::env::var("EDGE_CD_CONFIG_SPEC_FILE").unwrap_or_else(|_| "spec.yaml".to_string());

        let state_dir = std::env::var("EDGE_CD_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/edge-cd"));

        let log_level = std::env::var("EDGE_CD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self::new(
            url,
            branch,
            dest_path,
            config_path,
            spec_file,
            state_dir,
            log_level,
        ))
    }

    fn new(
        url: String,
        branch: String,
        dest_path: PathBuf,
        config_path: String,
        spec_file: String,
        state_dir: PathBuf,
        log_level: String,
    ) -> Self {
        let trimmed = config_path.trim_matches('/').to_string();
        let sparse_paths = if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.clone()]
        };

        Self {
            config_repo: RepoSpec {
                url,
                branch,
                dest_path,
                sparse_paths,
            },
            config_path: PathBuf::from(trimmed),
            spec_file,
            state_dir,
            log_level,
        }
    }

    /// Configuration rooted at a local directory, for tests and development.
    pub fn local(config_dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self::new(
            format!("file://{}", config_dir.display()),
            "main".to_string(),
            config_dir,
            String::new(),
            "spec.yaml".to_string(),
            state_dir.into(),
            "debug".to_string(),
        )
    }

    /// Directory file sources are resolved against.
    pub fn config_dir(&self) -> PathBuf {
        self.config_repo.root().join(&self.config_path)
    }

    /// Path of the desired-state spec.
    pub fn spec_path(&self) -> PathBuf {
        self.config_dir().join(&self.spec_file)
    }

    /// Ledger file for the config repository.
    pub fn config_commit_path(&self) -> PathBuf {
        self.state_dir.join("config-last-synchronized-commit.txt")
    }

    /// Ledger file for the agent repository.
    pub fn agent_commit_path(&self, desired: &DesiredState) -> PathBuf {
        desired
            .edge_cd
            .commit_path
            .clone()
            .unwrap_or_else(|| self.state_dir.join("edge-cd-last-synchronized-commit.txt"))
    }
}
