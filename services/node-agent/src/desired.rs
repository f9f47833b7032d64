//! Desired state loaded from the config repository.
//!
//! The spec file is YAML with camelCase keys:
//!
//! ```yaml
//! pollingIntervalSecond: 60
//! edgeCD:
//!   repo:
//!     url: https://example.com/edge-cd.git
//!     destPath: /usr/local/src/edge-cd
//! packageManager:
//!   name: apt
//!   requiredPackages: [curl]
//! serviceManager:
//!   name: systemd
//! files:
//!   - type: content
//!     content: "hello\n"
//!     destPath: /etc/motd
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use edge_cd_reconcile::FileTarget;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::packages::PackageManagerKind;
use crate::services::ServiceManagerKind;
use crate::vcs;

/// Errors loading or validating the desired state.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid desired state: {0}")]
    Invalid(String),
}

/// A git repository to keep checked out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSpec {
    pub url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    pub dest_path: PathBuf,

    /// Sparse-checkout scope. Empty means the whole tree.
    #[serde(default)]
    pub sparse_paths: Vec<String>,
}

impl RepoSpec {
    /// Whether the URL points at a local directory.
    pub fn is_local(&self) -> bool {
        vcs::local_path(&self.url).is_some()
    }

    /// Directory holding the working tree.
    pub fn root(&self) -> &Path {
        vcs::local_path(&self.url).unwrap_or(self.dest_path.as_path())
    }
}

fn default_branch() -> String {
    "main".to_string()
}

/// The agent's own repository and service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub repo: RepoSpec,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Path of the agent's entry point, relative to the repository root.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,

    /// Ledger file for the agent repository. Defaults under the state dir.
    #[serde(default)]
    pub commit_path: Option<PathBuf>,
}

fn default_service_name() -> String {
    "edge-cd".to_string()
}

fn default_entrypoint() -> String {
    "cmd/edge-cd/edge-cd".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    pub name: PackageManagerKind,

    #[serde(default)]
    pub auto_upgrade: bool,

    #[serde(default)]
    pub required_packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceManagerSpec {
    pub name: ServiceManagerKind,
}

/// Everything the node should converge to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    #[serde(default)]
    pub polling_interval_second: Option<i64>,

    #[serde(rename = "edgeCD")]
    pub edge_cd: AgentSpec,

    pub package_manager: PackageSpec,

    pub service_manager: ServiceManagerSpec,

    #[serde(default)]
    pub files: Vec<FileTarget>,
}

impl DesiredState {
    /// Read, parse and validate the spec file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let state: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        state.validate()?;
        Ok(state)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let repo = &self.edge_cd.repo;
        if repo.url.trim().is_empty() {
            return Err(ConfigError::Invalid("edgeCD.repo.url is empty".into()));
        }
        if repo.dest_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("edgeCD.repo.destPath is empty".into()));
        }
        if self.edge_cd.service_name.trim().is_empty() {
            return Err(ConfigError::Invalid("edgeCD.serviceName is empty".into()));
        }
        if self.edge_cd.entrypoint.trim().is_empty() {
            return Err(ConfigError::Invalid("edgeCD.entrypoint is empty".into()));
        }

        for (i, target) in self.files.iter().enumerate() {
            if target.dest_path().as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "files[{i}] ({}): destPath is empty",
                    target.kind()
                )));
            }
            if target.src_path().is_some_and(|p| p.as_os_str().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "files[{i}] ({}): srcPath is empty",
                    target.kind()
                )));
            }
            let blank_service = target
                .sync_effect()
                .is_some_and(|e| e.restart_services.iter().any(|s| s.trim().is_empty()));
            if blank_service {
                return Err(ConfigError::Invalid(format!(
                    "files[{i}] ({}): syncBehavior.restartServices contains an empty name",
                    target.kind()
                )));
            }
        }

        Ok(())
    }

    /// Sleep between iterations.
    pub fn polling_interval(&self) -> Duration {
        edge_cd_reconcile::polling_interval(self.polling_interval_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SPEC: &str = r#"
pollingIntervalSecond: 30
edgeCD:
  repo:
    url: https://example.com/edge-cd.git
    destPath: /usr/local/src/edge-cd
packageManager:
  name: apt
  autoUpgrade: true
  requiredPackages: [curl, git]
serviceManager:
  name: systemd
files:
  - type: file
    srcPath: etc/app.conf
    destPath: /etc/app.conf
    syncBehavior:
      restartServices: [app]
  - type: content
    content: "hello\n"
    destPath: /etc/motd
"#;

    #[test]
    fn test_load_spec_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.yaml");
        std::fs::write(&path, SPEC).unwrap();

        let state = DesiredState::load(&path).unwrap();

        assert_eq!(state.polling_interval(), Duration::from_secs(30));
        assert_eq!(state.edge_cd.repo.branch, "main");
        assert_eq!(state.edge_cd.service_name, "edge-cd");
        assert_eq!(state.edge_cd.entrypoint, "cmd/edge-cd/edge-cd");
        assert_eq!(state.package_manager.name, PackageManagerKind::Apt);
        assert!(state.package_manager.auto_upgrade);
        assert_eq!(state.service_manager.name, ServiceManagerKind::Systemd);
        assert_eq!(state.files.len(), 2);
    }

    #[test]
    fn test_missing_interval_uses_default() {
        let spec = SPEC.replace("pollingIntervalSecond: 30\n", "");
        let state: DesiredState = serde_yaml::from_str(&spec).unwrap();
        assert_eq!(state.polling_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_file_type_fails_to_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.yaml");
        std::fs::write(&path, SPEC.replace("type: content", "type: template")).unwrap();

        let err = DesiredState::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempdir().unwrap();
        let err = DesiredState::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validate_rejects_empty_dest() {
        let spec = SPEC.replace("destPath: /etc/motd", "destPath: \"\"");
        let state: DesiredState = serde_yaml::from_str(&spec).unwrap();

        let err = state.validate().unwrap_err();
        assert!(err.to_string().contains("files[1]"));
    }

    #[test]
    fn test_validate_rejects_blank_service() {
        let spec = SPEC.replace("restartServices: [app]", "restartServices: [\"\"]");
        let state: DesiredState = serde_yaml::from_str(&spec).unwrap();
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_local_repo_root() {
        let repo = RepoSpec {
            url: "file:///srv/config".into(),
            branch: "main".into(),
            dest_path: "/usr/local/src/config".into(),
            sparse_paths: vec![],
        };
        assert!(repo.is_local());
        assert_eq!(repo.root(), Path::new("/srv/config"));

        let remote = RepoSpec {
            url: "https://example.com/config.git".into(),
            ..repo
        };
        assert!(!remote.is_local());
        assert_eq!(remote.root(), Path::new("/usr/local/src/config"));
    }
}
