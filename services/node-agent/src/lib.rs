//! edge-cd Node Agent Library
//!
//! The agent runs on a single node and converges it to the desired state
//! kept in a git repository: installed packages, managed files and the
//! services that depend on them. It also notices when its own code changes
//! and schedules its own restart.
//!
//! ## Architecture
//!
//! ```text
//! Reconciler (one iteration per polling interval)
//! ├── VersionControl   (agent + config repositories, commit diffs)
//! ├── PackageManager   (install / upgrade required packages)
//! ├── FileReconciler   (byte-exact drift detection and apply)
//! ├── ServiceManager   (enable / restart services)
//! └── Reboot           (supersedes restarts)
//! ```
//!
//! ## Modules
//!
//! - `config`: environment bootstrap configuration
//! - `desired`: desired-state spec loading and validation
//! - `exec`: subprocess invocation
//! - `vcs`, `packages`, `services`: collaborator traits and implementations
//! - `reconciler`: the control loop

pub mod config;
pub mod desired;
pub mod exec;
pub mod packages;
pub mod reconciler;
pub mod services;
pub mod vcs;

// Re-export commonly used types
pub use config::Config;
pub use desired::{ConfigError, DesiredState, RepoSpec};
pub use packages::{CommandPackageManager, MockPackageManager, PackageManager, PackageManagerKind};
pub use reconciler::{Collaborators, IterationReport, Reconciler};
pub use services::{
    CommandReboot, CommandServiceManager, MockReboot, MockServiceManager, Reboot, ServiceManager,
    ServiceManagerKind,
};
pub use vcs::{GitClient, MockVcs, VersionControl};
