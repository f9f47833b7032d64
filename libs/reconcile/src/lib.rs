//! Reconciliation primitives for edge-cd.
//!
//! This library holds the synchronous building blocks the agent's control
//! loop is assembled from:
//!
//! - **Effect accumulator** ([`RuntimeState`]): services pending restart and
//!   the reboot flag gathered during one iteration.
//! - **Drift-and-apply engine** ([`FileReconciler`]): byte-exact comparison of
//!   managed files against their desired content, applied on divergence.
//! - **Commit ledger** ([`CommitLedger`]): the last commit processed per
//!   tracked repository, persisted as plain text.
//!
//! # Invariants
//!
//! - Applying the same targets twice writes nothing the second time
//! - Restart names are deduplicated and read back in lexicographic order
//! - The reboot flag never goes from set to unset within an iteration
//! - A ledger entry is only advanced by its caller after success

use std::time::Duration;

pub mod files;
pub mod ledger;
pub mod state;
pub mod target;

pub use files::{FileReconciler, FileSyncError, SyncResult};
pub use ledger::{is_config_changed, needs_self_update_check, CommitLedger, LedgerError};
pub use state::RuntimeState;
pub use target::{parse_mode, FileTarget, SyncEffect, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};

/// Default polling interval between iterations.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(60);

/// Resolve a configured polling interval in seconds.
///
/// Missing or non-positive values fall back to [`DEFAULT_POLLING_INTERVAL`].
pub fn polling_interval(seconds: Option<i64>) -> Duration {
    match seconds {
        Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
        _ => DEFAULT_POLLING_INTERVAL,
    }
}
