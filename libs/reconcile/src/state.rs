//! Per-iteration effect accumulator.

use std::collections::BTreeSet;

use crate::files::SyncResult;

/// Side effects collected during one reconciliation iteration.
///
/// Created empty at the start of an iteration and dropped at its end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeState {
    services: BTreeSet<String>,
    reboot: bool,
}

impl RuntimeState {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a service restart. Adding the same name again is a no-op.
    pub fn add_service_restart(&mut self, name: impl Into<String>) {
        self.services.insert(name.into());
    }

    /// Services pending restart, in lexicographic order.
    pub fn services_to_restart(&self) -> Vec<String> {
        self.services.iter().cloned().collect()
    }

    /// Request a reboot for the rest of this iteration.
    pub fn set_reboot(&mut self) {
        self.reboot = true;
    }

    /// Whether a reboot has been requested.
    pub fn reboot(&self) -> bool {
        self.reboot
    }

    /// Fold the outcome of a file sync into this accumulator.
    pub fn merge(&mut self, result: &SyncResult) {
        for name in &result.restart_services {
            self.add_service_restart(name.as_str());
        }
        if result.reboot {
            self.set_reboot();
        }
    }

    /// Returns true if nothing has been scheduled.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && !self.reboot
    }
}
