//! Connectivity and status signals exposed to UI indicators.

use serde::{Deserialize, Serialize};

/// Published reachability of the backend.
///
/// `generation` increases on every raw reachability change, including
/// flaps that never got published, so a consumer can tell whether an
/// event it is about to act on is still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectivityState {
    /// Whether the backend is considered reachable.
    pub online: bool,
    /// Monotonic transition counter.
    pub generation: u64,
}

/// A published change of reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityTransition {
    /// Previous published reachability.
    pub from: bool,
    /// New published reachability.
    pub to: bool,
    /// Generation at which the change was published.
    pub generation: u64,
}

impl ConnectivityTransition {
    /// Returns true if this transition restored connectivity.
    pub fn is_restored(&self) -> bool {
        !self.from && self.to
    }
}

/// Read-only status consumed by the connectivity indicator and the
/// pending-sync counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncSnapshot {
    /// Whether the backend is considered reachable.
    pub online: bool,
    /// Number of operations still held in the queue, failed ones included.
    pub pending_count: usize,
    /// Whether any entry needs manual resolution.
    pub has_permanent_failures: bool,
    /// Whether the durable store failed and new actions are refused.
    pub persistence_failed: bool,
}

impl SyncSnapshot {
    /// Returns true if there is nothing left to sync.
    pub fn is_idle(&self) -> bool {
        self.pending_count == 0
    }
}
