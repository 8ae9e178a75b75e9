//! Status publisher.
//!
//! Aggregates the connectivity state and the queue counters into one
//! read-only [`SyncSnapshot`] for UI indicators.

use crate::connectivity::ConnectivityMonitor;
use crate::queue::{OperationQueue, QueueCounts};
use clinisync_protocol::{ConnectivityState, SyncSnapshot};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// Publishes [`SyncSnapshot`]s.
#[derive(Debug)]
pub struct StatusPublisher {
    queue: Arc<OperationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    tx: watch::Sender<SyncSnapshot>,
}

impl StatusPublisher {
    /// Creates a publisher over the given sources.
    pub fn new(queue: Arc<OperationQueue>, monitor: Arc<ConnectivityMonitor>) -> Self {
        let initial = compose(queue.counts(), monitor.state());
        let (tx, _) = watch::channel(initial);
        Self { queue, monitor, tx }
    }

    /// Returns the current snapshot from cached counters.
    pub fn snapshot(&self) -> SyncSnapshot {
        compose(self.queue.counts(), self.monitor.state())
    }

    /// Returns a receiver of snapshots.
    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.tx.subscribe()
    }

    /// Recomputes the snapshot and publishes it if it changed.
    pub fn refresh(&self) -> SyncSnapshot {
        let snapshot = self.snapshot();
        self.tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                trace!(?snapshot, "Status changed");
                *current = snapshot;
                true
            }
        });
        snapshot
    }

    /// Keeps the published snapshot current until both sources close.
    pub async fn run(&self) {
        let mut counts = self.queue.watch_counts();
        let mut connectivity = self.monitor.watch();
        let mut counts_open = true;
        let mut connectivity_open = true;

        while counts_open || connectivity_open {
            tokio::select! {
                changed = counts.changed(), if counts_open => counts_open = changed.is_ok(),
                changed = connectivity.changed(), if connectivity_open => {
                    connectivity_open = changed.is_ok();
                }
            }
            self.refresh();
        }
    }
}

fn compose(counts: QueueCounts, connectivity: ConnectivityState) -> SyncSnapshot {
    SyncSnapshot {
        online: connectivity.online,
        pending_count: counts.total,
        has_permanent_failures: counts.failed_permanent > 0,
        persistence_failed: counts.persistence_failed,
    }
}
