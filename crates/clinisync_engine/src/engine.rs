//! Sync engine facade.
//!
//! Wires the connectivity monitor, operation queue, coordinator and status
//! publisher together and drives them from one background loop.
//!
//! ```text
//! user action ──→ execute ──→ direct request ──→ Applied
//!                    │              │ unreachable / timeout
//!                    │              ↓
//!                    └─ offline ─→ queue ──→ coordinator ──→ backend
//!                                   │              ↑
//!                                   ↓              │ restored / tick / enqueue
//!                              status publisher    run loop
//! ```

use crate::auth::AuthProvider;
use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::coordinator::{DrainReport, SyncCoordinator};
use crate::error::{DispatchError, SyncResult};
use crate::queue::OperationQueue;
use crate::status::StatusPublisher;
use crate::store::QueueStore;
use crate::transport::{DispatchAck, RequestDispatcher};
use clinisync_protocol::{OperationId, OperationKind, PendingOperation, SyncSnapshot};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Result of [`SyncEngine::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The backend applied the request directly.
    Applied(DispatchAck),
    /// The request was queued for replay under this id.
    Queued(OperationId),
}

impl Submission {
    /// Returns true if the request was queued.
    pub fn is_queued(&self) -> bool {
        matches!(self, Submission::Queued(_))
    }
}

/// What woke the run loop.
enum Trigger {
    Shutdown,
    Drive(&'static str),
    Idle,
}

/// Offline-first sync engine.
pub struct SyncEngine {
    config: EngineConfig,
    queue: Arc<OperationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    coordinator: Arc<SyncCoordinator>,
    publisher: Arc<StatusPublisher>,
    dispatcher: Arc<dyn RequestDispatcher>,
    wake: Arc<Notify>,
    reauth: Arc<Notify>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Loads the queue from `store` and builds the engine.
    pub fn open(
        config: EngineConfig,
        store: Box<dyn QueueStore>,
        dispatcher: Arc<dyn RequestDispatcher>,
        auth: Arc<dyn AuthProvider>,
    ) -> SyncResult<Self> {
        let queue = Arc::new(OperationQueue::open(store)?);
        let monitor = Arc::new(ConnectivityMonitor::new(&config.connectivity));
        let coordinator = Arc::new(SyncCoordinator::new(
            queue.clone(),
            monitor.clone(),
            dispatcher.clone(),
            auth.clone(),
            config.retry.clone(),
            config.dispatch_timeout,
        ));
        let publisher = Arc::new(StatusPublisher::new(queue.clone(), monitor.clone()));
        let wake = Arc::new(Notify::new());
        let reauth = Arc::new(Notify::new());

        let weak = Arc::downgrade(&coordinator);
        let notify = reauth.clone();
        auth.on_reauthenticated(Box::new(move || {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.resume_after_reauth();
            }
            notify.notify_one();
        }));

        info!(pending = queue.len(), "Sync engine opened");

        Ok(Self {
            config,
            queue,
            monitor,
            coordinator,
            publisher,
            dispatcher,
            wake,
            reauth,
        })
    }

    /// Performs a user action.
    ///
    /// The request goes straight to the backend when online and nothing
    /// older is waiting. If the backend cannot be reached, or the outcome is
    /// unknown, the action is queued under the same id. Rejections,
    /// conflicts and authentication failures are returned to the caller.
    ///
    /// An action whose predecessor is still queued, failed or was discarded
    /// is never sent directly; the queue holds it if the predecessor failed.
    pub async fn execute(
        &self,
        kind: OperationKind,
        payload: serde_json::Value,
        depends_on: Option<OperationId>,
    ) -> SyncResult<Submission> {
        let counts = self.queue.counts();
        let backlog = counts.replayable + counts.in_flight > 0;
        let predecessor_pending = depends_on.is_some_and(|dep| {
            self.queue.get(dep).is_some() || self.queue.predecessor_failed(dep)
        });

        if !self.monitor.is_online() || backlog || predecessor_pending {
            let id = self.enqueue(OperationId::new(), kind, payload, depends_on)?;
            return Ok(Submission::Queued(id));
        }

        let id = OperationId::new();
        let result = match tokio::time::timeout(
            self.config.dispatch_timeout,
            self.dispatcher.dispatch(kind, &payload, &id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout),
        };

        match result {
            Ok(ack) => {
                self.monitor.record_backend_reachable();
                debug!(%id, %kind, "Applied directly");
                Ok(Submission::Applied(ack))
            }
            Err(err) => {
                if err.is_unreachable() {
                    self.monitor.record_backend_unreachable();
                } else if err != DispatchError::Timeout {
                    self.monitor.record_backend_reachable();
                }
                if !err.outcome_unknown() {
                    return Err(err.into());
                }
                info!(%id, %kind, error = %err, "Direct request failed, queued for replay");
                self.enqueue(id, kind, payload, depends_on)?;
                Ok(Submission::Queued(id))
            }
        }
    }

    /// Queues an action for replay.
    pub fn submit(
        &self,
        kind: OperationKind,
        payload: serde_json::Value,
    ) -> SyncResult<OperationId> {
        self.enqueue(OperationId::new(), kind, payload, None)
    }

    /// Queues an action that must not replay if `predecessor` failed.
    pub fn submit_after(
        &self,
        kind: OperationKind,
        payload: serde_json::Value,
        predecessor: OperationId,
    ) -> SyncResult<OperationId> {
        self.enqueue(OperationId::new(), kind, payload, Some(predecessor))
    }

    fn enqueue(
        &self,
        id: OperationId,
        kind: OperationKind,
        payload: serde_json::Value,
        depends_on: Option<OperationId>,
    ) -> SyncResult<OperationId> {
        let result = self.queue.enqueue_with(id, kind, payload, depends_on);
        self.publisher.refresh();
        let id = result?;
        self.wake.notify_one();
        Ok(id)
    }

    /// Returns every queued entry in replay order.
    pub fn list(&self) -> Vec<PendingOperation> {
        self.queue.list()
    }

    /// Removes a permanently failed entry.
    pub fn discard(&self, id: OperationId) -> SyncResult<PendingOperation> {
        let result = self.queue.discard(id);
        self.publisher.refresh();
        result
    }

    /// Moves a failed entry back to the replay set.
    pub fn requeue(&self, id: OperationId) -> SyncResult<usize> {
        let result = self.queue.requeue(id);
        self.publisher.refresh();
        let count = result?;
        self.wake.notify_one();
        Ok(count)
    }

    /// Returns the current status snapshot.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.publisher.snapshot()
    }

    /// Returns a receiver of status snapshots.
    pub fn watch_status(&self) -> watch::Receiver<SyncSnapshot> {
        self.publisher.watch()
    }

    /// Returns the connectivity monitor, to feed platform link changes.
    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Returns the operation queue.
    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    /// Returns the coordinator.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Drains the queue once.
    pub async fn drive(&self) -> DrainReport {
        let report = self.coordinator.drive().await;
        self.publisher.refresh();
        report
    }

    /// Runs the background loop until `shutdown` completes.
    ///
    /// A shutdown during a drain lets the in-flight dispatch finish and
    /// stops before the next one.
    pub async fn run<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::select! {
            () = self.publisher.run() => {}
            () = self.event_loop(shutdown) => {}
        }
    }

    async fn event_loop<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut transitions = self.monitor.subscribe();
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Sync engine running");

        loop {
            let debounce_deadline = self.monitor.pending_online_deadline();
            let backoff_deadline = self.coordinator.backoff_deadline();

            let trigger = tokio::select! {
                () = &mut shutdown => Trigger::Shutdown,
                received = transitions.recv() => match received {
                    Ok(transition) => {
                        self.coordinator.on_connectivity_transition(&transition);
                        if transition.is_restored()
                            && transition.generation == self.monitor.generation()
                        {
                            Trigger::Drive("connectivity restored")
                        } else {
                            Trigger::Idle
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed connectivity transitions");
                        Trigger::Drive("connectivity resync")
                    }
                    Err(RecvError::Closed) => Trigger::Shutdown,
                },
                () = self.monitor.changed() => Trigger::Idle,
                () = self.wake.notified() => Trigger::Drive("enqueue"),
                () = self.reauth.notified() => Trigger::Drive("re-authenticated"),
                _ = tick.tick() => {
                    self.coordinator.probe().await;
                    Trigger::Drive("tick")
                }
                () = tokio::time::sleep_until(debounce_deadline.unwrap_or_else(Instant::now)),
                    if debounce_deadline.is_some() =>
                {
                    self.monitor.settle();
                    Trigger::Idle
                }
                () = tokio::time::sleep_until(backoff_deadline.unwrap_or_else(Instant::now)),
                    if backoff_deadline.is_some() => Trigger::Drive("retry due"),
            };

            match trigger {
                Trigger::Shutdown => break,
                Trigger::Idle => {}
                Trigger::Drive(reason) => {
                    debug!(reason, "Driving queue");
                    let drive = self.drive();
                    tokio::pin!(drive);
                    let stopping = tokio::select! {
                        report = &mut drive => {
                            debug!(?report, "Drive finished");
                            false
                        }
                        () = &mut shutdown => true,
                    };
                    if stopping {
                        self.coordinator.request_stop();
                        let report = drive.await;
                        debug!(?report, "Drive stopped for shutdown");
                        break;
                    }
                }
            }
        }

        self.publisher.refresh();
        info!(pending = self.queue.len(), "Sync engine stopped");
    }
}
