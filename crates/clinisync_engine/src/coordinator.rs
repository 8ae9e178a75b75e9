//! Sync coordinator.
//!
//! Drains the operation queue in order against the request interface. The
//! coordinator owns failure classification and retry timing; the queue only
//! stores what it is told.
//!
//! A drain stops on the first transient failure so that operation n+1 is
//! never attempted before n is settled. Permanent failures and conflicts do
//! not block unrelated work, but entries declared as depending on a
//! permanently failed entry are held instead of replayed.

use crate::auth::AuthProvider;
use crate::config::RetryConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{DispatchError, SyncResult};
use crate::queue::{system_clock_ms, OperationQueue};
use crate::transport::RequestDispatcher;
use clinisync_protocol::{ConnectivityTransition, FailureClass, LastError, PendingOperation};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why a drain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing replayable is left.
    Drained,
    /// Another drain is in progress.
    AlreadyRunning,
    /// Connectivity is not available.
    Offline,
    /// A transient failure stopped the drain; retry after `delay`.
    RetryScheduled {
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// A previously scheduled retry is not due yet.
    BackingOff {
        /// Time left until the retry is due.
        remaining: Duration,
    },
    /// Replay waits for re-authentication.
    AuthPaused,
    /// The durable store failed; replay cannot record progress.
    StorageFailed,
    /// A stop was requested between two dispatches.
    Stopped,
}

/// Summary of one `drive` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries confirmed and removed.
    pub synced: usize,
    /// Entries that failed permanently or conflicted.
    pub failed_permanent: usize,
    /// Entries held because a predecessor failed permanently.
    pub held: usize,
    /// Why the drain stopped.
    pub outcome: DrainOutcome,
}

impl DrainReport {
    fn new(outcome: DrainOutcome) -> Self {
        Self {
            synced: 0,
            failed_permanent: 0,
            held: 0,
            outcome,
        }
    }
}

/// Cumulative coordinator statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Drains that actually started.
    pub drains_started: u64,
    /// Operations confirmed by the backend.
    pub operations_synced: u64,
    /// Permanent failures, conflicts and held dependents.
    pub permanent_failures: u64,
    /// Transient failures.
    pub transient_failures: u64,
    /// Times replay paused for authentication.
    pub auth_pauses: u64,
    /// Last error observed.
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    until: Instant,
    generation: u64,
}

#[derive(Debug, Default)]
struct Gate {
    backoff: Option<Backoff>,
    auth_paused: bool,
}

/// Ends a drain, including on cancel: consumes any stop request and
/// resets the single-flight flag.
struct RunningGuard<'a> {
    running: &'a AtomicBool,
    stop_requested: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.stop_requested.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }
}

/// Replays queued operations when connectivity is available.
pub struct SyncCoordinator {
    queue: Arc<OperationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    dispatcher: Arc<dyn RequestDispatcher>,
    auth: Arc<dyn AuthProvider>,
    retry: RetryConfig,
    dispatch_timeout: Duration,
    running: AtomicBool,
    stop_requested: AtomicBool,
    gate: Mutex<Gate>,
    stats: Mutex<CoordinatorStats>,
}

impl SyncCoordinator {
    /// Creates a coordinator.
    pub fn new(
        queue: Arc<OperationQueue>,
        monitor: Arc<ConnectivityMonitor>,
        dispatcher: Arc<dyn RequestDispatcher>,
        auth: Arc<dyn AuthProvider>,
        retry: RetryConfig,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            monitor,
            dispatcher,
            auth,
            retry,
            dispatch_timeout,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            gate: Mutex::new(Gate::default()),
            stats: Mutex::new(CoordinatorStats::default()),
        }
    }

    /// Returns true while a drain is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns true while replay waits for re-authentication.
    pub fn is_auth_paused(&self) -> bool {
        self.gate.lock().auth_paused
    }

    /// Returns when a scheduled retry becomes due.
    pub fn backoff_deadline(&self) -> Option<Instant> {
        self.gate.lock().backoff.map(|b| b.until)
    }

    /// Returns a copy of the statistics.
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.lock().clone()
    }

    /// Makes the running drain, or the next one if none is running, stop
    /// before its next dispatch. An in-flight dispatch is not interrupted.
    /// The request is consumed when that drain ends.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Lifts an authentication pause.
    pub fn resume_after_reauth(&self) {
        let mut gate = self.gate.lock();
        if gate.auth_paused {
            info!("Re-authenticated, resuming replay");
            gate.auth_paused = false;
        }
    }

    /// Applies a published connectivity transition.
    ///
    /// A restore with a newer generation than the one a backoff was
    /// scheduled under clears the backoff.
    pub fn on_connectivity_transition(&self, transition: &ConnectivityTransition) {
        if !transition.is_restored() {
            return;
        }
        let mut gate = self.gate.lock();
        if let Some(backoff) = gate.backoff {
            if transition.generation > backoff.generation {
                debug!(generation = transition.generation, "Connectivity restored, clearing backoff");
                gate.backoff = None;
            }
        }
    }

    /// Checks a backend previously marked unreachable.
    ///
    /// Returns true if the backend answered.
    pub async fn probe(&self) -> bool {
        if !self.monitor.needs_probe() {
            return self.monitor.is_online();
        }
        let result = match tokio::time::timeout(self.dispatch_timeout, self.dispatcher.probe()).await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout),
        };
        match result {
            Ok(()) => {
                debug!("Backend probe succeeded");
                self.monitor.record_backend_reachable();
                true
            }
            Err(err) => {
                debug!(error = %err, "Backend probe failed");
                false
            }
        }
    }

    /// Drains the queue.
    ///
    /// Safe to call at any time from any trigger; a call made while a drain
    /// is running returns [`DrainOutcome::AlreadyRunning`] immediately.
    pub async fn drive(&self) -> DrainReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return DrainReport::new(DrainOutcome::AlreadyRunning);
        }
        let _guard = RunningGuard {
            running: &self.running,
            stop_requested: &self.stop_requested,
        };

        if let Some(outcome) = self.gate_closed() {
            return DrainReport::new(outcome);
        }

        self.stats.lock().drains_started += 1;
        let mut report = DrainReport::new(DrainOutcome::Drained);

        loop {
            if self.stop_requested.load(Ordering::Acquire) {
                report.outcome = DrainOutcome::Stopped;
                break;
            }
            let Some(op) = self.queue.peek_next() else {
                report.outcome = DrainOutcome::Drained;
                break;
            };
            if !self.monitor.is_online() {
                report.outcome = DrainOutcome::Offline;
                break;
            }
            if !self.auth.is_authenticated() {
                self.pause_for_auth();
                report.outcome = DrainOutcome::AuthPaused;
                break;
            }

            match self.replay(op, &mut report).await {
                Ok(None) => continue,
                Ok(Some(outcome)) => {
                    report.outcome = outcome;
                    break;
                }
                Err(err) => {
                    error!(error = %err, "Replay could not record progress");
                    self.stats.lock().last_error = Some(err.to_string());
                    report.outcome = DrainOutcome::StorageFailed;
                    break;
                }
            }
        }

        debug!(
            synced = report.synced,
            failed_permanent = report.failed_permanent,
            held = report.held,
            outcome = ?report.outcome,
            "Drain finished"
        );
        report
    }

    fn gate_closed(&self) -> Option<DrainOutcome> {
        let mut gate = self.gate.lock();
        if gate.auth_paused {
            return Some(DrainOutcome::AuthPaused);
        }
        if let Some(backoff) = gate.backoff {
            let now = Instant::now();
            if now < backoff.until {
                return Some(DrainOutcome::BackingOff {
                    remaining: backoff.until - now,
                });
            }
            gate.backoff = None;
        }
        None
    }

    fn pause_for_auth(&self) {
        let mut gate = self.gate.lock();
        if !gate.auth_paused {
            warn!("Authentication required, pausing replay");
            gate.auth_paused = true;
            self.stats.lock().auth_pauses += 1;
        }
    }

    /// Replays one entry. Returns an outcome if the drain must stop.
    async fn replay(
        &self,
        op: PendingOperation,
        report: &mut DrainReport,
    ) -> SyncResult<Option<DrainOutcome>> {
        if let Some(predecessor) = op.depends_on.filter(|dep| self.queue.predecessor_failed(*dep)) {
            warn!(id = %op.id, kind = %op.kind, %predecessor, "Holding operation, predecessor failed");
            let (_, held) = self.queue.fail_and_hold(
                op.id,
                LastError::new(
                    FailureClass::DependencyFailed,
                    format!("depends on {predecessor}, which failed permanently"),
                    system_clock_ms(),
                ),
            )?;
            report.held += 1 + held;
            self.stats.lock().permanent_failures += 1 + held as u64;
            return Ok(None);
        }

        let op = self.queue.mark_in_flight(op.id)?;
        debug!(id = %op.id, kind = %op.kind, attempt = op.attempt, "Replaying operation");

        let result = match tokio::time::timeout(
            self.dispatch_timeout,
            self.dispatcher.dispatch(op.kind, &op.payload, &op.id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout),
        };

        let err = match result {
            Ok(_) => {
                self.monitor.record_backend_reachable();
                self.queue.mark_synced(op.id)?;
                report.synced += 1;
                self.stats.lock().operations_synced += 1;
                info!(id = %op.id, kind = %op.kind, attempt = op.attempt, "Operation synced");
                return Ok(None);
            }
            Err(err) => err,
        };

        self.stats.lock().last_error = Some(err.to_string());
        let last_error = LastError::new(err.class(), err.to_string(), system_clock_ms());

        match err.class() {
            FailureClass::Transient => {
                if err.is_unreachable() {
                    self.monitor.record_backend_unreachable();
                } else if !matches!(err, DispatchError::Timeout) {
                    self.monitor.record_backend_reachable();
                }
                self.queue.mark_failed_transient(op.id, last_error)?;
                self.stats.lock().transient_failures += 1;

                let delay = self.retry.delay_for_attempt(op.attempt);
                self.gate.lock().backoff = Some(Backoff {
                    until: Instant::now() + delay,
                    generation: self.monitor.generation(),
                });
                warn!(
                    id = %op.id,
                    kind = %op.kind,
                    attempt = op.attempt,
                    error = %err,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Transient failure, retry scheduled"
                );
                Ok(Some(DrainOutcome::RetryScheduled { delay }))
            }
            FailureClass::AuthRequired => {
                self.monitor.record_backend_reachable();
                self.queue.mark_failed_transient(op.id, last_error)?;
                self.pause_for_auth();
                Ok(Some(DrainOutcome::AuthPaused))
            }
            FailureClass::Permanent | FailureClass::Conflict | FailureClass::DependencyFailed => {
                self.monitor.record_backend_reachable();
                let (_, held) = self.queue.fail_and_hold(op.id, last_error)?;
                report.failed_permanent += 1;
                report.held += held;
                self.stats.lock().permanent_failures += 1 + held as u64;
                warn!(id = %op.id, kind = %op.kind, error = %err, held, "Operation failed permanently");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionAuth;
    use crate::config::ConnectivityConfig;
    use crate::store::BackendQueueStore;
    use crate::transport::MockDispatcher;
    use clinisync_protocol::{OperationId, OperationKind, OperationStatus};
    use clinisync_storage::InMemoryBackend;
    use serde_json::json;

    struct Harness {
        backend: InMemoryBackend,
        queue: Arc<OperationQueue>,
        monitor: Arc<ConnectivityMonitor>,
        dispatcher: Arc<MockDispatcher>,
        auth: Arc<SessionAuth>,
        coordinator: SyncCoordinator,
    }

    fn harness() -> Harness {
        let backend = InMemoryBackend::new();
        let queue = Arc::new(
            OperationQueue::open(Box::new(BackendQueueStore::new(backend.clone()))).unwrap(),
        );
        let monitor = Arc::new(ConnectivityMonitor::new(
            &ConnectivityConfig::new(Duration::ZERO).with_initially_online(true),
        ));
        let dispatcher = Arc::new(MockDispatcher::new());
        let auth = Arc::new(SessionAuth::signed_in());
        let retry = RetryConfig::new(Duration::from_secs(1), Duration::from_secs(8)).with_jitter(false);
        let coordinator = SyncCoordinator::new(
            queue.clone(),
            monitor.clone(),
            dispatcher.clone(),
            auth.clone(),
            retry,
            Duration::from_secs(10),
        );
        Harness {
            backend,
            queue,
            monitor,
            dispatcher,
            auth,
            coordinator,
        }
    }

    fn enqueue(h: &Harness, kind: OperationKind) -> OperationId {
        h.queue.enqueue(kind, json!({"employee_id": 1})).unwrap()
    }

    #[tokio::test]
    async fn drains_in_enqueue_order() {
        let h = harness();
        let ids = [
            enqueue(&h, OperationKind::ClockIn),
            enqueue(&h, OperationKind::SaleCreate),
            enqueue(&h, OperationKind::ClockOut),
        ];

        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(report.synced, 3);
        assert!(h.queue.is_empty());

        let keys: Vec<_> = h.dispatcher.calls().iter().map(|c| c.key).collect();
        assert_eq!(keys, ids);
        assert_eq!(h.coordinator.stats().operations_synced, 3);
    }

    #[tokio::test]
    async fn offline_drain_dispatches_nothing() {
        let h = harness();
        enqueue(&h, OperationKind::ClockIn);
        h.monitor.set_link_up(false);

        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::Offline);
        assert_eq!(h.dispatcher.call_count(), 0);
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_stops_drain_and_backs_off() {
        let h = harness();
        let first = enqueue(&h, OperationKind::ClockIn);
        enqueue(&h, OperationKind::ClockOut);
        h.dispatcher.push_response(Err(DispatchError::Unavailable {
            status: 503,
            message: "maintenance".into(),
        }));

        let report = h.coordinator.drive().await;
        assert_eq!(
            report.outcome,
            DrainOutcome::RetryScheduled {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(h.dispatcher.call_count(), 1);
        let op = h.queue.get(first).unwrap();
        assert_eq!(op.status, OperationStatus::FailedTransient);
        assert_eq!(op.last_error.unwrap().class, FailureClass::Transient);

        let report = h.coordinator.drive().await;
        assert!(matches!(report.outcome, DrainOutcome::BackingOff { .. }));
        assert_eq!(h.dispatcher.call_count(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(report.synced, 2);
        assert_eq!(h.dispatcher.calls()[1].key, first);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_up_to_cap() {
        let h = harness();
        enqueue(&h, OperationKind::SaleCreate);
        h.dispatcher.push_failures(DispatchError::Timeout, 5);

        let mut delays = Vec::new();
        for _ in 0..5 {
            let report = h.coordinator.drive().await;
            let DrainOutcome::RetryScheduled { delay } = report.outcome else {
                panic!("unexpected outcome {:?}", report.outcome);
            };
            delays.push(delay.as_secs());
            tokio::time::advance(delay).await;
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 8]);

        let report = h.coordinator.drive().await;
        assert_eq!(report.synced, 1);
        assert_eq!(h.coordinator.stats().transient_failures, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_timeout_is_transient() {
        let h = harness();
        let id = enqueue(&h, OperationKind::ClockIn);
        h.dispatcher.set_delay(Some(Duration::from_secs(60)));

        let report = h.coordinator.drive().await;
        assert!(matches!(report.outcome, DrainOutcome::RetryScheduled { .. }));
        let op = h.queue.get(id).unwrap();
        assert_eq!(op.status, OperationStatus::FailedTransient);
        assert!(op.last_error.unwrap().message.contains("timed out"));
        // A timeout alone does not mark the backend unreachable.
        assert!(h.monitor.is_online());
    }

    #[tokio::test]
    async fn unreachable_marks_monitor_offline() {
        let h = harness();
        enqueue(&h, OperationKind::ClockIn);
        h.dispatcher
            .push_response(Err(DispatchError::Unreachable("connection refused".into())));

        h.coordinator.drive().await;
        assert!(!h.monitor.is_online());
        assert!(h.monitor.needs_probe());

        assert!(h.coordinator.probe().await);
        // Zero debounce: the probe publishes online at once.
        assert!(h.monitor.is_online());
    }

    #[tokio::test]
    async fn restored_connectivity_clears_backoff() {
        let h = harness();
        enqueue(&h, OperationKind::ClockIn);
        h.dispatcher
            .push_response(Err(DispatchError::Unreachable("no route".into())));
        let mut transitions = h.monitor.subscribe();

        h.coordinator.drive().await;
        assert!(h.coordinator.backoff_deadline().is_some());
        assert!(!transitions.recv().await.unwrap().to);

        h.monitor.record_backend_reachable();
        let restored = transitions.recv().await.unwrap();
        h.coordinator.on_connectivity_transition(&restored);
        assert!(h.coordinator.backoff_deadline().is_none());

        let report = h.coordinator.drive().await;
        assert_eq!(report.synced, 1);
    }

    #[tokio::test]
    async fn permanent_failure_does_not_block_others() {
        let h = harness();
        let bad = enqueue(&h, OperationKind::PatientRegister);
        let good = enqueue(&h, OperationKind::ClockIn);
        h.dispatcher
            .push_response(Err(DispatchError::Rejected("name is required".into())));

        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(report.failed_permanent, 1);
        assert_eq!(report.synced, 1);

        let list = h.queue.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, bad);
        assert_eq!(list[0].status, OperationStatus::FailedPermanent);
        assert_eq!(h.dispatcher.calls()[1].key, good);

        // Never retried automatically.
        let report = h.coordinator.drive().await;
        assert_eq!(report.synced, 0);
        assert_eq!(h.dispatcher.call_count(), 2);
    }

    #[tokio::test]
    async fn dependents_of_failed_entry_are_held() {
        let h = harness();
        let patient = enqueue(&h, OperationKind::PatientRegister);
        let sale = h
            .queue
            .enqueue_with(OperationId::new(), OperationKind::SaleCreate, json!({}), Some(patient))
            .unwrap();
        let receipt = h
            .queue
            .enqueue_with(OperationId::new(), OperationKind::InventoryAdjust, json!({}), Some(sale))
            .unwrap();
        let unrelated = enqueue(&h, OperationKind::ClockIn);
        h.dispatcher
            .push_response(Err(DispatchError::Conflict("duplicate patient".into())));

        let report = h.coordinator.drive().await;
        assert_eq!(report.failed_permanent, 1);
        assert_eq!(report.held, 2);
        assert_eq!(report.synced, 1);

        let calls: Vec<_> = h.dispatcher.calls().iter().map(|c| c.key).collect();
        assert_eq!(calls, vec![patient, unrelated]);
        for id in [sale, receipt] {
            let op = h.queue.get(id).unwrap();
            assert_eq!(op.status, OperationStatus::FailedPermanent);
            assert_eq!(op.last_error.unwrap().class, FailureClass::DependencyFailed);
        }
    }

    #[tokio::test]
    async fn auth_failure_pauses_until_reauth() {
        let h = harness();
        let id = enqueue(&h, OperationKind::ClockIn);
        h.dispatcher.push_response(Err(DispatchError::AuthRequired));

        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::AuthPaused);
        assert!(h.coordinator.is_auth_paused());
        assert!(h.coordinator.backoff_deadline().is_none());
        assert_eq!(h.queue.get(id).unwrap().status, OperationStatus::FailedTransient);

        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::AuthPaused);
        assert_eq!(h.dispatcher.call_count(), 1);

        h.coordinator.resume_after_reauth();
        let report = h.coordinator.drive().await;
        assert_eq!(report.synced, 1);
        assert_eq!(h.coordinator.stats().auth_pauses, 1);
    }

    #[tokio::test]
    async fn signed_out_session_pauses_without_dispatch() {
        let h = harness();
        enqueue(&h, OperationKind::ClockIn);
        h.auth.sign_out();

        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::AuthPaused);
        assert_eq!(h.dispatcher.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_drive_is_single_flight() {
        let h = harness();
        enqueue(&h, OperationKind::ClockIn);
        h.dispatcher.set_delay(Some(Duration::from_secs(1)));

        let (a, b) = tokio::join!(h.coordinator.drive(), h.coordinator.drive());
        assert_eq!(a.synced, 1);
        assert_eq!(b.outcome, DrainOutcome::AlreadyRunning);
        assert_eq!(h.dispatcher.call_count(), 1);
        assert!(!h.coordinator.is_running());
    }

    #[tokio::test]
    async fn stop_request_ends_drain_before_next_dispatch() {
        let h = harness();
        enqueue(&h, OperationKind::ClockIn);
        h.coordinator.request_stop();

        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::Stopped);
        assert_eq!(h.dispatcher.call_count(), 0);
        assert_eq!(h.queue.len(), 1);

        // The request applied to that drain only.
        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(report.synced, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_dispatch_does_not_outlive_the_drain() {
        let h = harness();
        let first = enqueue(&h, OperationKind::ClockIn);
        let second = enqueue(&h, OperationKind::ClockOut);
        h.dispatcher.set_delay(Some(Duration::from_secs(1)));

        let stop = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            h.coordinator.request_stop();
        };
        let (report, ()) = tokio::join!(h.coordinator.drive(), stop);
        assert_eq!(report.outcome, DrainOutcome::Stopped);
        assert_eq!(report.synced, 1);
        assert!(h.queue.get(first).is_none());

        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(report.synced, 1);
        assert!(h.queue.get(second).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dependent_stays_held_after_predecessor_is_discarded() {
        let h = harness();
        let patient = enqueue(&h, OperationKind::PatientRegister);
        let clock_in = enqueue(&h, OperationKind::ClockIn);
        let sale = h
            .queue
            .enqueue_with(OperationId::new(), OperationKind::SaleCreate, json!({}), Some(patient))
            .unwrap();
        h.dispatcher
            .push_response(Err(DispatchError::Conflict("duplicate patient".into())));
        h.dispatcher.push_response(Err(DispatchError::Unavailable {
            status: 503,
            message: "maintenance".into(),
        }));

        // The drain stops at the clock-in, before reaching the sale.
        let report = h.coordinator.drive().await;
        assert_eq!(report.failed_permanent, 1);
        assert_eq!(report.held, 1);
        assert!(matches!(report.outcome, DrainOutcome::RetryScheduled { .. }));
        assert_eq!(h.queue.get(sale).unwrap().status, OperationStatus::FailedPermanent);

        h.queue.discard(patient).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let report = h.coordinator.drive().await;
        assert_eq!(report.synced, 1);

        let calls: Vec<_> = h.dispatcher.calls().iter().map(|c| c.key).collect();
        assert_eq!(calls, vec![patient, clock_in, clock_in]);
        let held = h.queue.get(sale).unwrap();
        assert_eq!(held.status, OperationStatus::FailedPermanent);
        assert_eq!(held.last_error.unwrap().class, FailureClass::DependencyFailed);
    }

    #[tokio::test]
    async fn storage_failure_stops_drain() {
        let h = harness();
        let id = enqueue(&h, OperationKind::ClockIn);
        h.backend.fail_next_writes(1);

        let report = h.coordinator.drive().await;
        assert_eq!(report.outcome, DrainOutcome::StorageFailed);
        assert_eq!(h.dispatcher.call_count(), 0);
        assert_eq!(h.queue.get(id).unwrap().status, OperationStatus::Queued);
        assert!(h.queue.is_halted());
    }
}
