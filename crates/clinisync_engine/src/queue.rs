//! Persistent operation queue.
//!
//! The queue is the only shared mutable resource of the engine. Every
//! mutation builds the next entry list, saves it through the
//! [`QueueStore`], and only then swaps it in, so the in-memory state never
//! runs ahead of what is durable.
//!
//! A failed save halts the queue: all further mutations fail with
//! [`SyncError::Halted`] until the process restarts and reloads.
//!
//! An entry that fails permanently takes every replayable entry that
//! depends on it, directly or transitively, to `failed_permanent` with a
//! `DependencyFailed` error in the same save. Entries enqueued later against
//! a failed or discarded predecessor start out held.

use crate::error::{SyncError, SyncResult};
use crate::store::QueueStore;
use clinisync_protocol::{
    FailureClass, LastError, OperationId, OperationKind, OperationStatus, PendingOperation,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Source of wall-clock time in Unix milliseconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Returns the system wall-clock time in Unix milliseconds.
pub fn system_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Cached queue counters, adjusted by every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueCounts {
    /// Every entry still held.
    pub total: usize,
    /// Entries waiting for replay (queued or failed transiently).
    pub replayable: usize,
    /// Entries currently being dispatched.
    pub in_flight: usize,
    /// Entries that need manual resolution.
    pub failed_permanent: usize,
    /// Whether the durable store failed.
    pub persistence_failed: bool,
}

impl QueueCounts {
    /// Counts a freshly loaded entry list.
    fn from_entries(entries: &[PendingOperation]) -> Self {
        let mut counts = QueueCounts::default();
        for op in entries {
            counts.record(None, Some(op.status));
        }
        counts
    }

    /// Moves one entry between buckets. `None` on the left is an insert,
    /// `None` on the right a removal.
    fn record(&mut self, from: Option<OperationStatus>, to: Option<OperationStatus>) {
        if let Some(count) = from.and_then(|status| self.bucket(status)) {
            *count = count.saturating_sub(1);
        }
        if let Some(count) = to.and_then(|status| self.bucket(status)) {
            *count += 1;
        }
        match (from, to) {
            (None, Some(_)) => self.total += 1,
            (Some(_), None) => self.total = self.total.saturating_sub(1),
            _ => {}
        }
    }

    fn bucket(&mut self, status: OperationStatus) -> Option<&mut usize> {
        match status {
            OperationStatus::Queued | OperationStatus::FailedTransient => Some(&mut self.replayable),
            OperationStatus::InFlight => Some(&mut self.in_flight),
            OperationStatus::FailedPermanent => Some(&mut self.failed_permanent),
            OperationStatus::Synced => None,
        }
    }
}

struct QueueState {
    entries: Vec<PendingOperation>,
    store: Box<dyn QueueStore>,
    next_sequence: u64,
    last_created_at_ms: u64,
    halted: bool,
    // Discarded this session; dependents naming them are held.
    discarded: HashSet<OperationId>,
}

/// Durable, ordered store of not-yet-confirmed operations.
pub struct OperationQueue {
    state: Mutex<QueueState>,
    counts: watch::Sender<QueueCounts>,
    clock: Clock,
}

impl fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("counts", &*self.counts.borrow())
            .finish_non_exhaustive()
    }
}

impl OperationQueue {
    /// Loads the previous session's entries from `store`.
    pub fn open(store: Box<dyn QueueStore>) -> SyncResult<Self> {
        Self::open_with_clock(store, Arc::new(system_clock_ms))
    }

    /// Loads the queue using a custom wall clock.
    pub fn open_with_clock(store: Box<dyn QueueStore>, clock: Clock) -> SyncResult<Self> {
        let mut entries = store.load()?;

        let mut interrupted = 0;
        for op in entries
            .iter_mut()
            .filter(|op| op.status == OperationStatus::InFlight)
        {
            op.status = OperationStatus::Queued;
            interrupted += 1;
        }
        // Synced entries are never saved, but an image written by hand may hold them.
        entries.retain(|op| op.status != OperationStatus::Synced);
        entries.sort_by_key(PendingOperation::order_key);

        if interrupted > 0 {
            warn!(interrupted, "Operations were in flight at shutdown, requeued for replay");
        }

        let next_sequence = entries.iter().map(|op| op.sequence + 1).max().unwrap_or(0);
        let last_created_at_ms = entries.iter().map(|op| op.created_at_ms).max().unwrap_or(0);

        info!(entries = entries.len(), "Operation queue loaded");

        let (counts_tx, _) = watch::channel(QueueCounts::from_entries(&entries));

        Ok(Self {
            state: Mutex::new(QueueState {
                entries,
                store,
                next_sequence,
                last_created_at_ms,
                halted: false,
                discarded: HashSet::new(),
            }),
            counts: counts_tx,
            clock,
        })
    }

    /// Appends a new operation and returns its id.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        payload: serde_json::Value,
    ) -> SyncResult<OperationId> {
        self.enqueue_with(OperationId::new(), kind, payload, None)
    }

    /// Appends an operation with a caller-chosen id and optional causal
    /// predecessor.
    ///
    /// If the predecessor already failed permanently or was discarded, the
    /// entry is stored held instead of queued.
    pub fn enqueue_with(
        &self,
        id: OperationId,
        kind: OperationKind,
        payload: serde_json::Value,
        depends_on: Option<OperationId>,
    ) -> SyncResult<OperationId> {
        let mut state = self.state.lock();
        if state.halted {
            return Err(SyncError::Halted);
        }
        if state.entries.iter().any(|op| op.id == id) {
            return Err(SyncError::DuplicateOperation(id));
        }

        let created_at_ms = (self.clock)().max(state.last_created_at_ms);
        let sequence = state.next_sequence;

        let mut op = PendingOperation::new(id, kind, payload, created_at_ms, sequence);
        op.depends_on = depends_on;
        if let Some(predecessor) = depends_on.filter(|dep| predecessor_failed(&state, *dep)) {
            op.status = OperationStatus::FailedPermanent;
            op.last_error = Some(dependency_error(predecessor, created_at_ms));
            warn!(%id, %kind, %predecessor, "Predecessor already failed, operation held");
        }

        let mut counts = self.counts();
        counts.record(None, Some(op.status));
        let mut next = state.entries.clone();
        next.push(op);
        self.commit(&mut state, next, counts)?;

        state.next_sequence = sequence + 1;
        state.last_created_at_ms = created_at_ms;

        debug!(%id, %kind, sequence, "Operation enqueued");
        Ok(id)
    }

    /// Returns the oldest entry eligible for replay.
    pub fn peek_next(&self) -> Option<PendingOperation> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|op| op.status.is_replayable())
            .cloned()
    }

    /// Marks an entry as being dispatched and counts the attempt.
    pub fn mark_in_flight(&self, id: OperationId) -> SyncResult<PendingOperation> {
        let mut state = self.state.lock();
        if let Some(other) = state
            .entries
            .iter()
            .find(|op| op.status == OperationStatus::InFlight && op.id != id)
        {
            warn!(id = %other.id, "Another operation is already in flight");
            return Err(SyncError::InvalidState {
                id,
                status: lookup(&state.entries, id)?.status,
                action: "dispatch while another operation is in flight",
            });
        }

        self.transition(&mut state, id, OperationStatus::InFlight, "dispatch", |op| {
            op.attempt = op.attempt.saturating_add(1);
        })
    }

    /// Removes a confirmed entry.
    pub fn mark_synced(&self, id: OperationId) -> SyncResult<PendingOperation> {
        let mut state = self.state.lock();
        let index = position(&state.entries, id)?;
        let status = state.entries[index].status;
        if !status.can_transition_to(OperationStatus::Synced) {
            return Err(SyncError::InvalidState {
                id,
                status,
                action: "mark synced",
            });
        }

        let mut counts = self.counts();
        counts.record(Some(status), None);
        let mut next = state.entries.clone();
        let mut removed = next.remove(index);
        self.commit(&mut state, next, counts)?;

        removed.status = OperationStatus::Synced;
        debug!(%id, kind = %removed.kind, attempt = removed.attempt, "Operation synced");
        Ok(removed)
    }

    /// Records a transient failure; the entry stays eligible for replay.
    pub fn mark_failed_transient(
        &self,
        id: OperationId,
        error: LastError,
    ) -> SyncResult<PendingOperation> {
        let mut state = self.state.lock();
        self.transition(
            &mut state,
            id,
            OperationStatus::FailedTransient,
            "mark failed transiently",
            |op| op.last_error = Some(error),
        )
    }

    /// Records a permanent failure; the entry stays until discarded.
    ///
    /// Replayable dependents are held in the same save.
    pub fn mark_failed_permanent(
        &self,
        id: OperationId,
        error: LastError,
    ) -> SyncResult<PendingOperation> {
        self.fail_and_hold(id, error).map(|(op, _)| op)
    }

    /// Records a permanent failure and holds every replayable entry whose
    /// `depends_on` chain reaches `id`. Returns the failed entry and the
    /// number of entries held with it.
    pub fn fail_and_hold(
        &self,
        id: OperationId,
        error: LastError,
    ) -> SyncResult<(PendingOperation, usize)> {
        let mut state = self.state.lock();
        let index = position(&state.entries, id)?;
        let status = state.entries[index].status;
        if !status.can_transition_to(OperationStatus::FailedPermanent) {
            return Err(SyncError::InvalidState {
                id,
                status,
                action: "mark failed permanently",
            });
        }

        let mut counts = self.counts();
        counts.record(Some(status), Some(OperationStatus::FailedPermanent));
        let mut next = state.entries.clone();
        next[index].status = OperationStatus::FailedPermanent;
        next[index].last_error = Some(error);
        let failed = next[index].clone();
        let held = hold_dependents(&mut next, id, &mut counts, (self.clock)());
        self.commit(&mut state, next, counts)?;

        if held > 0 {
            warn!(%id, held, "Dependents of a failed operation held");
        }
        Ok((failed, held))
    }

    /// Removes a permanently failed entry.
    ///
    /// Entries that still depend on it are held in the same save, and later
    /// enqueues naming it as predecessor start out held.
    pub fn discard(&self, id: OperationId) -> SyncResult<PendingOperation> {
        let mut state = self.state.lock();
        let index = position(&state.entries, id)?;
        let status = state.entries[index].status;
        if status != OperationStatus::FailedPermanent {
            return Err(SyncError::InvalidState {
                id,
                status,
                action: "discard",
            });
        }

        let mut counts = self.counts();
        counts.record(Some(status), None);
        let mut next = state.entries.clone();
        let removed = next.remove(index);
        let held = hold_dependents(&mut next, id, &mut counts, (self.clock)());
        self.commit(&mut state, next, counts)?;
        state.discarded.insert(id);

        info!(%id, kind = %removed.kind, held, "Operation discarded");
        Ok(removed)
    }

    /// Returns true if `predecessor` failed permanently or was discarded,
    /// so entries depending on it must not replay.
    pub fn predecessor_failed(&self, predecessor: OperationId) -> bool {
        predecessor_failed(&self.state.lock(), predecessor)
    }

    /// Moves a failed entry back to `queued` with its attempt count reset.
    ///
    /// Entries held only because `id` failed are requeued with it. Returns
    /// the number of entries requeued.
    pub fn requeue(&self, id: OperationId) -> SyncResult<usize> {
        let mut state = self.state.lock();
        let index = position(&state.entries, id)?;
        let status = state.entries[index].status;
        if !matches!(
            status,
            OperationStatus::FailedPermanent | OperationStatus::FailedTransient
        ) {
            return Err(SyncError::InvalidState {
                id,
                status,
                action: "requeue",
            });
        }

        let mut released: HashSet<OperationId> = HashSet::from([id]);
        let mut counts = self.counts();
        let mut next = state.entries.clone();
        for op in &mut next {
            let held_on_released = op.status == OperationStatus::FailedPermanent
                && op
                    .last_error
                    .as_ref()
                    .is_some_and(|e| e.class == FailureClass::DependencyFailed)
                && op.depends_on.is_some_and(|dep| released.contains(&dep));
            if op.id == id || held_on_released {
                released.insert(op.id);
                counts.record(Some(op.status), Some(OperationStatus::Queued));
                op.status = OperationStatus::Queued;
                op.attempt = 0;
                op.last_error = None;
            }
        }
        self.commit(&mut state, next, counts)?;

        info!(%id, requeued = released.len(), "Operation requeued");
        Ok(released.len())
    }

    /// Returns the entry with the given id.
    pub fn get(&self, id: OperationId) -> Option<PendingOperation> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|op| op.id == id)
            .cloned()
    }

    /// Returns every entry in replay order.
    pub fn list(&self) -> Vec<PendingOperation> {
        self.state.lock().entries.clone()
    }

    /// Returns the number of entries held.
    pub fn len(&self) -> usize {
        self.counts.borrow().total
    }

    /// Returns true if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached counters.
    pub fn counts(&self) -> QueueCounts {
        *self.counts.borrow()
    }

    /// Returns a receiver of the cached counters.
    pub fn watch_counts(&self) -> watch::Receiver<QueueCounts> {
        self.counts.subscribe()
    }

    /// Returns true if a persistence failure halted the queue.
    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }

    fn transition(
        &self,
        state: &mut QueueState,
        id: OperationId,
        to: OperationStatus,
        action: &'static str,
        update: impl FnOnce(&mut PendingOperation),
    ) -> SyncResult<PendingOperation> {
        let index = position(&state.entries, id)?;
        let status = state.entries[index].status;
        if !status.can_transition_to(to) {
            return Err(SyncError::InvalidState { id, status, action });
        }

        let mut counts = self.counts();
        counts.record(Some(status), Some(to));
        let mut next = state.entries.clone();
        next[index].status = to;
        update(&mut next[index]);
        let updated = next[index].clone();
        self.commit(state, next, counts)?;
        Ok(updated)
    }

    /// Saves `next` and swaps it in together with its counters.
    fn commit(
        &self,
        state: &mut QueueState,
        next: Vec<PendingOperation>,
        counts: QueueCounts,
    ) -> SyncResult<()> {
        if state.halted {
            return Err(SyncError::Halted);
        }
        match state.store.save(&next) {
            Ok(()) => {
                state.entries = next;
                self.counts.send_replace(counts);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Queue persistence failed, halting the queue");
                state.halted = true;
                self.counts.send_modify(|counts| counts.persistence_failed = true);
                Err(err)
            }
        }
    }
}

fn predecessor_failed(state: &QueueState, predecessor: OperationId) -> bool {
    state.discarded.contains(&predecessor)
        || state
            .entries
            .iter()
            .any(|op| op.id == predecessor && op.status == OperationStatus::FailedPermanent)
}

fn dependency_error(predecessor: OperationId, at_ms: u64) -> LastError {
    LastError::new(
        FailureClass::DependencyFailed,
        format!("depends on {predecessor}, which failed permanently"),
        at_ms,
    )
}

/// Holds every replayable entry whose `depends_on` chain reaches `failed`.
///
/// Entries are in replay order and a predecessor always precedes its
/// dependents, so one forward pass reaches the whole chain.
fn hold_dependents(
    entries: &mut [PendingOperation],
    failed: OperationId,
    counts: &mut QueueCounts,
    at_ms: u64,
) -> usize {
    let mut blocked = HashSet::from([failed]);
    let mut held = 0;
    for op in entries.iter_mut() {
        let Some(predecessor) = op.depends_on.filter(|dep| blocked.contains(dep)) else {
            continue;
        };
        if op.status.is_replayable() {
            counts.record(Some(op.status), Some(OperationStatus::FailedPermanent));
            op.status = OperationStatus::FailedPermanent;
            op.last_error = Some(dependency_error(predecessor, at_ms));
            held += 1;
        }
        if op.status == OperationStatus::FailedPermanent {
            blocked.insert(op.id);
        }
    }
    held
}

fn position(entries: &[PendingOperation], id: OperationId) -> SyncResult<usize> {
    entries
        .iter()
        .position(|op| op.id == id)
        .ok_or(SyncError::NotFound(id))
}

fn lookup(entries: &[PendingOperation], id: OperationId) -> SyncResult<&PendingOperation> {
    entries
        .iter()
        .find(|op| op.id == id)
        .ok_or(SyncError::NotFound(id))
}
