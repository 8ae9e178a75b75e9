//! Connectivity monitor.
//!
//! Reachability is layered from two signals:
//!
//! - the platform link flag (network interface present), and
//! - a backend watermark fed by request outcomes, because a live link does
//!   not guarantee the backend answers.
//!
//! The raw signal is `link_up && backend_reachable`. Going offline is
//! published immediately; coming online is published only once the raw
//! signal has been stable for the debounce window, so flaky links do not
//! trigger replay storms.
//!
//! ```text
//!            raw offline (immediate)
//!   Online ─────────────────────────→ Offline
//!     ↑                                  │ raw online
//!     │    stable for `debounce`         ↓
//!     └──────────────────────────── PendingOnline
//! ```

use crate::config::ConnectivityConfig;
use clinisync_protocol::{ConnectivityState, ConnectivityTransition};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Capacity of the transition broadcast channel.
const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Pure connectivity state machine driven by explicit instants.
#[derive(Debug, Clone)]
pub struct ConnectivityMachine {
    debounce: Duration,
    link_up: bool,
    backend_reachable: bool,
    published: bool,
    generation: u64,
    published_generation: u64,
    online_since: Option<Instant>,
}

impl ConnectivityMachine {
    /// Creates a machine, optionally starting online.
    pub fn new(debounce: Duration, initially_online: bool) -> Self {
        Self {
            debounce,
            link_up: initially_online,
            backend_reachable: true,
            published: initially_online,
            generation: 0,
            published_generation: 0,
            online_since: None,
        }
    }

    fn raw_online(&self) -> bool {
        self.link_up && self.backend_reachable
    }

    /// Updates the platform link flag.
    pub fn set_link_up(&mut self, up: bool, now: Instant) -> Option<ConnectivityTransition> {
        let backend = self.backend_reachable;
        self.update(up, backend, now)
    }

    /// Records that a request reached the backend.
    pub fn record_backend_reachable(&mut self, now: Instant) -> Option<ConnectivityTransition> {
        let link = self.link_up;
        self.update(link, true, now)
    }

    /// Records that a request could not reach the backend.
    pub fn record_backend_unreachable(&mut self, now: Instant) -> Option<ConnectivityTransition> {
        let link = self.link_up;
        self.update(link, false, now)
    }

    fn update(
        &mut self,
        link_up: bool,
        backend_reachable: bool,
        now: Instant,
    ) -> Option<ConnectivityTransition> {
        let before = self.raw_online();
        self.link_up = link_up;
        self.backend_reachable = backend_reachable;
        let after = self.raw_online();

        if before == after {
            return None;
        }
        self.generation += 1;

        if after {
            self.online_since = Some(now);
            self.settle(now)
        } else {
            self.online_since = None;
            if self.published {
                Some(self.publish(false))
            } else {
                None
            }
        }
    }

    /// Publishes a pending online transition once the debounce window passed.
    pub fn settle(&mut self, now: Instant) -> Option<ConnectivityTransition> {
        let since = self.online_since?;
        if now.saturating_duration_since(since) < self.debounce {
            return None;
        }
        self.online_since = None;
        if self.published {
            return None;
        }
        Some(self.publish(true))
    }

    fn publish(&mut self, online: bool) -> ConnectivityTransition {
        let from = self.published;
        self.published = online;
        self.published_generation = self.generation;
        ConnectivityTransition {
            from,
            to: online,
            generation: self.generation,
        }
    }

    /// Returns when a pending online transition may be published.
    pub fn pending_online_deadline(&self) -> Option<Instant> {
        self.online_since.map(|since| since + self.debounce)
    }

    /// Returns the published state.
    pub fn state(&self) -> ConnectivityState {
        ConnectivityState {
            online: self.published,
            generation: self.published_generation,
        }
    }

    /// Returns the raw transition counter.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the platform link flag.
    pub fn link_up(&self) -> bool {
        self.link_up
    }

    /// Returns the backend watermark.
    pub fn backend_reachable(&self) -> bool {
        self.backend_reachable
    }
}

/// Thread-safe connectivity monitor publishing transitions.
///
/// The monitor only notifies; it never touches the queue.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    machine: Mutex<ConnectivityMachine>,
    state_tx: watch::Sender<ConnectivityState>,
    transitions: broadcast::Sender<ConnectivityTransition>,
    changed: Notify,
}

impl ConnectivityMonitor {
    /// Creates a monitor from configuration.
    pub fn new(config: &ConnectivityConfig) -> Self {
        let machine = ConnectivityMachine::new(config.debounce, config.initially_online);
        let (state_tx, _) = watch::channel(machine.state());
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            machine: Mutex::new(machine),
            state_tx,
            transitions,
            changed: Notify::new(),
        }
    }

    /// Returns whether the backend is considered reachable.
    pub fn is_online(&self) -> bool {
        self.machine.lock().state().online
    }

    /// Returns the published state.
    pub fn state(&self) -> ConnectivityState {
        self.machine.lock().state()
    }

    /// Returns the raw transition counter.
    pub fn generation(&self) -> u64 {
        self.machine.lock().generation()
    }

    /// Returns true if the link is up but the backend is marked unreachable.
    pub fn needs_probe(&self) -> bool {
        let machine = self.machine.lock();
        machine.link_up() && !machine.backend_reachable()
    }

    /// Subscribes to published transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityTransition> {
        self.transitions.subscribe()
    }

    /// Returns a receiver that always holds the published state.
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    /// Updates the platform link flag.
    pub fn set_link_up(&self, up: bool) {
        debug!(up, "Platform link changed");
        let transition = self.machine.lock().set_link_up(up, Instant::now());
        self.after_update(transition);
    }

    /// Records that a request reached the backend.
    pub fn record_backend_reachable(&self) {
        let transition = self.machine.lock().record_backend_reachable(Instant::now());
        self.after_update(transition);
    }

    /// Records that a request could not reach the backend.
    pub fn record_backend_unreachable(&self) {
        let transition = self
            .machine
            .lock()
            .record_backend_unreachable(Instant::now());
        self.after_update(transition);
    }

    /// Publishes a pending online transition if its debounce window passed.
    pub fn settle(&self) -> Option<ConnectivityTransition> {
        let transition = self.machine.lock().settle(Instant::now());
        if let Some(t) = transition {
            self.publish(t);
        }
        transition
    }

    /// Returns when a pending online transition may be published.
    pub fn pending_online_deadline(&self) -> Option<Instant> {
        self.machine.lock().pending_online_deadline()
    }

    /// Waits until the raw signal changes.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    fn after_update(&self, transition: Option<ConnectivityTransition>) {
        if let Some(t) = transition {
            self.publish(t);
        }
        self.changed.notify_one();
    }

    fn publish(&self, transition: ConnectivityTransition) {
        if transition.to {
            info!(generation = transition.generation, "Backend reachable, now online");
        } else {
            warn!(generation = transition.generation, "Backend unreachable, now offline");
        }
        self.state_tx.send_replace(ConnectivityState {
            online: transition.to,
            generation: transition.generation,
        });
        // No subscribers is fine.
        let _ = self.transitions.send(transition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_secs(2);

    #[test]
    fn offline_is_published_immediately() {
        let now = Instant::now();
        let mut machine = ConnectivityMachine::new(DEBOUNCE, true);

        let t = machine.set_link_up(false, now).unwrap();
        assert!(t.from);
        assert!(!t.to);
        assert_eq!(t.generation, 1);
        assert!(!machine.state().online);
    }

    #[test]
    fn online_waits_for_debounce() {
        let now = Instant::now();
        let mut machine = ConnectivityMachine::new(DEBOUNCE, false);

        assert!(machine.set_link_up(true, now).is_none());
        assert_eq!(machine.pending_online_deadline(), Some(now + DEBOUNCE));
        assert!(machine.settle(now + Duration::from_secs(1)).is_none());

        let t = machine.settle(now + DEBOUNCE).unwrap();
        assert!(t.is_restored());
        assert!(machine.state().online);
        assert!(machine.pending_online_deadline().is_none());
    }

    #[test]
    fn flapping_resets_debounce_and_bumps_generation() {
        let now = Instant::now();
        let mut machine = ConnectivityMachine::new(DEBOUNCE, false);

        machine.set_link_up(true, now);
        machine.set_link_up(false, now + Duration::from_millis(500));
        machine.set_link_up(true, now + Duration::from_secs(1));
        assert_eq!(machine.generation(), 3);

        // The first rising edge would have settled here, the last one has not.
        assert!(machine.settle(now + DEBOUNCE).is_none());
        let t = machine.settle(now + Duration::from_secs(3)).unwrap();
        assert_eq!(t.generation, 3);
    }

    #[test]
    fn backend_watermark_gates_link() {
        let now = Instant::now();
        let mut machine = ConnectivityMachine::new(DEBOUNCE, true);

        let t = machine.record_backend_unreachable(now).unwrap();
        assert!(!t.to);

        // Link flaps while the backend is still unreachable: no raw change.
        assert!(machine.set_link_up(true, now).is_none());
        assert_eq!(machine.generation(), 1);

        assert!(machine.record_backend_reachable(now).is_none());
        assert!(machine.settle(now + DEBOUNCE).unwrap().to);
    }

    #[test]
    fn zero_debounce_publishes_at_once() {
        let now = Instant::now();
        let mut machine = ConnectivityMachine::new(Duration::ZERO, false);
        let t = machine.set_link_up(true, now).unwrap();
        assert!(t.to);
    }

    #[test]
    fn repeated_signal_is_ignored() {
        let now = Instant::now();
        let mut machine = ConnectivityMachine::new(DEBOUNCE, true);
        assert!(machine.set_link_up(true, now).is_none());
        assert!(machine.record_backend_reachable(now).is_none());
        assert_eq!(machine.generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_publishes_to_subscribers() {
        let monitor = ConnectivityMonitor::new(&ConnectivityConfig::new(DEBOUNCE));
        let mut transitions = monitor.subscribe();
        let state = monitor.watch();

        monitor.set_link_up(true);
        assert!(!monitor.is_online());
        assert!(monitor.settle().is_none());

        tokio::time::advance(DEBOUNCE).await;
        let t = monitor.settle().unwrap();
        assert!(t.is_restored());
        assert!(monitor.is_online());
        assert_eq!(transitions.recv().await.unwrap(), t);
        assert!(state.borrow().online);

        monitor.record_backend_unreachable();
        assert!(!monitor.is_online());
        assert!(monitor.needs_probe());
        assert!(!transitions.recv().await.unwrap().to);
    }
}
