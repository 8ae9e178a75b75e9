//! Pending operations and their lifecycle.

use crate::error::CodecError;
use crate::failure::LastError;
use crate::id::OperationId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of state-changing action that can be queued.
///
/// The set is closed: every kind maps to exactly one backend endpoint
/// and one payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Staff member starts a shift.
    ClockIn,
    /// Staff member ends a shift.
    ClockOut,
    /// Staff member starts a break.
    BreakStart,
    /// Staff member ends a break.
    BreakEnd,
    /// New patient record.
    PatientRegister,
    /// Update of an existing patient record.
    PatientUpdate,
    /// Point-of-sale transaction.
    SaleCreate,
    /// Manual stock adjustment.
    InventoryAdjust,
}

impl OperationKind {
    /// Every kind, in declaration order.
    pub const ALL: [OperationKind; 8] = [
        OperationKind::ClockIn,
        OperationKind::ClockOut,
        OperationKind::BreakStart,
        OperationKind::BreakEnd,
        OperationKind::PatientRegister,
        OperationKind::PatientUpdate,
        OperationKind::SaleCreate,
        OperationKind::InventoryAdjust,
    ];

    /// Returns the wire name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::ClockIn => "clock_in",
            OperationKind::ClockOut => "clock_out",
            OperationKind::BreakStart => "break_start",
            OperationKind::BreakEnd => "break_end",
            OperationKind::PatientRegister => "patient_register",
            OperationKind::PatientUpdate => "patient_update",
            OperationKind::SaleCreate => "sale_create",
            OperationKind::InventoryAdjust => "inventory_adjust",
        }
    }

    /// Returns the backend endpoint this kind is replayed against.
    pub fn endpoint(&self) -> Endpoint {
        let (method, path) = match self {
            OperationKind::ClockIn => (HttpMethod::Post, "/attendance/clock-in"),
            OperationKind::ClockOut => (HttpMethod::Post, "/attendance/clock-out"),
            OperationKind::BreakStart => (HttpMethod::Post, "/attendance/break-start"),
            OperationKind::BreakEnd => (HttpMethod::Post, "/attendance/break-end"),
            OperationKind::PatientRegister => (HttpMethod::Post, "/patients"),
            OperationKind::PatientUpdate => (HttpMethod::Put, "/patients/update"),
            OperationKind::SaleCreate => (HttpMethod::Post, "/sales"),
            OperationKind::InventoryAdjust => (HttpMethod::Post, "/inventory/adjustments"),
        };
        Endpoint { method, path }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| CodecError::invalid_value("operation kind", s))
    }
}

/// HTTP method of a backend endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// `GET`, used for health checks only.
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
}

impl HttpMethod {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

/// A backend endpoint: method plus path relative to the API base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path relative to the API base URL.
    pub path: &'static str,
}

/// Replay status of a pending operation.
///
/// ```text
/// queued ──→ in_flight ──→ synced (removed)
///    ↑           │
///    │           ├──→ failed_transient ──→ (retried as queued)
///    │           │
///    └───────────┴──→ failed_permanent (kept until discarded)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be replayed.
    Queued,
    /// Currently being dispatched.
    InFlight,
    /// Last attempt failed transiently; will be retried.
    FailedTransient,
    /// Will never be retried automatically.
    FailedPermanent,
    /// Confirmed by the backend.
    Synced,
}

impl OperationStatus {
    /// Returns the wire name of the status.
    pub fn name(&self) -> &'static str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::InFlight => "in_flight",
            OperationStatus::FailedTransient => "failed_transient",
            OperationStatus::FailedPermanent => "failed_permanent",
            OperationStatus::Synced => "synced",
        }
    }

    /// Returns true for states that are never left automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Synced | OperationStatus::FailedPermanent
        )
    }

    /// Returns true if the coordinator may pick this entry for replay.
    pub fn is_replayable(&self) -> bool {
        matches!(
            self,
            OperationStatus::Queued | OperationStatus::FailedTransient
        )
    }

    /// Returns true if `self → next` is a legal transition.
    ///
    /// `Queued → FailedPermanent` is allowed for entries held because a
    /// causal predecessor failed permanently; such entries are never
    /// dispatched.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Queued | FailedTransient, InFlight)
                | (Queued | FailedTransient, FailedPermanent)
                | (InFlight, Synced | FailedTransient | FailedPermanent)
                | (FailedTransient, Queued)
                | (FailedPermanent, Queued)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A locally queued, not-yet-confirmed state-changing action.
///
/// # Fields
///
/// - `id`: unique id, also the idempotency key on replay
/// - `kind`: which endpoint the operation replays against
/// - `payload`: request body, opaque to the queue
/// - `created_at_ms`: enqueue time (Unix millis, never decreasing)
/// - `sequence`: insertion sequence, breaks `created_at_ms` ties
/// - `attempt`: replay attempts made so far
/// - `status`: replay status
/// - `last_error`: last observed failure
/// - `depends_on`: optional causal predecessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique operation id.
    pub id: OperationId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Request body.
    pub payload: serde_json::Value,
    /// Enqueue timestamp in Unix milliseconds.
    pub created_at_ms: u64,
    /// Insertion sequence number.
    pub sequence: u64,
    /// Number of replay attempts made so far.
    pub attempt: u32,
    /// Replay status.
    pub status: OperationStatus,
    /// Last observed failure.
    #[serde(default)]
    pub last_error: Option<LastError>,
    /// Causal predecessor that must not have failed permanently.
    #[serde(default)]
    pub depends_on: Option<OperationId>,
}

impl PendingOperation {
    /// Creates a freshly queued operation.
    pub fn new(
        id: OperationId,
        kind: OperationKind,
        payload: serde_json::Value,
        created_at_ms: u64,
        sequence: u64,
    ) -> Self {
        Self {
            id,
            kind,
            payload,
            created_at_ms,
            sequence,
            attempt: 0,
            status: OperationStatus::Queued,
            last_error: None,
            depends_on: None,
        }
    }

    /// Sets the causal predecessor.
    pub fn with_depends_on(mut self, predecessor: OperationId) -> Self {
        self.depends_on = Some(predecessor);
        self
    }

    /// Returns the replay order key.
    pub fn order_key(&self) -> (u64, u64) {
        (self.created_at_ms, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_names_round_trip() {
        for kind in OperationKind::ALL {
            assert_eq!(kind.name().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("refund".parse::<OperationKind>().is_err());
    }

    #[test]
    fn kinds_map_to_distinct_endpoints() {
        let mut paths: Vec<_> = OperationKind::ALL
            .iter()
            .map(|k| k.endpoint().path)
            .collect();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(paths.len(), OperationKind::ALL.len());
        assert_eq!(OperationKind::PatientUpdate.endpoint().method, HttpMethod::Put);
    }

    #[test]
    fn status_transitions() {
        use OperationStatus::*;
        assert!(Queued.can_transition_to(InFlight));
        assert!(InFlight.can_transition_to(Synced));
        assert!(InFlight.can_transition_to(FailedTransient));
        assert!(InFlight.can_transition_to(FailedPermanent));
        assert!(FailedTransient.can_transition_to(InFlight));
        assert!(Queued.can_transition_to(FailedPermanent));

        assert!(!Queued.can_transition_to(Synced));
        assert!(!Synced.can_transition_to(Queued));
        assert!(!FailedPermanent.can_transition_to(InFlight));
        assert!(!InFlight.can_transition_to(InFlight));
    }

    #[test]
    fn status_predicates() {
        assert!(OperationStatus::Synced.is_terminal());
        assert!(OperationStatus::FailedPermanent.is_terminal());
        assert!(!OperationStatus::FailedTransient.is_terminal());

        assert!(OperationStatus::Queued.is_replayable());
        assert!(OperationStatus::FailedTransient.is_replayable());
        assert!(!OperationStatus::InFlight.is_replayable());
        assert!(!OperationStatus::FailedPermanent.is_replayable());
    }

    #[test]
    fn new_operation_is_queued() {
        let id = OperationId::new();
        let predecessor = OperationId::new();
        let op = PendingOperation::new(
            id,
            OperationKind::SaleCreate,
            json!({"total": 1250}),
            1_700_000_000_000,
            7,
        )
        .with_depends_on(predecessor);

        assert_eq!(op.status, OperationStatus::Queued);
        assert_eq!(op.attempt, 0);
        assert_eq!(op.depends_on, Some(predecessor));
        assert_eq!(op.order_key(), (1_700_000_000_000, 7));
    }
}
