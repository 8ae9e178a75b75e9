//! Failure classification recorded on pending operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failed replay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Timeout, 5xx-class response or reachability lost mid-call.
    Transient,
    /// Payload rejected as invalid.
    Permanent,
    /// Server state is incompatible with the queued intent.
    Conflict,
    /// The session must be re-established before replay can continue.
    AuthRequired,
    /// Held because a causal predecessor failed permanently.
    DependencyFailed,
}

impl FailureClass {
    /// Returns the wire name of the class.
    pub fn name(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
            FailureClass::Conflict => "conflict",
            FailureClass::AuthRequired => "auth_required",
            FailureClass::DependencyFailed => "dependency_failed",
        }
    }

    /// Returns true if the failure needs manual resolution.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            FailureClass::Permanent | FailureClass::Conflict | FailureClass::DependencyFailed
        )
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Last failure observed for a pending operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    /// Failure classification.
    pub class: FailureClass,
    /// Human-readable detail, as reported by the backend or transport.
    pub message: String,
    /// When the failure was recorded (Unix millis).
    pub at_ms: u64,
}

impl LastError {
    /// Creates a new failure record.
    pub fn new(class: FailureClass, message: impl Into<String>, at_ms: u64) -> Self {
        Self {
            class,
            message: message.into(),
            at_ms,
        }
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}
