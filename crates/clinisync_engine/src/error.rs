//! Error types for the sync engine.

use clinisync_protocol::{CodecError, FailureClass, OperationId, OperationStatus};
use clinisync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the engine to its callers.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network-level failure that will be retried automatically.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The backend rejected the payload as invalid.
    #[error("rejected by server: {0}")]
    PermanentValidation(String),

    /// Server state is incompatible with the requested action.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The session must be re-established.
    #[error("authentication required")]
    AuthRequired,

    /// The durable store could not be written or read.
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// The persisted queue image could not be decoded.
    #[error("corrupted queue image: {0}")]
    Codec(#[from] CodecError),

    /// The queue refuses new work after a persistence failure.
    #[error("queue halted after a persistence failure")]
    Halted,

    /// The operation is not in a state that allows the request.
    #[error("operation {id} is {status}, cannot {action}")]
    InvalidState {
        /// Operation id.
        id: OperationId,
        /// Current status.
        status: OperationStatus,
        /// Attempted action.
        action: &'static str,
    },

    /// No queued operation has the given id.
    #[error("operation {0} not found")]
    NotFound(OperationId),

    /// An operation with the same id is already queued.
    #[error("operation {0} is already queued")]
    DuplicateOperation(OperationId),
}

impl SyncError {
    /// Returns true if this error is retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// Returns true if the error means the local durable store is unusable.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Persistence(_) | SyncError::Codec(_) | SyncError::Halted
        )
    }
}

/// Failure returned by the request interface for a single dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The backend could not be reached at all.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete within the dispatch timeout.
    #[error("request timed out")]
    Timeout,

    /// 5xx-class or throttling response; the server may recover.
    #[error("server unavailable ({status}): {message}")]
    Unavailable {
        /// HTTP status code.
        status: u16,
        /// Response detail.
        message: String,
    },

    /// The payload was rejected as invalid.
    #[error("rejected: {0}")]
    Rejected(String),

    /// A business rule conflict, e.g. "already clocked in".
    #[error("conflict: {0}")]
    Conflict(String),

    /// The session is missing or expired.
    #[error("authentication required")]
    AuthRequired,
}

impl DispatchError {
    /// Classifies the failure for the coordinator.
    pub fn class(&self) -> FailureClass {
        match self {
            DispatchError::Unreachable(_)
            | DispatchError::Timeout
            | DispatchError::Unavailable { .. } => FailureClass::Transient,
            DispatchError::Rejected(_) => FailureClass::Permanent,
            DispatchError::Conflict(_) => FailureClass::Conflict,
            DispatchError::AuthRequired => FailureClass::AuthRequired,
        }
    }

    /// Returns true if the failure says the backend can not be reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DispatchError::Unreachable(_))
    }

    /// Returns true if the request may or may not have been applied.
    ///
    /// Such requests must be replayed under the same idempotency key.
    pub fn outcome_unknown(&self) -> bool {
        matches!(
            self,
            DispatchError::Unreachable(_) | DispatchError::Timeout | DispatchError::Unavailable { .. }
        )
    }
}

impl From<DispatchError> for SyncError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Unreachable(_) | DispatchError::Timeout | DispatchError::Unavailable { .. } => {
                SyncError::TransientNetwork(err.to_string())
            }
            DispatchError::Rejected(message) => SyncError::PermanentValidation(message),
            DispatchError::Conflict(message) => SyncError::Conflict(message),
            DispatchError::AuthRequired => SyncError::AuthRequired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_classification() {
        assert_eq!(
            DispatchError::Unreachable("dns".into()).class(),
            FailureClass::Transient
        );
        assert_eq!(DispatchError::Timeout.class(), FailureClass::Transient);
        assert_eq!(
            DispatchError::Unavailable {
                status: 503,
                message: "maintenance".into()
            }
            .class(),
            FailureClass::Transient
        );
        assert_eq!(
            DispatchError::Rejected("missing name".into()).class(),
            FailureClass::Permanent
        );
        assert_eq!(
            DispatchError::Conflict("already clocked in".into()).class(),
            FailureClass::Conflict
        );
        assert_eq!(DispatchError::AuthRequired.class(), FailureClass::AuthRequired);
    }

    #[test]
    fn dispatch_into_sync_error() {
        assert!(SyncError::from(DispatchError::Timeout).is_retryable());
        assert!(matches!(
            SyncError::from(DispatchError::Conflict("x".into())),
            SyncError::Conflict(_)
        ));
        assert!(matches!(
            SyncError::from(DispatchError::AuthRequired),
            SyncError::AuthRequired
        ));
    }

    #[test]
    fn error_display() {
        let id = OperationId::new();
        let err = SyncError::InvalidState {
            id,
            status: OperationStatus::Queued,
            action: "discard",
        };
        assert!(err.to_string().contains("queued"));
        assert!(err.to_string().contains("discard"));
        assert!(SyncError::Halted.is_persistence_failure());
        assert!(!SyncError::NotFound(id).is_persistence_failure());
    }
}
