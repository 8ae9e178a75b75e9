//! Request interface abstraction.

use crate::error::DispatchError;
use async_trait::async_trait;
use clinisync_protocol::{OperationId, OperationKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Successful response to a dispatched operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchAck {
    /// HTTP status code, or 200 for transports without one.
    pub status: u16,
    /// Response body.
    pub body: serde_json::Value,
}

impl DispatchAck {
    /// Creates an acknowledgement.
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    /// Creates a `200 OK` acknowledgement with an empty body.
    pub fn ok() -> Self {
        Self::new(200, serde_json::Value::Null)
    }
}

/// Sends kind-specific requests to the backend.
///
/// The same interface is used for direct requests and queued replays, so
/// the backend sees one request shape regardless of when it is sent.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    /// Dispatches one operation.
    ///
    /// `idempotency_key` is the operation id; replaying an already applied
    /// key must be a no-op on the backend.
    async fn dispatch(
        &self,
        kind: OperationKind,
        payload: &serde_json::Value,
        idempotency_key: &OperationId,
    ) -> Result<DispatchAck, DispatchError>;

    /// Cheap health check of the backend.
    async fn probe(&self) -> Result<(), DispatchError>;
}

/// A recorded call to [`MockDispatcher::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Operation kind.
    pub kind: OperationKind,
    /// Idempotency key.
    pub key: OperationId,
    /// Request body.
    pub payload: serde_json::Value,
}

/// A scripted dispatcher for testing.
///
/// Responses are consumed in order; once the script is empty every call
/// succeeds.
#[derive(Debug, Default)]
pub struct MockDispatcher {
    script: Mutex<VecDeque<Result<DispatchAck, DispatchError>>>,
    probe_result: Mutex<Option<DispatchError>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Mutex<Option<Duration>>,
}

impl MockDispatcher {
    /// Creates a dispatcher that acknowledges every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a scripted response.
    pub fn push_response(&self, response: Result<DispatchAck, DispatchError>) {
        self.script.lock().push_back(response);
    }

    /// Queues `count` copies of the same failure.
    pub fn push_failures(&self, error: DispatchError, count: usize) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(Err(error.clone()));
        }
    }

    /// Makes `probe` fail with `error`, or succeed with `None`.
    pub fn set_probe_result(&self, error: Option<DispatchError>) {
        *self.probe_result.lock() = error;
    }

    /// Delays every dispatch, to exercise timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RequestDispatcher for MockDispatcher {
    async fn dispatch(
        &self,
        kind: OperationKind,
        payload: &serde_json::Value,
        idempotency_key: &OperationId,
    ) -> Result<DispatchAck, DispatchError> {
        self.calls.lock().push(RecordedCall {
            kind,
            key: *idempotency_key,
            payload: payload.clone(),
        });

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(DispatchAck::ok()))
    }

    async fn probe(&self) -> Result<(), DispatchError> {
        match self.probe_result.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
