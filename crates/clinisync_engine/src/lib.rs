//! # ClinicSync Engine
//!
//! Offline-first mutation synchronization for ClinicSync.
//!
//! This crate provides:
//! - Connectivity monitor with debounced online transitions
//! - Persistent, ordered operation queue
//! - Sync coordinator with failure classification and backoff
//! - Status publisher for UI indicators
//! - HTTP request dispatcher abstraction
//! - The [`SyncEngine`] facade and its background loop
//!
//! ## Architecture
//!
//! A user action is tried against the backend directly. If the backend
//! cannot be reached the action is queued, and the coordinator replays the
//! queue later, triggered by restored connectivity, a periodic tick or the
//! enqueue itself.
//!
//! ## Key Invariants
//!
//! - Replay follows enqueue order, regardless of kind
//! - At most one operation is in flight
//! - Every queue mutation is durable before it returns
//! - The operation id is the idempotency key on every attempt
//! - No operation is dropped silently: permanent failures stay until
//!   discarded

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod connectivity;
mod coordinator;
mod engine;
mod error;
mod http;
mod queue;
mod status;
mod store;
mod transport;

pub use auth::{AuthProvider, ReauthCallback, SessionAuth};
pub use config::{ConnectivityConfig, EngineConfig, RetryConfig};
pub use connectivity::{ConnectivityMachine, ConnectivityMonitor};
pub use coordinator::{CoordinatorStats, DrainOutcome, DrainReport, SyncCoordinator};
pub use engine::{Submission, SyncEngine};
pub use error::{DispatchError, SyncError, SyncResult};
pub use http::{
    classify_response, HttpClient, HttpDispatcher, HttpRequest, HttpResponse, DEFAULT_HEALTH_PATH,
    IDEMPOTENCY_HEADER,
};
pub use queue::{system_clock_ms, Clock, OperationQueue, QueueCounts};
pub use status::StatusPublisher;
pub use store::{BackendQueueStore, QueueStore};
pub use transport::{DispatchAck, MockDispatcher, RecordedCall, RequestDispatcher};
