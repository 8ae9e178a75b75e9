//! Test fixtures and engine helpers.
//!
//! Provides ready-made engines wired to a [`FakeBackend`], on-disk queue
//! files that clean up after themselves, and payload builders for the
//! clinic operation kinds.

use crate::backend::FakeBackend;
use clinisync_engine::{
    BackendQueueStore, ConnectivityConfig, EngineConfig, QueueStore, RetryConfig, SessionAuth,
    SyncEngine,
};
use clinisync_storage::{FileBackend, InMemoryBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Engine configuration for tests: no debounce, no jitter, short delays.
pub fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_connectivity(ConnectivityConfig::new(Duration::ZERO))
        .with_retry(
            RetryConfig::new(Duration::from_millis(100), Duration::from_millis(800)).with_jitter(false),
        )
        .with_dispatch_timeout(Duration::from_secs(5))
        .with_tick_interval(Duration::from_secs(30))
}

/// A queue file in a temporary directory.
pub struct TestQueueFile {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TestQueueFile {
    /// Creates a fresh, not yet existing queue file.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("queue.csq");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the queue file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a store on the file, taking its lock.
    pub fn open_store(&self) -> BackendQueueStore<FileBackend> {
        BackendQueueStore::new(FileBackend::open(&self.path).expect("Failed to open queue file"))
    }
}

impl Default for TestQueueFile {
    fn default() -> Self {
        Self::new()
    }
}

/// An engine wired to a fake backend and a shared in-memory store.
///
/// [`TestEngine::restart`] drops nothing it shares, so a test can simulate
/// a process restart against the same durable image and the same backend.
pub struct TestEngine {
    /// The engine under test.
    pub engine: SyncEngine,
    /// The fake backend behind the engine.
    pub backend: Arc<FakeBackend>,
    /// The session gate.
    pub auth: Arc<SessionAuth>,
    /// The durable image.
    pub storage: InMemoryBackend,
    config: EngineConfig,
}

impl TestEngine {
    /// Creates an engine that starts online.
    pub fn online() -> Self {
        Self::build(fast_config(), true)
    }

    /// Creates an engine that starts offline.
    pub fn offline() -> Self {
        Self::build(fast_config(), false)
    }

    /// Creates an engine with a custom configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let online = config.connectivity.initially_online;
        Self::build(config, online)
    }

    fn build(mut config: EngineConfig, online: bool) -> Self {
        config.connectivity.initially_online = online;
        let backend = Arc::new(FakeBackend::new());
        let auth = Arc::new(SessionAuth::signed_in());
        let storage = InMemoryBackend::new();
        let engine = open_engine(&config, &storage, &backend, &auth);
        Self {
            engine,
            backend,
            auth,
            storage,
            config,
        }
    }

    /// Simulates a process restart: a new engine over the same image.
    pub fn restart(self, online: bool) -> Self {
        let TestEngine {
            engine,
            backend,
            auth,
            storage,
            mut config,
        } = self;
        drop(engine);
        config.connectivity.initially_online = online;
        let engine = open_engine(&config, &storage, &backend, &auth);
        Self {
            engine,
            backend,
            auth,
            storage,
            config,
        }
    }
}

fn open_engine(
    config: &EngineConfig,
    storage: &InMemoryBackend,
    backend: &Arc<FakeBackend>,
    auth: &Arc<SessionAuth>,
) -> SyncEngine {
    let store: Box<dyn QueueStore> = Box::new(BackendQueueStore::new(storage.clone()));
    SyncEngine::open(config.clone(), store, backend.clone(), auth.clone())
        .expect("Failed to open engine")
}

impl std::ops::Deref for TestEngine {
    type Target = SyncEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Payload builders for the clinic operation kinds.
pub mod payloads {
    use clinisync_protocol::OperationKind;
    use serde_json::{json, Value};

    /// Clock-in of an employee.
    pub fn clock_in(employee: &str) -> (OperationKind, Value) {
        (OperationKind::ClockIn, json!({"employee_id": employee}))
    }

    /// Clock-out of an employee.
    pub fn clock_out(employee: &str) -> (OperationKind, Value) {
        (OperationKind::ClockOut, json!({"employee_id": employee}))
    }

    /// Break start of an employee.
    pub fn break_start(employee: &str) -> (OperationKind, Value) {
        (OperationKind::BreakStart, json!({"employee_id": employee}))
    }

    /// Break end of an employee.
    pub fn break_end(employee: &str) -> (OperationKind, Value) {
        (OperationKind::BreakEnd, json!({"employee_id": employee}))
    }

    /// Patient registration.
    pub fn patient(name: &str) -> (OperationKind, Value) {
        (
            OperationKind::PatientRegister,
            json!({"name": name, "phone": "+34 600 000 000"}),
        )
    }

    /// Sale of `qty` units of `sku`.
    pub fn sale(sku: &str, qty: u32) -> (OperationKind, Value) {
        (
            OperationKind::SaleCreate,
            json!({"items": [{"sku": sku, "qty": qty, "unit_price": 4.5}]}),
        )
    }

    /// Stock adjustment.
    pub fn adjust_stock(sku: &str, delta: i64) -> (OperationKind, Value) {
        (OperationKind::InventoryAdjust, json!({"sku": sku, "delta": delta}))
    }
}
