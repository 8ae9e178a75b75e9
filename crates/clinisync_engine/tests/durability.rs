//! Crash and restart tests against an on-disk queue file.

use clinisync_engine::{BackendQueueStore, EngineConfig, SessionAuth, SyncEngine, SyncError};
use clinisync_protocol::{OperationId, OperationStatus};
use clinisync_storage::FileBackend;
use clinisync_testkit::crash::{flip_bit, temp_path, truncate_image, write_torn_temp, CrashableBackend};
use clinisync_testkit::prelude::*;
use std::sync::Arc;

fn open_engine(file: &TestQueueFile, config: EngineConfig) -> Result<SyncEngine, SyncError> {
    SyncEngine::open(
        config,
        Box::new(file.open_store()),
        Arc::new(FakeBackend::new()),
        Arc::new(SessionAuth::signed_in()),
    )
}

fn offline_engine(file: &TestQueueFile) -> SyncEngine {
    open_engine(file, fast_config()).unwrap()
}

fn submit_three(engine: &SyncEngine) -> Vec<OperationId> {
    [
        payloads::clock_in("e1"),
        payloads::sale("GAUZE-10", 1),
        payloads::clock_out("e1"),
    ]
    .into_iter()
    .map(|(kind, payload)| engine.submit(kind, payload).unwrap())
    .collect()
}

#[test]
fn queue_survives_restart() {
    let file = TestQueueFile::new();
    let ids = {
        let engine = offline_engine(&file);
        submit_three(&engine)
    };

    let engine = offline_engine(&file);
    let listed: Vec<_> = engine.list().iter().map(|op| op.id).collect();
    assert_eq!(listed, ids);
    assert!(engine
        .list()
        .iter()
        .all(|op| op.status == OperationStatus::Queued && op.attempt == 0));
}

#[test]
fn torn_temp_file_is_ignored() {
    let file = TestQueueFile::new();
    let ids = {
        let engine = offline_engine(&file);
        submit_three(&engine)
    };

    write_torn_temp(file.path(), b"CSQ1\x01\x00\xff").unwrap();

    let engine = offline_engine(&file);
    assert_eq!(engine.list().len(), ids.len());
    assert!(!temp_path(file.path()).exists());
}

#[test]
fn crash_mid_session_keeps_what_was_acknowledged() {
    let file = TestQueueFile::new();
    let acknowledged = {
        let backend = CrashableBackend::new(FileBackend::open(file.path()).unwrap());
        backend.crash_after_writes(2);
        let engine = SyncEngine::open(
            fast_config(),
            Box::new(BackendQueueStore::new(backend)),
            Arc::new(FakeBackend::new()),
            Arc::new(SessionAuth::signed_in()),
        )
        .unwrap();

        let mut acknowledged = Vec::new();
        for (kind, payload) in [
            payloads::patient("Ana Ruiz"),
            payloads::patient("Luis Mora"),
            payloads::patient("Eva Gil"),
        ] {
            match engine.submit(kind, payload) {
                Ok(id) => acknowledged.push(id),
                Err(err) => assert!(err.is_persistence_failure()),
            }
        }
        assert!(engine.snapshot().persistence_failed);
        assert_eq!(engine.list().len(), 2);
        acknowledged
    };

    let engine = offline_engine(&file);
    let listed: Vec<_> = engine.list().iter().map(|op| op.id).collect();
    assert_eq!(listed, acknowledged);
    assert!(!engine.snapshot().persistence_failed);
}

#[test]
fn bit_rot_fails_loudly() {
    let file = TestQueueFile::new();
    {
        let engine = offline_engine(&file);
        submit_three(&engine);
    }

    flip_bit(file.path(), 24).unwrap();
    let err = open_engine(&file, fast_config()).unwrap_err();
    assert!(matches!(err, SyncError::Codec(_)));
    assert!(err.is_persistence_failure());
}

#[test]
fn truncated_image_fails_loudly() {
    let file = TestQueueFile::new();
    {
        let engine = offline_engine(&file);
        submit_three(&engine);
    }

    truncate_image(file.path(), 40).unwrap();
    let err = open_engine(&file, fast_config()).unwrap_err();
    assert!(matches!(err, SyncError::Codec(_)));
}

#[tokio::test]
async fn interrupted_dispatch_is_replayed_after_restart() {
    let file = TestQueueFile::new();
    let id = {
        let engine = offline_engine(&file);
        let (kind, payload) = payloads::clock_in("e9");
        let id = engine.submit(kind, payload).unwrap();
        // Simulates a process killed while the request was on the wire.
        engine.queue().mark_in_flight(id).unwrap();
        id
    };

    let engine = open_engine(&file, fast_config()).unwrap();
    let op = engine.queue().get(id).unwrap();
    assert_eq!(op.status, OperationStatus::Queued);
    assert_eq!(op.attempt, 1);

    engine.connectivity().set_link_up(true);
    let report = engine.drive().await;
    assert_eq!(report.synced, 1);
    assert!(engine.list().is_empty());

    drop(engine);
    let engine = offline_engine(&file);
    assert!(engine.list().is_empty());
}
