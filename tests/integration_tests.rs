//! Integration tests for cross-crate interactions.
//!
//! Drives the transfer engine the way a remote store would, then exercises
//! the storage service end to end over both bundled stores.

use std::sync::Arc;
use std::time::Duration;
use stowage_core::{
    BackendError, Direction, EngineConfig, ProducedChunk, ReadOutcome, TransferError,
    TransferOptions, TransferState,
};
use stowage_integration_tests::{CompletionLog, push_all, scripted_engine, scripted_engine_with};
use stowage_storage::{
    CachedFile, DirectoryStore, MemoryStore, ServiceConfig, StorageError, StorageService,
};

// ============================================================================
// Byte-level Scenarios
// ============================================================================

/// Five bytes in chunks of two: three chunks, done on the last one.
#[test]
fn test_upload_five_bytes_in_pairs() {
    let (backend, engine) = scripted_engine();
    let log = CompletionLog::new();

    engine
        .start_upload(
            "save1",
            vec![0x41, 0x42, 0x43, 0x44, 0x45],
            TransferOptions::new().chunk_size(2),
            log.sink(),
        )
        .unwrap();

    let driver = backend.last_driver();
    let expected = [
        (vec![0x41, 0x42], false),
        (vec![0x43, 0x44], false),
        (vec![0x45], true),
    ];
    for (data, is_done) in expected {
        assert_eq!(driver.produce_chunk(), ProducedChunk { data, is_done });
    }
    assert!(driver.finish(Ok(())));

    let completion = log.take_one();
    assert_eq!(completion.direction, Direction::Upload);
    assert_eq!(completion.state, TransferState::Completed);
    assert!(completion.is_success());
}

/// Download announcing five bytes delivered as 2 + 2 + 1.
#[test]
fn test_download_five_bytes_in_pairs() {
    let (backend, engine) = scripted_engine();
    let log = CompletionLog::new();
    engine
        .start_download("save1", TransferOptions::new(), log.sink())
        .unwrap();

    let driver = backend.last_driver();
    assert_eq!(
        driver.consume_chunk(Some(&[0x41, 0x42]), 5, false),
        ReadOutcome::Continue
    );
    assert_eq!(
        driver.consume_chunk(Some(&[0x43, 0x44]), 5, false),
        ReadOutcome::Continue
    );
    assert_eq!(
        driver.consume_chunk(Some(&[0x45]), 5, true),
        ReadOutcome::Continue
    );
    assert!(driver.finish(Ok(())));

    let completion = log.take_one();
    assert_eq!(completion.data(), Some(&[0x41, 0x42, 0x43, 0x44, 0x45][..]));
}

/// Three of five announced bytes marked last: fails once, later finish ignored.
#[test]
fn test_download_short_last_chunk() {
    let (backend, engine) = scripted_engine();
    let log = CompletionLog::new();
    engine
        .start_download("save1", TransferOptions::new(), log.sink())
        .unwrap();

    let driver = backend.last_driver();
    assert_eq!(
        driver.consume_chunk(Some(&[0x41, 0x42, 0x43]), 5, true),
        ReadOutcome::Fail
    );
    assert!(!driver.finish(Ok(())));

    let completion = log.take_one();
    assert_eq!(completion.state, TransferState::Failed);
    assert!(completion.error().unwrap().is_data_error());
    assert!(completion.data().is_none());
}

#[test]
fn test_download_announcing_too_much() {
    let (backend, engine) = scripted_engine_with(EngineConfig {
        max_file_size: 1024,
        ..EngineConfig::default()
    });
    let log = CompletionLog::new();
    engine
        .start_download("huge", TransferOptions::new(), log.sink())
        .unwrap();

    let driver = backend.last_driver();
    assert_eq!(
        driver.consume_chunk(Some(&[0; 16]), 1025, false),
        ReadOutcome::Fail
    );
    assert_eq!(
        log.take_one().error(),
        Some(&TransferError::TooLarge {
            size: 1025,
            max: 1024
        })
    );
}

// ============================================================================
// Registry Behaviour
// ============================================================================

#[test]
fn test_restart_cancels_and_isolates() {
    let (backend, engine) = scripted_engine();
    let first = CompletionLog::new();
    let second = CompletionLog::new();

    let old = engine
        .start_download("save1", TransferOptions::new(), first.sink())
        .unwrap();
    let stale = backend.last_driver();
    assert_eq!(stale.consume_chunk(Some(b"old"), 6, false), ReadOutcome::Continue);

    engine
        .start_download("save1", TransferOptions::new(), second.sink())
        .unwrap();
    let current = backend.last_driver();

    assert_eq!(first.take_one().state, TransferState::Cancelled);
    assert_eq!(backend.cancelled(), vec![old]);

    // The old collaborator keeps talking; none of it lands in the new transfer
    assert_eq!(stale.consume_chunk(Some(b"old"), 6, true), ReadOutcome::Cancel);
    assert!(!stale.finish(Ok(())));
    assert_eq!(engine.progress("save1").unwrap().bytes_transferred, 0);

    assert_eq!(push_all(&current, b"new!", 2, 4), ReadOutcome::Continue);
    assert!(current.finish(Ok(())));
    assert_eq!(second.take_one().data(), Some(&b"new!"[..]));
}

#[test]
fn test_independent_names_run_concurrently() {
    let (backend, engine) = scripted_engine();
    let log = CompletionLog::new();

    let names: Vec<String> = (0..8).map(|i| format!("blob-{i}")).collect();
    for name in &names {
        engine
            .start_download(name.clone(), TransferOptions::new(), log.sink())
            .unwrap();
    }
    assert_eq!(engine.transfer_count(), names.len());

    let workers: Vec<_> = backend
        .drivers()
        .into_iter()
        .map(|driver| {
            std::thread::spawn(move || {
                let payload = driver.request().name.as_bytes().repeat(100);
                assert_eq!(
                    push_all(&driver, &payload, 7, payload.len() as u64),
                    ReadOutcome::Continue
                );
                driver.finish(Ok(()))
            })
        })
        .collect();

    for worker in workers {
        assert!(worker.join().unwrap());
    }
    assert_eq!(log.len(), names.len());
    assert_eq!(engine.transfer_count(), 0);
}

#[test]
fn test_completion_callback_may_restart() {
    let (backend, engine) = scripted_engine();
    let log = CompletionLog::new();

    // Retry from inside the completion of a failed download
    let retry_engine = Arc::clone(&engine);
    let retry_sink = log.sink();
    engine
        .start_download("save1", TransferOptions::new(), move |completion| {
            assert!(completion.error().is_some());
            retry_engine
                .start_download("save1", TransferOptions::new(), retry_sink)
                .unwrap();
        })
        .unwrap();

    assert!(backend.last_driver().finish(Err(BackendError::unavailable("flaky"))));
    assert_eq!(engine.transfer_count(), 1);

    let retry = backend.last_driver();
    assert_eq!(push_all(&retry, b"ok", 2, 2), ReadOutcome::Continue);
    assert!(retry.finish(Ok(())));
    assert!(log.take_one().is_success());
}

// ============================================================================
// Storage Service
// ============================================================================

#[tokio::test]
async fn test_service_over_memory_store() {
    let store = Arc::new(MemoryStore::new());
    let service = StorageService::new(store.clone(), ServiceConfig::default()).unwrap();

    let payload: Vec<u8> = (0..50_000u32).map(|i| (i * 7) as u8).collect();
    service.upload("save1", payload.clone()).await.unwrap();
    service.duplicate_file("save1", "backup").await.unwrap();

    assert_eq!(service.download("backup").await.unwrap(), payload);
    assert_eq!(
        service.cache().get("backup").unwrap().digest(),
        CachedFile::new(payload.clone()).digest()
    );

    let files = service.query_file_list().await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.size == payload.len() as u64));

    service.delete_file("save1").await.unwrap();
    assert!(!store.contains("save1"));
}

#[tokio::test]
async fn test_service_over_directory_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DirectoryStore::open(dir.path()).unwrap());
    let service = StorageService::new(
        store,
        ServiceConfig {
            transfer_timeout: Some(Duration::from_secs(10)),
            ..ServiceConfig::default()
        },
    )
    .unwrap();

    let payload = vec![0x5A; 100_000];
    service.upload("save1", payload.clone()).await.unwrap();
    service.upload("empty", Vec::new()).await.unwrap();
    assert_eq!(std::fs::read(dir.path().join("save1")).unwrap(), payload);

    assert_eq!(service.download("save1").await.unwrap(), payload);
    assert!(service.download("empty").await.unwrap().is_empty());

    let names: Vec<String> = service
        .query_file_list()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["empty".to_string(), "save1".to_string()]);

    let err = service.download("missing").await.unwrap_err();
    assert!(err.is_not_found());

    let err = service.upload("../escape", vec![1]).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transfer(TransferError::Backend(BackendError::InvalidName(_)))
    ));
}

#[tokio::test]
async fn test_service_rejects_oversized_upload() {
    let service = StorageService::new(
        Arc::new(MemoryStore::new()),
        ServiceConfig {
            engine: EngineConfig {
                max_file_size: 8,
                ..EngineConfig::default()
            },
            transfer_timeout: None,
        },
    )
    .unwrap();

    let err = service.upload("big", vec![0; 9]).await.unwrap_err();
    assert!(matches!(err, StorageError::Engine(_)));
}
