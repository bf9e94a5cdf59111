mod common;

use std::{fs, sync::Arc, time::Duration};

use common::{add_table, orchestrator, segment, statuses, table_id, test_options, RecordingExecutor};
use segment_compaction::{
    lock::{FileLockProvider, InMemoryLockProvider, LockKey, LockManager, RetryPolicy},
    table::{InMemoryTableStore, SegmentId, SegmentStatus, TableStore},
    CompactionContext, CompactionError, CompactionKind, CompactionRequest, CompactionStatus,
    LogContext,
};

#[tokio::test]
async fn close_streaming_hands_off_every_segment() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(InMemoryTableStore::new());
    let table = add_table(
        &store,
        root.path(),
        "t2",
        true,
        vec![segment(0, SegmentStatus::Streaming), segment(1, SegmentStatus::Streaming)],
    );
    fs::create_dir_all(table.streaming_checkpoint_dir()).expect("checkpoint dir");
    fs::write(table.streaming_checkpoint_dir().join("offsets"), "42").expect("checkpoint");
    fs::create_dir_all(table.streaming_log_dir()).expect("log dir");
    fs::write(table.streaming_log_dir().join("0.log"), "entry").expect("log");

    let provider = Arc::new(InMemoryLockProvider::new());
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = orchestrator(
        Arc::clone(&store),
        Arc::clone(&executor),
        provider.clone(),
        test_options(root.path()),
    );

    let status = orchestrator
        .compact(
            CompactionRequest::new(table_id("t2"), CompactionKind::CloseStreaming),
            &CompactionContext::default(),
        )
        .await
        .expect("close streaming");
    let CompactionStatus::StreamingClosed(report) = status else {
        panic!("unexpected status {status:?}");
    };
    assert!(report.is_clean());
    let sources: Vec<u64> = report.handed_off().iter().map(|h| h.source.get()).collect();
    assert_eq!(sources, vec![0, 1]);
    assert_eq!(executor.handoffs(), vec![SegmentId::new(0), SegmentId::new(1)]);

    let closed = store.table(&table_id("t2")).await.expect("table");
    assert!(!closed.is_streaming());
    for handoff in report.handed_off() {
        let source = closed.segment(handoff.source).expect("source segment");
        assert_eq!(source.status(), SegmentStatus::Compacted);
        assert_eq!(source.merged_into(), Some(handoff.output));
        let batch = closed.segment(handoff.output).expect("batch segment");
        assert_eq!(batch.status(), SegmentStatus::Success);
        assert_eq!(batch.created_at_ms(), source.created_at_ms());
    }
    assert!(!table.streaming_checkpoint_dir().exists());
    assert!(!table.streaming_log_dir().exists());

    let key = LockKey::streaming(&table_id("t2"));
    assert_eq!(provider.holder_of(&key), None);
    assert_eq!(provider.release_count(&key), 1);
}

#[tokio::test]
async fn interrupted_close_resumes_with_remaining_segments() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(InMemoryTableStore::new());
    add_table(
        &store,
        root.path(),
        "events",
        true,
        vec![
            segment(0, SegmentStatus::Streaming),
            segment(1, SegmentStatus::Streaming),
            segment(2, SegmentStatus::Streaming),
        ],
    );
    let provider = Arc::new(InMemoryLockProvider::new());
    let executor = Arc::new(RecordingExecutor::new());
    executor.set_handoff_budget(Some(1));
    let orchestrator = orchestrator(
        Arc::clone(&store),
        Arc::clone(&executor),
        provider.clone(),
        test_options(root.path()),
    );
    let request = || CompactionRequest::new(table_id("events"), CompactionKind::CloseStreaming);

    let err = orchestrator
        .compact(request(), &CompactionContext::default())
        .await
        .expect_err("hand-off fails midway");
    assert!(matches!(err, CompactionError::ExecutionFailure(_)));

    let partial = store.table(&table_id("events")).await.expect("table");
    assert!(partial.is_streaming());
    let first_output = partial
        .segment(SegmentId::new(0))
        .and_then(|segment| segment.merged_into())
        .expect("first segment handed off");
    assert_eq!(
        partial.segments_with_status(SegmentStatus::StreamingFinish).len(),
        2
    );
    let key = LockKey::streaming(&table_id("events"));
    assert_eq!(provider.release_count(&key), 1);
    assert_eq!(provider.holder_of(&key), None);

    executor.set_handoff_budget(None);
    let status = orchestrator
        .compact(request(), &CompactionContext::default())
        .await
        .expect("retry completes");
    let CompactionStatus::StreamingClosed(report) = status else {
        panic!("unexpected status {status:?}");
    };
    let sources: Vec<u64> = report.handed_off().iter().map(|h| h.source.get()).collect();
    assert_eq!(sources, vec![1, 2]);
    assert_eq!(
        executor.handoffs(),
        vec![SegmentId::new(0), SegmentId::new(1), SegmentId::new(2)]
    );

    let closed = store.table(&table_id("events")).await.expect("table");
    assert!(!closed.is_streaming());
    let first_batch = closed.segment(first_output).expect("first batch segment");
    assert_eq!(first_batch.status(), SegmentStatus::Success);
    assert_eq!(
        closed.segment(SegmentId::new(0)).and_then(|s| s.merged_into()),
        Some(first_output)
    );
    assert!(closed
        .segments_with_status(SegmentStatus::StreamingFinish)
        .is_empty());
    assert_eq!(provider.release_count(&key), 2);
}

#[tokio::test]
async fn residual_streaming_files_are_reported() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(InMemoryTableStore::new());
    let table = add_table(
        &store,
        root.path(),
        "clicks",
        true,
        vec![segment(0, SegmentStatus::Streaming)],
    );
    // A regular file where the checkpoint directory should be cannot be removed as a directory.
    fs::create_dir_all(table.streaming_checkpoint_dir().parent().expect("parent")).expect("dir");
    fs::write(table.streaming_checkpoint_dir(), "not a directory").expect("file");

    let orchestrator = orchestrator(
        Arc::clone(&store),
        Arc::new(RecordingExecutor::new()),
        Arc::new(InMemoryLockProvider::new()),
        test_options(root.path()),
    );
    let status = orchestrator
        .compact(
            CompactionRequest::new(table_id("clicks"), CompactionKind::CloseStreaming),
            &CompactionContext::default(),
        )
        .await
        .expect("close succeeds despite cleanup failure");
    let CompactionStatus::StreamingClosed(report) = status else {
        panic!("unexpected status {status:?}");
    };
    assert!(!report.is_clean());
    assert_eq!(report.residual_paths(), &[table.streaming_checkpoint_dir()]);

    let closed = store.table(&table_id("clicks")).await.expect("table");
    assert!(!closed.is_streaming());
}

#[tokio::test]
async fn busy_streaming_lock_fails_close_without_changes() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(InMemoryTableStore::new());
    add_table(
        &store,
        root.path(),
        "t2",
        true,
        vec![segment(0, SegmentStatus::Streaming)],
    );
    let provider = Arc::new(FileLockProvider::new(root.path().join("locks")));
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = orchestrator(
        Arc::clone(&store),
        Arc::clone(&executor),
        provider.clone(),
        test_options(root.path()),
    );

    let key = LockKey::streaming(&table_id("t2"));
    let other = LockManager::with_holder(provider.clone(), "writer-node");
    let held = other
        .lock(key.clone(), RetryPolicy::once(), &LogContext::default())
        .lock_with_retries()
        .await
        .expect("writer holds the streaming lock");

    let err = orchestrator
        .compact(
            CompactionRequest::new(table_id("t2"), CompactionKind::CloseStreaming),
            &CompactionContext::default(),
        )
        .await
        .expect_err("streaming lock is busy");
    assert!(matches!(err, CompactionError::LockUnavailable { .. }));
    assert_eq!(
        err.to_string(),
        "table sales.t2 is already locked by another streaming operation, please try after \
         some time"
    );

    let table = store.table(&table_id("t2")).await.expect("table");
    assert!(table.is_streaming());
    assert_eq!(statuses(&table), vec![(0, SegmentStatus::Streaming)]);
    assert!(executor.handoffs().is_empty());
    assert!(provider.lock_path(&key).exists());
    assert!(held.unlock());
}

#[tokio::test]
async fn monitor_hands_off_finished_segments_in_background() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(InMemoryTableStore::new());
    add_table(
        &store,
        root.path(),
        "feed",
        true,
        vec![
            segment(0, SegmentStatus::StreamingFinish),
            segment(1, SegmentStatus::Streaming),
        ],
    );
    let provider = Arc::new(InMemoryLockProvider::new());
    let executor = Arc::new(RecordingExecutor::new());
    let orchestrator = orchestrator(
        Arc::clone(&store),
        Arc::clone(&executor),
        provider.clone(),
        test_options(root.path()),
    );
    let cx = CompactionContext::default();
    let request = || CompactionRequest::new(table_id("feed"), CompactionKind::Streaming);

    let status = orchestrator.compact(request(), &cx).await.expect("start");
    assert_eq!(status, CompactionStatus::MonitorStarted);
    assert!(orchestrator.is_monitoring(&table_id("feed")));
    let status = orchestrator.compact(request(), &cx).await.expect("restart");
    assert_eq!(status, CompactionStatus::MonitorAlreadyRunning);
    // The monitor does not take the compaction lock.
    assert_eq!(
        provider.release_count(&LockKey::table_compaction(&table_id("feed"))),
        0
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let table = store.table(&table_id("feed")).await.expect("table");
            if table
                .segment(SegmentId::new(0))
                .is_some_and(|s| s.status() == SegmentStatus::Compacted)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("monitor hands off the finished segment");

    let table = store.table(&table_id("feed")).await.expect("table");
    assert_eq!(
        table.segment(SegmentId::new(1)).map(|s| s.status()),
        Some(SegmentStatus::Streaming)
    );

    let status = orchestrator
        .compact(
            CompactionRequest::new(table_id("feed"), CompactionKind::CloseStreaming),
            &cx,
        )
        .await
        .expect("close streaming");
    assert!(matches!(status, CompactionStatus::StreamingClosed(_)));
    assert!(!orchestrator.is_monitoring(&table_id("feed")));
    assert_eq!(
        executor.handoffs(),
        vec![SegmentId::new(0), SegmentId::new(1)]
    );
}
