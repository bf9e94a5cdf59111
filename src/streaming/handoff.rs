use std::io;

use log::Level;

use crate::{
    compaction::{CompactionError, MergeExecutor},
    lock::{LockKey, LockManager, RetryPolicy},
    logging::{compaction_log, LogContext},
    streaming::{CloseStreamingReport, Handoff},
    table::{Segment, SegmentStatus, StoreError, Table, TableIdentifier, TableStore},
};

fn handoff_io(
    table: &TableIdentifier,
    step: &'static str,
) -> impl FnOnce(StoreError) -> CompactionError {
    let table = table.clone();
    move |source| CompactionError::HandoffIo {
        table,
        step,
        source,
    }
}

/// Hand off every `StreamingFinish` segment of `table`, oldest first.
///
/// The caller must hold the table's streaming lock. A segment stays in
/// `StreamingFinish` until its own hand-off is published, so a failure leaves
/// the remaining segments for the next pass.
pub(crate) async fn handoff_finished_segments<S, X>(
    store: &S,
    executor: &X,
    table: &TableIdentifier,
    log: &LogContext,
) -> Result<Vec<Handoff>, CompactionError>
where
    S: TableStore,
    X: MergeExecutor,
{
    let snapshot = store
        .table(table)
        .await
        .map_err(handoff_io(table, "reading table metadata"))?;
    let mut handed_off = Vec::new();
    for segment in snapshot.segments_with_status(SegmentStatus::StreamingFinish) {
        let output = store
            .allocate_segment_id(table)
            .await
            .map_err(handoff_io(table, "allocating a batch segment"))?;
        let merged = executor
            .handoff(&snapshot, &segment, output)
            .await
            .map_err(CompactionError::ExecutionFailure)?;
        let batch = Segment::new(
            output,
            SegmentStatus::Success,
            merged.size_bytes,
            segment.created_at_ms(),
        );
        store
            .commit_handoff(table, segment.id(), batch)
            .await
            .map_err(handoff_io(table, "publishing a hand-off"))?;
        compaction_log!(
            Level::Info,
            ctx: log,
            "segment_handed_off",
            "source={} output={} size_bytes={}",
            segment.id(),
            output,
            merged.size_bytes
        );
        handed_off.push(Handoff {
            source: segment.id(),
            output,
        });
    }
    Ok(handed_off)
}

/// Turn a streaming table into a batch table.
///
/// Runs under the table's streaming lock, which is released on every exit
/// path: finish open segments, hand off finished segments, clear the
/// streaming property, then remove checkpoint and log directories.
pub(crate) async fn close_streaming<S, X>(
    store: &S,
    executor: &X,
    locks: &LockManager,
    table: &Table,
    retry: RetryPolicy,
    log: &LogContext,
) -> Result<CloseStreamingReport, CompactionError>
where
    S: TableStore,
    X: MergeExecutor,
{
    let key = LockKey::streaming(table.id());
    let Some(guard) = locks.lock(key.clone(), retry, log).lock_with_retries().await else {
        compaction_log!(
            Level::Error,
            ctx: log,
            "close_streaming_locked",
            "failed to close streaming table, streaming is locked"
        );
        return Err(CompactionError::LockUnavailable { key });
    };

    let result = finish_streaming(store, executor, table, log).await;

    if guard.unlock() {
        compaction_log!(
            Level::Info,
            ctx: log,
            "close_streaming_unlocked",
            "table unlocked successfully after streaming finished"
        );
    } else {
        compaction_log!(
            Level::Error,
            ctx: log,
            "close_streaming_unlock_failed",
            "unable to unlock table after streaming finished"
        );
    }
    result
}

async fn finish_streaming<S, X>(
    store: &S,
    executor: &X,
    table: &Table,
    log: &LogContext,
) -> Result<CloseStreamingReport, CompactionError>
where
    S: TableStore,
    X: MergeExecutor,
{
    let id = table.id();
    let current = store
        .table(id)
        .await
        .map_err(handoff_io(id, "reading table metadata"))?;

    for segment in current.segments_with_status(SegmentStatus::Streaming) {
        store
            .update_segment_status(
                id,
                segment.id(),
                SegmentStatus::Streaming,
                SegmentStatus::StreamingFinish,
            )
            .await
            .map_err(handoff_io(id, "finishing a streaming segment"))?;
    }

    let handed_off = handoff_finished_segments(store, executor, id, log).await?;

    store
        .set_streaming(id, false)
        .await
        .map_err(handoff_io(id, "clearing the streaming property"))?;

    let mut residual_paths = Vec::new();
    for dir in [table.streaming_checkpoint_dir(), table.streaming_log_dir()] {
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                compaction_log!(
                    Level::Warn,
                    ctx: log,
                    "streaming_cleanup_failed",
                    "path={} error={}",
                    dir.display(),
                    err
                );
                residual_paths.push(dir);
            }
        }
    }
    if !residual_paths.is_empty() {
        compaction_log!(
            Level::Warn,
            ctx: log,
            "streaming_residual_files",
            "table is closed for streaming but {} directory(ies) may still hold files",
            residual_paths.len()
        );
    }

    compaction_log!(
        Level::Info,
        ctx: log,
        "streaming_closed",
        "handed_off={}",
        handed_off.len()
    );
    Ok(CloseStreamingReport {
        handed_off,
        residual_paths,
    })
}
