//! Background hand-off worker for a streaming table.

use std::{sync::Arc, time::Duration};

use log::Level;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{
    compaction::MergeExecutor,
    lock::{LockKey, LockManager, RetryPolicy},
    logging::{compaction_log, LogContext},
    streaming::handoff_finished_segments,
    table::{StoreError, TableIdentifier, TableStore},
};

/// Handle to a running hand-off worker.
///
/// The worker is aborted when the handle is dropped.
#[derive(Debug)]
pub(crate) struct HandoffMonitor {
    join: JoinHandle<()>,
}

impl HandoffMonitor {
    /// Start periodic hand-off for `table`. The first pass runs immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<S, X>(
        store: Arc<S>,
        executor: Arc<X>,
        locks: LockManager,
        table: TableIdentifier,
        interval: Duration,
        log: LogContext,
    ) -> Self
    where
        S: TableStore,
        X: MergeExecutor,
    {
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            compaction_log!(
                Level::Info,
                ctx: &log,
                "handoff_monitor_started",
                "interval_ms={}",
                interval.as_millis()
            );
            loop {
                ticker.tick().await;
                if !run_pass(store.as_ref(), executor.as_ref(), &locks, &table, &log).await {
                    break;
                }
            }
            compaction_log!(
                Level::Info,
                ctx: &log,
                "handoff_monitor_stopped",
                "table is no longer streaming"
            );
        });
        Self { join }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.join.is_finished()
    }
}

impl Drop for HandoffMonitor {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// One hand-off pass. Returns `false` once the worker should stop.
async fn run_pass<S, X>(
    store: &S,
    executor: &X,
    locks: &LockManager,
    table: &TableIdentifier,
    log: &LogContext,
) -> bool
where
    S: TableStore,
    X: MergeExecutor,
{
    match store.table(table).await {
        Ok(snapshot) if snapshot.is_streaming() => {}
        Ok(_) => return false,
        Err(err @ StoreError::TableNotFound(_)) => {
            compaction_log!(Level::Warn, ctx: log, "handoff_table_dropped", "error={}", err);
            return false;
        }
        // Metadata may be briefly unreadable; keep the worker alive.
        Err(err) => {
            compaction_log!(Level::Warn, ctx: log, "handoff_table_unavailable", "error={}", err);
            return true;
        }
    }

    // Another hand-off or a close owns the table; try again next tick.
    let Some(guard) = locks
        .lock(LockKey::streaming(table), RetryPolicy::once(), log)
        .lock_with_retries()
        .await
    else {
        return true;
    };
    if let Err(err) = handoff_finished_segments(store, executor, table, log).await {
        compaction_log!(Level::Error, ctx: log, "handoff_failed", "error={}", err);
    }
    guard.unlock();
    true
}
