//! Request dispatch: guard, lock, execute, publish, notify.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use log::Level;

use crate::{
    compaction::{
        guard,
        planner::{LoadContext, MergePlan, PlanRequest},
        CompactionError, CompactionKind, CompactionMarker, CompactionQueue, CompactionRequest,
        CompactionStatus, MergeExecutor, TriggerSource,
    },
    context::CompactionContext,
    event::{EventBus, OperationContext, OperationEvent},
    lock::{LockKey, LockManager, RetryPolicy},
    logging::{compaction_log, LogContext},
    option::CompactionOptions,
    streaming::{close_streaming, HandoffMonitor},
    table::{Segment, SegmentId, SegmentStatus, StoreError, Table, TableIdentifier, TableStore},
};

/// Entry point for compaction requests.
///
/// Holds the metadata store, the merge executor and the lock manager shared by
/// every request, plus the hand-off monitors started for streaming tables.
/// Dropping the orchestrator aborts those monitors.
pub struct CompactionOrchestrator<S, X> {
    store: Arc<S>,
    executor: Arc<X>,
    locks: LockManager,
    options: CompactionOptions,
    monitors: Mutex<HashMap<TableIdentifier, HandoffMonitor>>,
}

impl<S, X> CompactionOrchestrator<S, X>
where
    S: TableStore,
    X: MergeExecutor,
{
    pub fn new(
        store: Arc<S>,
        executor: Arc<X>,
        locks: LockManager,
        options: CompactionOptions,
    ) -> Self {
        Self {
            store,
            executor,
            locks,
            options,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<X> {
        &self.executor
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn options(&self) -> &CompactionOptions {
        &self.options
    }

    /// Whether a hand-off monitor is alive for `table`.
    pub fn is_monitoring(&self, table: &TableIdentifier) -> bool {
        self.monitors()
            .get(table)
            .is_some_and(HandoffMonitor::is_running)
    }

    /// Run one compaction request to completion.
    ///
    /// Fires exactly one `Pre` event before dispatch and one `Post` event after
    /// a successful dispatch, both sharing one [`OperationContext`]. Any lock
    /// taken during dispatch is released before this returns, including on
    /// error.
    pub async fn compact(
        &self,
        request: CompactionRequest,
        cx: &CompactionContext,
    ) -> Result<CompactionStatus, CompactionError> {
        let log = cx
            .log()
            .with("table", request.table())
            .with("kind", request.kind());
        let options = self.options.with_session(cx.session())?;

        let table = self.store.table(request.table()).await?;
        if let Err(err) = guard::validate(&table) {
            compaction_log!(Level::Warn, ctx: &log, "compaction_rejected", "{err}");
            return Err(err);
        }
        validate_request(&request, &table)?;

        let mut operation = OperationContext::new();
        cx.events().fire(
            &OperationEvent::AlterTableCompactionPre { table: &table },
            &mut operation,
        )?;

        compaction_log!(
            Level::Info,
            ctx: &log,
            "compaction_started",
            "trigger={:?}",
            request.trigger()
        );
        let status = match self
            .dispatch(&request, &table, &options, cx.events(), &mut operation, &log)
            .await
        {
            Ok(status) => status,
            Err(err) => {
                compaction_log!(Level::Error, ctx: &log, "compaction_failed", "error={err}");
                return Err(err);
            }
        };

        let table = self.store.table(request.table()).await?;
        cx.events().fire(
            &OperationEvent::AlterTableCompactionPost { table: &table },
            &mut operation,
        )?;
        compaction_log!(Level::Info, ctx: &log, "compaction_finished", "status={status:?}");
        Ok(status)
    }

    async fn dispatch(
        &self,
        request: &CompactionRequest,
        table: &Table,
        options: &CompactionOptions,
        events: &EventBus,
        operation: &mut OperationContext,
        log: &LogContext,
    ) -> Result<CompactionStatus, CompactionError> {
        match request.kind() {
            CompactionKind::Minor | CompactionKind::Major | CompactionKind::IudUpdDelDelta => {
                if options.is_concurrent_compaction() {
                    self.merge_under_table_lock(
                        request,
                        options,
                        options.lock_retry_policy(),
                        events,
                        operation,
                        log,
                    )
                    .await
                    .map(|merged| CompactionStatus::Completed { merged })
                } else {
                    self.merge_under_system_lock(request, options, events, operation, log)
                        .await
                }
            }
            CompactionKind::SegmentIndex => {
                self.merge_index(request, options, events, operation, log)
                    .await
            }
            CompactionKind::Streaming => Ok(self.start_monitor(table.id(), options, log)),
            CompactionKind::CloseStreaming => {
                let report = close_streaming(
                    self.store.as_ref(),
                    self.executor.as_ref(),
                    &self.locks,
                    table,
                    options.lock_retry_policy(),
                    log,
                )
                .await?;
                self.monitors().remove(table.id());
                Ok(CompactionStatus::StreamingClosed(report))
            }
        }
    }

    /// Merge under the table's compaction lock.
    ///
    /// Every merge takes this lock, also when the system-wide lock is held, so
    /// requests in different lock modes still exclude each other per table.
    async fn merge_under_table_lock(
        &self,
        request: &CompactionRequest,
        options: &CompactionOptions,
        retry: RetryPolicy,
        events: &EventBus,
        operation: &mut OperationContext,
        log: &LogContext,
    ) -> Result<Option<SegmentId>, CompactionError> {
        let key = LockKey::table_compaction(request.table());
        let Some(guard) = self
            .locks
            .lock(key.clone(), retry, log)
            .lock_with_retries()
            .await
        else {
            return Err(CompactionError::LockUnavailable { key });
        };

        let result = self.merge(request, options, events, operation, log).await;
        guard.unlock();
        result
    }

    /// System-wide serialization: a busy lock queues the request for its holder.
    ///
    /// The table lock is still taken inside the system lock and released first.
    async fn merge_under_system_lock(
        &self,
        request: &CompactionRequest,
        options: &CompactionOptions,
        events: &EventBus,
        operation: &mut OperationContext,
        log: &LogContext,
    ) -> Result<CompactionStatus, CompactionError> {
        let key = LockKey::system_compaction();
        let Some(guard) = self
            .locks
            .lock(key.clone(), RetryPolicy::once(), log)
            .lock_with_retries()
            .await
        else {
            // Delta compaction depends on a caller-held update context and cannot be replayed.
            if request.kind() == CompactionKind::IudUpdDelDelta {
                return Err(CompactionError::LockUnavailable { key });
            }
            let marker = CompactionQueue::new(options.request_marker_dir())
                .record(request.table(), request.kind())
                .await?;
            compaction_log!(
                Level::Info,
                ctx: log,
                "compaction_queued",
                "system compaction in progress, request queued at {}",
                marker.path().display()
            );
            return Ok(CompactionStatus::Queued);
        };

        let result = self
            .merge_under_table_lock(
                request,
                options,
                options.lock_retry_policy(),
                events,
                operation,
                log,
            )
            .await;
        self.sweep(options, events, log).await;
        guard.unlock();
        result.map(|merged| CompactionStatus::Completed { merged })
    }

    /// Compact every table with a pending request marker, once each.
    ///
    /// Must run under the system-wide compaction lock. Each queued table is
    /// compacted under its own table lock as well.
    async fn sweep(&self, options: &CompactionOptions, events: &EventBus, log: &LogContext) {
        let queue = CompactionQueue::new(options.request_marker_dir());
        let markers = match queue.pending().await {
            Ok(markers) => markers,
            Err(err) => {
                compaction_log!(Level::Warn, ctx: log, "marker_sweep_failed", "error={err}");
                return;
            }
        };
        if markers.is_empty() {
            return;
        }
        compaction_log!(
            Level::Info,
            ctx: log,
            "marker_sweep",
            "pending={}",
            markers.len()
        );

        for marker in markers {
            let marker_log = log
                .with("queued_table", marker.table())
                .with("queued_kind", marker.kind());
            match self.store.table(marker.table()).await {
                Ok(table) if table.has_load_in_progress() => {
                    compaction_log!(
                        Level::Info,
                        ctx: &marker_log,
                        "marker_deferred",
                        "load in progress, keeping marker"
                    );
                    continue;
                }
                Ok(_) => {}
                Err(StoreError::TableNotFound(_)) => {
                    compaction_log!(
                        Level::Info,
                        ctx: &marker_log,
                        "marker_dropped",
                        "table no longer exists"
                    );
                    remove_marker(&queue, &marker, &marker_log).await;
                    continue;
                }
                Err(err) => {
                    compaction_log!(
                        Level::Warn,
                        ctx: &marker_log,
                        "marker_deferred",
                        "error={err}"
                    );
                    continue;
                }
            }

            let request = CompactionRequest::new(marker.table().clone(), marker.kind())
                .with_trigger(TriggerSource::SystemLevel);
            let mut operation = OperationContext::new();
            match self
                .merge_under_table_lock(
                    &request,
                    options,
                    RetryPolicy::once(),
                    events,
                    &mut operation,
                    &marker_log,
                )
                .await
            {
                // Another compaction owns the table; leave the marker for a later sweep.
                Err(CompactionError::LockUnavailable { .. }) => {
                    compaction_log!(
                        Level::Info,
                        ctx: &marker_log,
                        "marker_deferred",
                        "table is locked for compaction, keeping marker"
                    );
                    continue;
                }
                Ok(merged) => compaction_log!(
                    Level::Info,
                    ctx: &marker_log,
                    "queued_compaction_finished",
                    "merged={merged:?}"
                ),
                Err(err) => compaction_log!(
                    Level::Error,
                    ctx: &marker_log,
                    "queued_compaction_failed",
                    "error={err}"
                ),
            }
            remove_marker(&queue, &marker, &marker_log).await;
        }
    }

    /// Plan, execute and publish one merge. The caller holds the table compaction lock.
    async fn merge(
        &self,
        request: &CompactionRequest,
        options: &CompactionOptions,
        events: &EventBus,
        operation: &mut OperationContext,
        log: &LogContext,
    ) -> Result<Option<SegmentId>, CompactionError> {
        let table = self.store.table(request.table()).await?;
        let (candidates, fact_timestamp_ms) = match request.update_status() {
            Some(update) if request.kind() == CompactionKind::IudUpdDelDelta => (
                update.segments().to_vec(),
                request
                    .fact_timestamp_ms()
                    .unwrap_or(update.update_timestamp_ms()),
            ),
            _ => (table.segments().to_vec(), request.fact_timestamp_or_now()),
        };

        let mut plan_request = PlanRequest::new(
            request.kind(),
            request
                .size_threshold()
                .unwrap_or(options.major_size_threshold),
            options.minor_segment_count,
        );
        plan_request.partitions = request.partitions().to_vec();
        plan_request.fact_timestamp_ms = fact_timestamp_ms;
        plan_request.trigger = request.trigger();

        let Some(plan) = self.executor.plan(&candidates, &plan_request) else {
            compaction_log!(
                Level::Info,
                ctx: log,
                "compaction_skipped",
                "no eligible segments among {} candidate(s)",
                candidates.len()
            );
            return Ok(None);
        };

        let output = self.store.allocate_segment_id(request.table()).await?;
        compaction_log!(
            Level::Info,
            ctx: log,
            "merge_started",
            "inputs={:?} output={} total_bytes={}",
            plan.segment_ids(),
            output,
            plan.total_size()
        );
        let merged = match self.executor.execute(&table, &plan, output).await {
            Ok(merged) => merged,
            Err(err) => {
                compaction_log!(
                    Level::Error,
                    ctx: log,
                    "merge_failed",
                    "output={output} error={err}"
                );
                return Err(CompactionError::ExecutionFailure(err));
            }
        };

        let load = LoadContext {
            table: request.table().clone(),
            kind: request.kind(),
            output: Some(output),
            fact_timestamp_ms,
            trigger: request.trigger(),
        };
        events.fire(
            &OperationEvent::AlterTableCompactionPreStatusUpdate {
                table: &table,
                merge_plan: &plan,
                load_context: &load,
            },
            operation,
        )?;

        let segment = Segment::new(
            output,
            SegmentStatus::Success,
            merged.size_bytes,
            fact_timestamp_ms,
        )
        .with_compaction_level(plan.output_level());
        self.store
            .commit_merge(request.table(), &plan.segment_ids(), segment)
            .await?;
        compaction_log!(
            Level::Info,
            ctx: log,
            "merge_committed",
            "output={output} size_bytes={}",
            merged.size_bytes
        );
        Ok(Some(output))
    }

    /// Merge index files of every valid segment under the table lock.
    async fn merge_index(
        &self,
        request: &CompactionRequest,
        options: &CompactionOptions,
        events: &EventBus,
        operation: &mut OperationContext,
        log: &LogContext,
    ) -> Result<CompactionStatus, CompactionError> {
        let key = LockKey::table_compaction(request.table());
        let Some(guard) = self
            .locks
            .lock(key.clone(), options.lock_retry_policy(), log)
            .lock_with_retries()
            .await
        else {
            return Err(CompactionError::LockUnavailable { key });
        };

        let result = self
            .merge_index_locked(request, options, events, operation, log)
            .await;
        guard.unlock();
        result.map(|segments| CompactionStatus::IndexMerged { segments })
    }

    async fn merge_index_locked(
        &self,
        request: &CompactionRequest,
        options: &CompactionOptions,
        events: &EventBus,
        operation: &mut OperationContext,
        log: &LogContext,
    ) -> Result<Vec<SegmentId>, CompactionError> {
        let table = self.store.table(request.table()).await?;
        let segments = table.segments_with_status(SegmentStatus::Success);
        if segments.is_empty() {
            compaction_log!(Level::Info, ctx: log, "index_merge_skipped", "no valid segments");
            return Ok(Vec::new());
        }

        let merged = match self.executor.merge_index(&table, &segments).await {
            Ok(merged) => merged,
            Err(err) => {
                compaction_log!(Level::Error, ctx: log, "index_merge_failed", "error={err}");
                return Err(CompactionError::ExecutionFailure(err));
            }
        };

        let mut plan_request = PlanRequest::new(request.kind(), 0, options.minor_segment_count);
        plan_request.partitions = request.partitions().to_vec();
        plan_request.fact_timestamp_ms = request.fact_timestamp_or_now();
        plan_request.trigger = request.trigger();
        let plan = MergePlan::new(&plan_request, segments);
        let load = LoadContext {
            table: request.table().clone(),
            kind: request.kind(),
            output: None,
            fact_timestamp_ms: plan.fact_timestamp_ms(),
            trigger: request.trigger(),
        };
        events.fire(
            &OperationEvent::AlterTableCompactionPreStatusUpdate {
                table: &table,
                merge_plan: &plan,
                load_context: &load,
            },
            operation,
        )?;

        let updates: Vec<(SegmentId, String)> = merged
            .into_iter()
            .map(|merge| (merge.segment, merge.index_file))
            .collect();
        self.store
            .commit_index_merge(request.table(), &updates)
            .await?;
        compaction_log!(
            Level::Info,
            ctx: log,
            "index_merge_committed",
            "segments={}",
            updates.len()
        );
        Ok(updates.into_iter().map(|(segment, _)| segment).collect())
    }

    fn start_monitor(
        &self,
        table: &TableIdentifier,
        options: &CompactionOptions,
        log: &LogContext,
    ) -> CompactionStatus {
        let mut monitors = self.monitors();
        if monitors.get(table).is_some_and(HandoffMonitor::is_running) {
            compaction_log!(
                Level::Info,
                ctx: log,
                "handoff_monitor_running",
                "monitor already running"
            );
            return CompactionStatus::MonitorAlreadyRunning;
        }
        let monitor = HandoffMonitor::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.executor),
            self.locks.clone(),
            table.clone(),
            options.handoff_interval,
            log.clone(),
        );
        monitors.insert(table.clone(), monitor);
        CompactionStatus::MonitorStarted
    }

    fn monitors(&self) -> MutexGuard<'_, HashMap<TableIdentifier, HandoffMonitor>> {
        match self.monitors.lock() {
            Ok(monitors) => monitors,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<S, X> fmt::Debug for CompactionOrchestrator<S, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactionOrchestrator")
            .field("locks", &self.locks)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn validate_request(request: &CompactionRequest, table: &Table) -> Result<(), CompactionError> {
    match request.kind() {
        CompactionKind::IudUpdDelDelta if request.update_status().is_none() => {
            Err(CompactionError::InvalidRequest(format!(
                "{} compaction on table {} requires an update status context",
                request.kind(),
                table.id()
            )))
        }
        kind if kind.is_streaming() && !table.is_streaming() => {
            Err(CompactionError::InvalidRequest(format!(
                "table {} is not a streaming table",
                table.id()
            )))
        }
        _ => Ok(()),
    }
}

async fn remove_marker(
    queue: &CompactionQueue,
    marker: &CompactionMarker,
    log: &LogContext,
) {
    if let Err(err) = queue.remove(marker).await {
        compaction_log!(Level::Warn, ctx: log, "marker_remove_failed", "error={err}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        compaction::{ExecutorError, IndexMerge, MergedSegment, UpdateStatusContext},
        event::{EventPhase, ListenerError},
        lock::InMemoryLockProvider,
    };

    #[derive(Default)]
    struct FixedExecutor {
        fail: bool,
        executed: AtomicUsize,
    }

    impl MergeExecutor for FixedExecutor {
        async fn execute(
            &self,
            _table: &Table,
            plan: &MergePlan,
            _output: SegmentId,
        ) -> Result<MergedSegment, ExecutorError> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExecutorError::new("disk full"));
            }
            Ok(MergedSegment {
                size_bytes: plan.total_size(),
            })
        }

        async fn merge_index(
            &self,
            _table: &Table,
            segments: &[Segment],
        ) -> Result<Vec<IndexMerge>, ExecutorError> {
            Ok(segments
                .iter()
                .map(|segment| IndexMerge {
                    segment: segment.id(),
                    index_file: format!("{}.index", segment.id()),
                })
                .collect())
        }

        async fn handoff(
            &self,
            _table: &Table,
            segment: &Segment,
            _output: SegmentId,
        ) -> Result<MergedSegment, ExecutorError> {
            Ok(MergedSegment {
                size_bytes: segment.size_bytes(),
            })
        }
    }

    struct Fixture {
        orchestrator: CompactionOrchestrator<crate::table::InMemoryTableStore, FixedExecutor>,
        provider: Arc<InMemoryLockProvider>,
        table: TableIdentifier,
        _root: tempfile::TempDir,
    }

    fn fixture(executor: FixedExecutor, segments: Vec<Segment>) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let table = TableIdentifier::new("db", "orders");
        let store = crate::table::InMemoryTableStore::new();
        store
            .insert_table(
                Table::new(table.clone(), root.path().join("orders")).with_segments(segments),
            )
            .unwrap();
        let provider = Arc::new(InMemoryLockProvider::new());
        let options = CompactionOptions::from(root.path().join("system"))
            .lock_retries(1)
            .minor_segment_count(2);
        Fixture {
            orchestrator: CompactionOrchestrator::new(
                Arc::new(store),
                Arc::new(executor),
                LockManager::new(provider.clone()),
                options,
            ),
            provider,
            table,
            _root: root,
        }
    }

    fn success(id: u64, size: u64) -> Segment {
        Segment::new(SegmentId::new(id), SegmentStatus::Success, size, id)
    }

    #[tokio::test]
    async fn minor_merge_publishes_output_segment() {
        let fx = fixture(FixedExecutor::default(), vec![success(0, 10), success(1, 20)]);
        let status = fx
            .orchestrator
            .compact(
                CompactionRequest::new(fx.table.clone(), CompactionKind::Minor)
                    .with_fact_timestamp(7),
                &CompactionContext::default(),
            )
            .await
            .unwrap();
        let CompactionStatus::Completed { merged: Some(output) } = status else {
            panic!("unexpected status {status:?}");
        };

        let table = fx.orchestrator.store().table(&fx.table).await.unwrap();
        let merged = table.segment(output).unwrap();
        assert_eq!(merged.status(), SegmentStatus::Success);
        assert_eq!(merged.size_bytes(), 30);
        assert_eq!(merged.compaction_level(), 1);
        assert_eq!(merged.created_at_ms(), 7);
        for id in [0, 1] {
            let input = table.segment(SegmentId::new(id)).unwrap();
            assert_eq!(input.status(), SegmentStatus::Compacted);
            assert_eq!(input.merged_into(), Some(output));
        }
        let key = LockKey::table_compaction(&fx.table);
        assert_eq!(fx.provider.release_count(&key), 1);
        assert!(!fx.orchestrator.locks().is_locked(&key).unwrap());
    }

    #[tokio::test]
    async fn nothing_eligible_completes_without_merge() {
        let fx = fixture(FixedExecutor::default(), vec![success(0, 10)]);
        let status = fx
            .orchestrator
            .compact(
                CompactionRequest::new(fx.table.clone(), CompactionKind::Major),
                &CompactionContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(status, CompactionStatus::Completed { merged: None });
        assert_eq!(fx.orchestrator.executor().executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn listener_veto_before_status_update_releases_lock() {
        let fx = fixture(FixedExecutor::default(), vec![success(0, 10), success(1, 20)]);
        let events = Arc::new(EventBus::new());
        events.register_fn(|event: &OperationEvent<'_>, _: &mut OperationContext| {
            if event.phase() == EventPhase::PreStatusUpdate {
                return Err(ListenerError::new("vetoed"));
            }
            Ok(())
        });

        let err = fx
            .orchestrator
            .compact(
                CompactionRequest::new(fx.table.clone(), CompactionKind::Minor),
                &CompactionContext::new(events),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CompactionError::Listener(_)));

        let table = fx.orchestrator.store().table(&fx.table).await.unwrap();
        assert!(table
            .segments()
            .iter()
            .all(|segment| segment.status() == SegmentStatus::Success));
        let key = LockKey::table_compaction(&fx.table);
        assert_eq!(fx.provider.release_count(&key), 1);
    }

    #[tokio::test]
    async fn delta_compaction_uses_supplied_segments() {
        let fx = fixture(
            FixedExecutor::default(),
            vec![success(0, 10), success(1, 20), success(2, 40)],
        );
        let update = UpdateStatusContext::new(vec![success(1, 20), success(2, 40)], 99);
        let status = fx
            .orchestrator
            .compact(
                CompactionRequest::new(fx.table.clone(), CompactionKind::IudUpdDelDelta)
                    .with_update_status(update),
                &CompactionContext::default(),
            )
            .await
            .unwrap();
        let CompactionStatus::Completed { merged: Some(output) } = status else {
            panic!("unexpected status {status:?}");
        };

        let table = fx.orchestrator.store().table(&fx.table).await.unwrap();
        assert_eq!(
            table.segment(SegmentId::new(0)).unwrap().status(),
            SegmentStatus::Success
        );
        assert_eq!(
            table.segment(SegmentId::new(2)).unwrap().merged_into(),
            Some(output)
        );
        assert_eq!(table.segment(output).unwrap().created_at_ms(), 99);
    }

    #[tokio::test]
    async fn delta_compaction_requires_update_context() {
        let fx = fixture(FixedExecutor::default(), vec![success(0, 10)]);
        let err = fx
            .orchestrator
            .compact(
                CompactionRequest::new(fx.table.clone(), CompactionKind::IudUpdDelDelta),
                &CompactionContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CompactionError::InvalidRequest(_)));
        assert_eq!(
            fx.provider
                .release_count(&LockKey::table_compaction(&fx.table)),
            0
        );
    }

    #[tokio::test]
    async fn segment_index_records_index_files() {
        let fx = fixture(FixedExecutor::default(), vec![success(0, 10), success(1, 20)]);
        let phases = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(EventBus::new());
        let seen = Arc::clone(&phases);
        events.register_fn(move |event: &OperationEvent<'_>, _: &mut OperationContext| {
            seen.lock().unwrap().push(event.phase());
            Ok(())
        });

        let status = fx
            .orchestrator
            .compact(
                CompactionRequest::new(fx.table.clone(), CompactionKind::SegmentIndex),
                &CompactionContext::new(events),
            )
            .await
            .unwrap();
        assert_eq!(
            status,
            CompactionStatus::IndexMerged {
                segments: vec![SegmentId::new(0), SegmentId::new(1)]
            }
        );
        assert_eq!(
            *phases.lock().unwrap(),
            vec![EventPhase::Pre, EventPhase::PreStatusUpdate, EventPhase::Post]
        );
        let table = fx.orchestrator.store().table(&fx.table).await.unwrap();
        assert_eq!(
            table.segment(SegmentId::new(1)).unwrap().index_file(),
            Some("1.index")
        );
        assert_eq!(fx.orchestrator.executor().executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn streaming_kinds_require_streaming_table() {
        let fx = fixture(FixedExecutor::default(), vec![success(0, 10)]);
        for kind in [CompactionKind::Streaming, CompactionKind::CloseStreaming] {
            let err = fx
                .orchestrator
                .compact(
                    CompactionRequest::new(fx.table.clone(), kind),
                    &CompactionContext::default(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, CompactionError::InvalidRequest(_)), "{kind}");
        }
    }
}
