//! Common test utilities for integration tests.
#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use segment_compaction::{
    compaction::{ExecutorError, IndexMerge, MergeExecutor, MergePlan, MergedSegment},
    lock::{LockManager, LockProvider},
    table::{InMemoryTableStore, Segment, SegmentId, SegmentStatus, Table, TableIdentifier},
    CompactionOptions, CompactionOrchestrator,
};
use tokio::sync::Barrier;

pub type Orchestrator = CompactionOrchestrator<InMemoryTableStore, RecordingExecutor>;

/// Merge executor that records what it was asked to do.
#[derive(Default)]
pub struct RecordingExecutor {
    failure: Option<String>,
    delay: Duration,
    barrier: Option<Arc<Barrier>>,
    handoff_budget: Mutex<Option<usize>>,
    merges: Mutex<Vec<(TableIdentifier, Vec<SegmentId>)>>,
    handoffs: Mutex<Vec<SegmentId>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every merge and index merge with `message`.
    pub fn failing(self, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..self
        }
    }

    /// Hold every merge for `delay` before finishing.
    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    /// Make every merge wait on `barrier` before finishing.
    pub fn with_barrier(self, barrier: Arc<Barrier>) -> Self {
        Self {
            barrier: Some(barrier),
            ..self
        }
    }

    /// Allow `budget` more hand-offs before failing; `None` never fails.
    pub fn set_handoff_budget(&self, budget: Option<usize>) {
        *self.handoff_budget.lock().unwrap() = budget;
    }

    pub fn merges(&self) -> Vec<(TableIdentifier, Vec<SegmentId>)> {
        self.merges.lock().unwrap().clone()
    }

    pub fn handoffs(&self) -> Vec<SegmentId> {
        self.handoffs.lock().unwrap().clone()
    }

    /// Highest number of merges observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl MergeExecutor for RecordingExecutor {
    async fn execute(
        &self,
        table: &Table,
        plan: &MergePlan,
        _output: SegmentId,
    ) -> Result<MergedSegment, ExecutorError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.merges
            .lock()
            .unwrap()
            .push((table.id().clone(), plan.segment_ids()));

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.failure {
            Some(message) => Err(ExecutorError::new(message.clone())),
            None => Ok(MergedSegment {
                size_bytes: plan.total_size(),
            }),
        }
    }

    async fn merge_index(
        &self,
        _table: &Table,
        segments: &[Segment],
    ) -> Result<Vec<IndexMerge>, ExecutorError> {
        if let Some(message) = &self.failure {
            return Err(ExecutorError::new(message.clone()));
        }
        Ok(segments
            .iter()
            .map(|segment| IndexMerge {
                segment: segment.id(),
                index_file: format!("{}.mergeindex", segment.id()),
            })
            .collect())
    }

    async fn handoff(
        &self,
        _table: &Table,
        segment: &Segment,
        _output: SegmentId,
    ) -> Result<MergedSegment, ExecutorError> {
        {
            let mut budget = self.handoff_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => return Err(ExecutorError::new("executor lost during hand-off")),
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }
        self.handoffs.lock().unwrap().push(segment.id());
        Ok(MergedSegment {
            size_bytes: segment.size_bytes(),
        })
    }
}

pub fn table_id(name: &str) -> TableIdentifier {
    TableIdentifier::new("sales", name)
}

pub fn segment(id: u64, status: SegmentStatus) -> Segment {
    Segment::new(SegmentId::new(id), status, 10, 1_000 + id)
}

/// Options tuned for tests: short retry interval, two-segment minor compaction.
pub fn test_options(root: &Path) -> CompactionOptions {
    CompactionOptions::from(root.join("system"))
        .lock_retries(2)
        .lock_retry_interval(Duration::from_millis(10))
        .minor_segment_count(2)
        .handoff_interval(Duration::from_millis(20))
}

/// Register `name` under `root` with the given segments.
pub fn add_table(
    store: &InMemoryTableStore,
    root: &Path,
    name: &str,
    streaming: bool,
    segments: Vec<Segment>,
) -> Table {
    let table = Table::new(table_id(name), root.join(name))
        .with_streaming(streaming)
        .with_segments(segments);
    store.insert_table(table.clone()).expect("insert table");
    table
}

pub fn orchestrator(
    store: Arc<InMemoryTableStore>,
    executor: Arc<RecordingExecutor>,
    provider: Arc<dyn LockProvider>,
    options: CompactionOptions,
) -> Orchestrator {
    CompactionOrchestrator::new(store, executor, LockManager::new(provider), options)
}

pub fn statuses(table: &Table) -> Vec<(u64, SegmentStatus)> {
    table
        .segments()
        .iter()
        .map(|segment| (segment.id().get(), segment.status()))
        .collect()
}
