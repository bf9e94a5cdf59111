//! Merge executor contract.
//!
//! The executor owns the physical work: rewriting row groups into a merged
//! segment, merging index files, and converting streaming segments into batch
//! segments. It typically submits that work to a parallel job runner and
//! resolves once the job finished. The orchestrator owns everything else:
//! locking, metadata updates, and events.

use std::future::Future;

use crate::{
    compaction::planner::{plan_merge, MergePlan, PlanRequest},
    table::{Segment, SegmentId, Table},
};

/// Physical result of writing one output segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedSegment {
    pub size_bytes: u64,
}

/// Merged index file written for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMerge {
    pub segment: SegmentId,
    pub index_file: String,
}

/// Failure reported by a [`MergeExecutor`].
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExecutorError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ExecutorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for ExecutorError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(err.to_string(), err)
    }
}

/// Performs the data-level work of compaction.
pub trait MergeExecutor: Send + Sync + 'static {
    /// Choose the segments to merge. Defaults to [`plan_merge`].
    fn plan(&self, candidates: &[Segment], request: &PlanRequest) -> Option<MergePlan> {
        plan_merge(candidates, request)
    }

    /// Merge the plan's segments into a new segment with id `output`.
    fn execute(
        &self,
        table: &Table,
        plan: &MergePlan,
        output: SegmentId,
    ) -> impl Future<Output = Result<MergedSegment, ExecutorError>> + Send;

    /// Merge per-segment index files of already-valid segments without touching data.
    fn merge_index(
        &self,
        table: &Table,
        segments: &[Segment],
    ) -> impl Future<Output = Result<Vec<IndexMerge>, ExecutorError>> + Send;

    /// Convert one finished streaming segment into batch segment `output`.
    fn handoff(
        &self,
        table: &Table,
        segment: &Segment,
        output: SegmentId,
    ) -> impl Future<Output = Result<MergedSegment, ExecutorError>> + Send;
}
