//! Segment selection for merge-based compaction.
//!
//! Candidates are always considered in ascending load sequence, then creation
//! time, so the same metadata yields the same plan on every retry.

use crate::{
    compaction::{CompactionKind, TriggerSource},
    table::{Segment, SegmentId, SegmentStatus, TableIdentifier},
};

/// Inputs the planner needs beyond the candidate segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanRequest {
    pub(crate) kind: CompactionKind,
    /// Size budget in bytes for major compaction; `0` means unlimited.
    pub(crate) size_threshold: u64,
    /// Level-0 segments merged by one minor compaction.
    pub(crate) minor_segment_count: usize,
    pub(crate) partitions: Vec<String>,
    pub(crate) fact_timestamp_ms: u64,
    pub(crate) trigger: TriggerSource,
}

impl PlanRequest {
    pub fn new(kind: CompactionKind, size_threshold: u64, minor_segment_count: usize) -> Self {
        Self {
            kind,
            size_threshold,
            minor_segment_count: minor_segment_count.max(1),
            partitions: Vec::new(),
            fact_timestamp_ms: 0,
            trigger: TriggerSource::Ddl,
        }
    }

    pub fn kind(&self) -> CompactionKind {
        self.kind
    }

    pub fn size_threshold(&self) -> u64 {
        self.size_threshold
    }

    pub fn minor_segment_count(&self) -> usize {
        self.minor_segment_count
    }
}

/// Segments chosen for one merge, with the request context the executor needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergePlan {
    pub(crate) kind: CompactionKind,
    pub(crate) segments: Vec<Segment>,
    pub(crate) partitions: Vec<String>,
    pub(crate) fact_timestamp_ms: u64,
    pub(crate) trigger: TriggerSource,
}

impl MergePlan {
    /// Build a plan over `segments` carrying the context of `request`.
    pub fn new(request: &PlanRequest, segments: Vec<Segment>) -> Self {
        Self {
            kind: request.kind,
            segments,
            partitions: request.partitions.clone(),
            fact_timestamp_ms: request.fact_timestamp_ms,
            trigger: request.trigger,
        }
    }

    pub fn kind(&self) -> CompactionKind {
        self.kind
    }

    /// Input segments in merge order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().map(Segment::id).collect()
    }

    /// Target partitions; empty means all.
    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    pub fn fact_timestamp_ms(&self) -> u64 {
        self.fact_timestamp_ms
    }

    pub fn trigger(&self) -> TriggerSource {
        self.trigger
    }

    pub fn total_size(&self) -> u64 {
        self.segments.iter().map(Segment::size_bytes).sum()
    }

    /// Compaction level of the segment produced by this plan.
    pub fn output_level(&self) -> u32 {
        let max = self
            .segments
            .iter()
            .map(Segment::compaction_level)
            .max()
            .unwrap_or(0);
        match self.kind {
            CompactionKind::IudUpdDelDelta => max,
            _ => max + 1,
        }
    }
}

/// Load-level details accompanying a status update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadContext {
    pub(crate) table: TableIdentifier,
    pub(crate) kind: CompactionKind,
    pub(crate) output: Option<SegmentId>,
    pub(crate) fact_timestamp_ms: u64,
    pub(crate) trigger: TriggerSource,
}

impl LoadContext {
    pub fn table(&self) -> &TableIdentifier {
        &self.table
    }

    pub fn kind(&self) -> CompactionKind {
        self.kind
    }

    /// Segment about to be published, if the operation writes one.
    pub fn output(&self) -> Option<SegmentId> {
        self.output
    }

    pub fn fact_timestamp_ms(&self) -> u64 {
        self.fact_timestamp_ms
    }

    pub fn trigger(&self) -> TriggerSource {
        self.trigger
    }
}

fn ordered(candidates: &[Segment]) -> Vec<Segment> {
    let mut segments = candidates.to_vec();
    segments.sort_by_key(|segment| (segment.id(), segment.created_at_ms()));
    segments
}

/// Default selection policy used by [`MergeExecutor::plan`](super::MergeExecutor::plan).
///
/// - `Minor`: the earliest `minor_segment_count` level-0 `Success` segments,
///   only once that many exist.
/// - `Major`: the earliest contiguous run of `Success` segments whose total size
///   fits the threshold, at least two segments.
/// - `IudUpdDelDelta`: every supplied segment still in `Success`.
///
/// Other kinds never produce a merge plan.
pub fn plan_merge(candidates: &[Segment], request: &PlanRequest) -> Option<MergePlan> {
    let eligible: Vec<Segment> = ordered(candidates)
        .into_iter()
        .filter(|segment| segment.status() == SegmentStatus::Success)
        .collect();
    let selected = match request.kind {
        CompactionKind::Minor => select_minor(eligible, request.minor_segment_count),
        CompactionKind::Major => select_major(eligible, request.size_threshold),
        CompactionKind::IudUpdDelDelta => eligible,
        CompactionKind::SegmentIndex
        | CompactionKind::Streaming
        | CompactionKind::CloseStreaming => Vec::new(),
    };
    if selected.is_empty() {
        return None;
    }
    Some(MergePlan::new(request, selected))
}

fn select_minor(eligible: Vec<Segment>, count: usize) -> Vec<Segment> {
    let level0: Vec<Segment> = eligible
        .into_iter()
        .filter(|segment| segment.compaction_level() == 0)
        .collect();
    if level0.len() < count.max(2) {
        return Vec::new();
    }
    level0.into_iter().take(count.max(2)).collect()
}

fn select_major(eligible: Vec<Segment>, threshold: u64) -> Vec<Segment> {
    let mut selected: Vec<Segment> = Vec::new();
    let mut total = 0u64;
    for segment in eligible {
        let size = segment.size_bytes();
        if threshold > 0 && total.saturating_add(size) > threshold {
            if selected.len() >= 2 {
                break;
            }
            // Restart the window; a segment larger than the budget on its own is skipped.
            selected.clear();
            total = 0;
            if size > threshold {
                continue;
            }
        }
        total += size;
        selected.push(segment);
    }
    if selected.len() < 2 {
        return Vec::new();
    }
    selected
}
