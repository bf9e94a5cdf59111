use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    compaction::CompactionError,
    streaming::CloseStreamingReport,
    table::{Segment, SegmentId, TableIdentifier},
};

/// Closed set of compaction strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompactionKind {
    /// Merge the earliest run of freshly ingested segments.
    Minor,
    /// Merge segments in load order up to a size budget.
    Major,
    /// Merge the segments touched by a preceding update/delete.
    IudUpdDelDelta,
    /// Merge index metadata of valid segments without rewriting data.
    SegmentIndex,
    /// Start the background hand-off monitor of a streaming table.
    Streaming,
    /// Hand off all streaming segments and turn the table into a batch table.
    CloseStreaming,
}

impl CompactionKind {
    pub const ALL: [CompactionKind; 6] = [
        CompactionKind::Minor,
        CompactionKind::Major,
        CompactionKind::IudUpdDelDelta,
        CompactionKind::SegmentIndex,
        CompactionKind::Streaming,
        CompactionKind::CloseStreaming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionKind::Minor => "MINOR",
            CompactionKind::Major => "MAJOR",
            CompactionKind::IudUpdDelDelta => "IUD_UPDDEL_DELTA",
            CompactionKind::SegmentIndex => "SEGMENT_INDEX",
            CompactionKind::Streaming => "STREAMING",
            CompactionKind::CloseStreaming => "CLOSE_STREAMING",
        }
    }

    /// Whether the strategy requires a streaming table.
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            CompactionKind::Streaming | CompactionKind::CloseStreaming
        )
    }
}

impl Display for CompactionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompactionKind {
    type Err = CompactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        CompactionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| CompactionError::UnknownCompactionType(s.to_string()))
    }
}

/// Who asked for the compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TriggerSource {
    /// An explicit user command.
    #[default]
    Ddl,
    /// Automatic compaction triggered by the system, e.g. after a load.
    SystemLevel,
}

/// Segment snapshot handed over by a preceding update/delete.
///
/// Delta compaction works on exactly these segments rather than re-reading
/// metadata, so it stays consistent with the update that produced the deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatusContext {
    segments: Vec<Segment>,
    update_timestamp_ms: u64,
}

impl UpdateStatusContext {
    pub fn new(segments: Vec<Segment>, update_timestamp_ms: u64) -> Self {
        Self {
            segments,
            update_timestamp_ms,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn update_timestamp_ms(&self) -> u64 {
        self.update_timestamp_ms
    }
}

/// A request to run one compaction strategy on one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionRequest {
    table: TableIdentifier,
    kind: CompactionKind,
    size_threshold: Option<u64>,
    trigger: TriggerSource,
    fact_timestamp_ms: Option<u64>,
    update_status: Option<UpdateStatusContext>,
    partitions: Vec<String>,
}

impl CompactionRequest {
    pub fn new(table: TableIdentifier, kind: CompactionKind) -> Self {
        Self {
            table,
            kind,
            size_threshold: None,
            trigger: TriggerSource::Ddl,
            fact_timestamp_ms: None,
            update_status: None,
            partitions: Vec::new(),
        }
    }

    /// Resolve a compaction type string (case-insensitive) into a request.
    pub fn parse(table: TableIdentifier, kind: &str) -> Result<Self, CompactionError> {
        Ok(Self::new(table, kind.parse()?))
    }

    /// Size budget in bytes; `0` means unlimited. Without it the configured default applies.
    pub fn with_size_threshold(self, size_threshold: u64) -> Self {
        Self {
            size_threshold: Some(size_threshold),
            ..self
        }
    }

    pub fn with_trigger(self, trigger: TriggerSource) -> Self {
        Self { trigger, ..self }
    }

    pub fn with_fact_timestamp(self, fact_timestamp_ms: u64) -> Self {
        Self {
            fact_timestamp_ms: Some(fact_timestamp_ms),
            ..self
        }
    }

    pub fn with_update_status(self, update_status: UpdateStatusContext) -> Self {
        Self {
            update_status: Some(update_status),
            ..self
        }
    }

    /// Restrict the merge to these partitions; empty means all.
    pub fn with_partitions(self, partitions: Vec<String>) -> Self {
        Self { partitions, ..self }
    }

    pub fn table(&self) -> &TableIdentifier {
        &self.table
    }

    pub fn kind(&self) -> CompactionKind {
        self.kind
    }

    pub fn size_threshold(&self) -> Option<u64> {
        self.size_threshold
    }

    pub fn trigger(&self) -> TriggerSource {
        self.trigger
    }

    pub fn fact_timestamp_ms(&self) -> Option<u64> {
        self.fact_timestamp_ms
    }

    pub fn update_status(&self) -> Option<&UpdateStatusContext> {
        self.update_status.as_ref()
    }

    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    /// The explicit fact timestamp, or the current time.
    pub(crate) fn fact_timestamp_or_now(&self) -> u64 {
        self.fact_timestamp_ms.unwrap_or_else(now_ms)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// What a successful [`compact`](crate::CompactionOrchestrator::compact) did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionStatus {
    /// A merge ran; `merged` is the produced segment, `None` when nothing was eligible.
    Completed { merged: Option<SegmentId> },
    /// The system-wide lock was busy; a request marker was recorded for its holder.
    Queued,
    /// A hand-off monitor was started for the table.
    MonitorStarted,
    /// The table already had a live hand-off monitor.
    MonitorAlreadyRunning,
    /// Index files of these segments were merged.
    IndexMerged { segments: Vec<SegmentId> },
    /// The table left streaming mode.
    StreamingClosed(CloseStreamingReport),
}
