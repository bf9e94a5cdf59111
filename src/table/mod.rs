//! Table and segment metadata model.
//!
//! A table owns an ordered set of segments. Segments are never removed from the
//! metadata history; compaction and hand-off only move them through
//! [`SegmentStatus`] values and append new segments.

mod error;
mod store;

use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
};

pub use error::StoreError;
pub use store::{InMemoryTableStore, TableStore};

/// Directory (relative to the table root) holding streaming ingestion state.
pub const STREAMING_DIR: &str = ".streaming";
const STREAMING_CHECKPOINT_DIR: &str = "checkpoint";
const STREAMING_LOG_DIR: &str = "log";

/// Fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableIdentifier {
    database: String,
    name: String,
}

impl TableIdentifier {
    /// Build an identifier from database and table names.
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
        }
    }

    /// Database the table belongs to.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Table name within its database.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for TableIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.name)
    }
}

/// Load sequence number of a segment. Ordering follows ingestion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(u64);

impl SegmentId {
    /// Wrap a raw load sequence number.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw load sequence number.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl Display for SegmentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentStatus {
    /// Data is still being written by a batch load.
    Loading,
    /// Finalized batch segment, visible to queries and eligible for compaction.
    Success,
    /// Open streaming segment receiving rows.
    Streaming,
    /// Streaming segment closed for writes and awaiting hand-off.
    StreamingFinish,
    /// Merged into another segment.
    Compacted,
    /// Logically deleted, awaiting physical cleanup.
    MarkedForDelete,
}

impl Display for SegmentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentStatus::Loading => "loading",
            SegmentStatus::Success => "success",
            SegmentStatus::Streaming => "streaming",
            SegmentStatus::StreamingFinish => "streaming_finish",
            SegmentStatus::Compacted => "compacted",
            SegmentStatus::MarkedForDelete => "marked_for_delete",
        };
        f.write_str(name)
    }
}

/// Metadata for one unit of ingested data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub(crate) id: SegmentId,
    pub(crate) status: SegmentStatus,
    pub(crate) size_bytes: u64,
    pub(crate) created_at_ms: u64,
    pub(crate) compaction_level: u32,
    pub(crate) merged_into: Option<SegmentId>,
    pub(crate) index_file: Option<String>,
}

impl Segment {
    /// Build a freshly ingested (level 0) segment.
    pub fn new(id: SegmentId, status: SegmentStatus, size_bytes: u64, created_at_ms: u64) -> Self {
        Self {
            id,
            status,
            size_bytes,
            created_at_ms,
            compaction_level: 0,
            merged_into: None,
            index_file: None,
        }
    }

    /// Set how many compactions produced this segment.
    pub fn with_compaction_level(self, compaction_level: u32) -> Self {
        Self {
            compaction_level,
            ..self
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn status(&self) -> SegmentStatus {
        self.status
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn compaction_level(&self) -> u32 {
        self.compaction_level
    }

    /// Segment this one was merged or handed off into, if any.
    pub fn merged_into(&self) -> Option<SegmentId> {
        self.merged_into
    }

    /// Name of the merged index file written by a segment-index compaction.
    pub fn index_file(&self) -> Option<&str> {
        self.index_file.as_deref()
    }
}

/// Snapshot of a table's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub(crate) id: TableIdentifier,
    pub(crate) location: PathBuf,
    pub(crate) segments: Vec<Segment>,
    pub(crate) streaming: bool,
}

impl Table {
    /// Build a batch table rooted at `location`.
    pub fn new(id: TableIdentifier, location: impl Into<PathBuf>) -> Self {
        Self {
            id,
            location: location.into(),
            segments: Vec::new(),
            streaming: false,
        }
    }

    /// Mark the table as ingesting a live stream.
    pub fn with_streaming(self, streaming: bool) -> Self {
        Self { streaming, ..self }
    }

    /// Replace the segment set.
    pub fn with_segments(self, segments: Vec<Segment>) -> Self {
        Self { segments, ..self }
    }

    pub fn id(&self) -> &TableIdentifier {
        &self.id
    }

    /// Absolute storage location of the table.
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.iter().find(|segment| segment.id == id)
    }

    /// Segments in `status`, ordered by creation (load sequence, then creation time).
    pub fn segments_with_status(&self, status: SegmentStatus) -> Vec<Segment> {
        let mut segments: Vec<Segment> = self
            .segments
            .iter()
            .filter(|segment| segment.status == status)
            .cloned()
            .collect();
        segments.sort_by_key(|segment| (segment.id, segment.created_at_ms));
        segments
    }

    /// Whether any batch load is still writing into the table.
    pub fn has_load_in_progress(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| segment.status == SegmentStatus::Loading)
    }

    /// Directory holding the stream source checkpoint.
    pub fn streaming_checkpoint_dir(&self) -> PathBuf {
        self.location
            .join(STREAMING_DIR)
            .join(STREAMING_CHECKPOINT_DIR)
    }

    /// Directory holding the stream source log.
    pub fn streaming_log_dir(&self) -> PathBuf {
        self.location.join(STREAMING_DIR).join(STREAMING_LOG_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: u64, status: SegmentStatus, created_at_ms: u64) -> Segment {
        Segment::new(SegmentId::new(id), status, 10, created_at_ms)
    }

    #[test]
    fn segments_with_status_are_in_creation_order() {
        let table = Table::new(TableIdentifier::new("db", "t"), "/data/db/t").with_segments(vec![
            segment(3, SegmentStatus::Streaming, 30),
            segment(0, SegmentStatus::Success, 0),
            segment(1, SegmentStatus::Streaming, 10),
        ]);
        let ids: Vec<u64> = table
            .segments_with_status(SegmentStatus::Streaming)
            .iter()
            .map(|s| s.id().get())
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn detects_load_in_progress() {
        let table = Table::new(TableIdentifier::new("db", "t"), "/data/db/t")
            .with_segments(vec![segment(0, SegmentStatus::Success, 0)]);
        assert!(!table.has_load_in_progress());
        let table = table.with_segments(vec![
            segment(0, SegmentStatus::Success, 0),
            segment(1, SegmentStatus::Loading, 1),
        ]);
        assert!(table.has_load_in_progress());
    }

    #[test]
    fn streaming_dirs_are_relative_to_table_root() {
        let table = Table::new(TableIdentifier::new("db", "t"), "/data/db/t");
        assert_eq!(
            table.streaming_checkpoint_dir(),
            PathBuf::from("/data/db/t/.streaming/checkpoint")
        );
        assert_eq!(
            table.streaming_log_dir(),
            PathBuf::from("/data/db/t/.streaming/log")
        );
        assert_eq!(table.id().to_string(), "db.t");
    }
}
