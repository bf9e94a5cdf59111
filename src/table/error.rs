use thiserror::Error;

use super::{SegmentId, SegmentStatus, TableIdentifier};

/// Errors surfaced by a [`TableStore`](super::TableStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table {0} does not exist")]
    TableNotFound(TableIdentifier),
    #[error("segment {segment} does not exist in table {table}")]
    SegmentNotFound {
        table: TableIdentifier,
        segment: SegmentId,
    },
    #[error("segment {segment} of table {table} is {actual}, expected {expected}")]
    UnexpectedStatus {
        table: TableIdentifier,
        segment: SegmentId,
        expected: SegmentStatus,
        actual: SegmentStatus,
    },
    #[error("table metadata io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("table metadata error: {0}")]
    Unexpected(String),
}
