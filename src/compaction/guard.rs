//! Rejects compaction requests that race with an in-progress load.
//!
//! The check reads a metadata snapshot without holding a lock, so a load that
//! starts right after it is not detected. Overlapping compactions are excluded
//! by the compaction locks, not by this check.

use crate::{compaction::CompactionError, table::Table};

/// Fail with [`CompactionError::ConcurrentOperation`] when any segment is still loading.
pub fn validate(table: &Table) -> Result<(), CompactionError> {
    if table.has_load_in_progress() {
        return Err(CompactionError::ConcurrentOperation {
            table: table.id().clone(),
        });
    }
    Ok(())
}
