//! Segment metadata store seam.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Mutex, MutexGuard},
};

use super::{Segment, SegmentId, SegmentStatus, StoreError, Table, TableIdentifier};

/// Persistent segment metadata for a set of tables.
///
/// Every mutation is applied atomically on its own: a crash between two calls
/// leaves the store in the state produced by the calls that returned. The store
/// performs no locking of its own across calls; callers hold the advisory lock
/// that covers the mutation.
pub trait TableStore: Send + Sync + 'static {
    /// Read the latest snapshot of a table.
    fn table(
        &self,
        table: &TableIdentifier,
    ) -> impl Future<Output = Result<Table, StoreError>> + Send;

    /// Reserve the next load sequence number for a segment that is about to be written.
    fn allocate_segment_id(
        &self,
        table: &TableIdentifier,
    ) -> impl Future<Output = Result<SegmentId, StoreError>> + Send;

    /// Move one segment from `from` to `to`.
    fn update_segment_status(
        &self,
        table: &TableIdentifier,
        segment: SegmentId,
        from: SegmentStatus,
        to: SegmentStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Publish a merge: `inputs` become `Compacted` into `output`, which is appended.
    fn commit_merge(
        &self,
        table: &TableIdentifier,
        inputs: &[SegmentId],
        output: Segment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Publish a hand-off: the `StreamingFinish` segment `source` is replaced by `output`.
    fn commit_handoff(
        &self,
        table: &TableIdentifier,
        source: SegmentId,
        output: Segment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Record merged index files for already-valid segments.
    fn commit_index_merge(
        &self,
        table: &TableIdentifier,
        merged: &[(SegmentId, String)],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Update the table's streaming property.
    fn set_streaming(
        &self,
        table: &TableIdentifier,
        streaming: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// In-process [`TableStore`] keeping metadata in memory.
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    tables: HashMap<TableIdentifier, Table>,
    next_ids: HashMap<TableIdentifier, u64>,
}

impl StoreInner {
    fn table_mut(&mut self, id: &TableIdentifier) -> Result<&mut Table, StoreError> {
        self.tables
            .get_mut(id)
            .ok_or_else(|| StoreError::TableNotFound(id.clone()))
    }
}

fn segment_mut<'a>(
    table: &'a mut Table,
    segment: SegmentId,
) -> Result<&'a mut Segment, StoreError> {
    let id = table.id.clone();
    table
        .segments
        .iter_mut()
        .find(|s| s.id == segment)
        .ok_or(StoreError::SegmentNotFound { table: id, segment })
}

fn expect_status(
    table: &TableIdentifier,
    segment: &Segment,
    expected: SegmentStatus,
) -> Result<(), StoreError> {
    if segment.status != expected {
        return Err(StoreError::UnexpectedStatus {
            table: table.clone(),
            segment: segment.id,
            expected,
            actual: segment.status,
        });
    }
    Ok(())
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a table.
    pub fn insert_table(&self, table: Table) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let next = table
            .segments
            .iter()
            .map(|s| s.id.get() + 1)
            .max()
            .unwrap_or(0);
        let slot = inner.next_ids.entry(table.id.clone()).or_insert(0);
        *slot = (*slot).max(next);
        inner.tables.insert(table.id.clone(), table);
        Ok(())
    }

    /// Append a segment to an existing table, as an ingestion path would.
    pub fn add_segment(&self, table: &TableIdentifier, segment: Segment) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let next = segment.id.get() + 1;
        inner.table_mut(table)?.segments.push(segment);
        let slot = inner.next_ids.entry(table.clone()).or_insert(0);
        *slot = (*slot).max(next);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unexpected("table store mutex poisoned".into()))
    }
}

impl TableStore for InMemoryTableStore {
    async fn table(&self, table: &TableIdentifier) -> Result<Table, StoreError> {
        let inner = self.lock()?;
        inner
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))
    }

    async fn allocate_segment_id(&self, table: &TableIdentifier) -> Result<SegmentId, StoreError> {
        let mut inner = self.lock()?;
        if !inner.tables.contains_key(table) {
            return Err(StoreError::TableNotFound(table.clone()));
        }
        let slot = inner.next_ids.entry(table.clone()).or_insert(0);
        let id = SegmentId::new(*slot);
        *slot += 1;
        Ok(id)
    }

    async fn update_segment_status(
        &self,
        table: &TableIdentifier,
        segment: SegmentId,
        from: SegmentStatus,
        to: SegmentStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = segment_mut(inner.table_mut(table)?, segment)?;
        expect_status(table, entry, from)?;
        entry.status = to;
        Ok(())
    }

    async fn commit_merge(
        &self,
        table: &TableIdentifier,
        inputs: &[SegmentId],
        output: Segment,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = inner.table_mut(table)?;
        for id in inputs {
            let segment = segment_mut(entry, *id)?;
            expect_status(table, segment, SegmentStatus::Success)?;
        }
        for id in inputs {
            let segment = segment_mut(entry, *id)?;
            segment.status = SegmentStatus::Compacted;
            segment.merged_into = Some(output.id);
        }
        entry.segments.push(output);
        Ok(())
    }

    async fn commit_handoff(
        &self,
        table: &TableIdentifier,
        source: SegmentId,
        output: Segment,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = inner.table_mut(table)?;
        let segment = segment_mut(entry, source)?;
        expect_status(table, segment, SegmentStatus::StreamingFinish)?;
        segment.status = SegmentStatus::Compacted;
        segment.merged_into = Some(output.id);
        entry.segments.push(output);
        Ok(())
    }

    async fn commit_index_merge(
        &self,
        table: &TableIdentifier,
        merged: &[(SegmentId, String)],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = inner.table_mut(table)?;
        for (id, _) in merged {
            segment_mut(entry, *id)?;
        }
        for (id, index_file) in merged {
            segment_mut(entry, *id)?.index_file = Some(index_file.clone());
        }
        Ok(())
    }

    async fn set_streaming(
        &self,
        table: &TableIdentifier,
        streaming: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.table_mut(table)?.streaming = streaming;
        Ok(())
    }
}
