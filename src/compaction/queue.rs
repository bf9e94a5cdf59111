//! Persisted compaction request markers.
//!
//! When compactions are serialized system-wide, a request that cannot obtain
//! the global lock leaves a marker file behind. Whoever holds the lock sweeps
//! the markers after its own compaction. File names sort in creation order, so
//! discovery is FIFO.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::fs;
use ulid::Ulid;

use crate::{
    compaction::{request::now_ms, CompactionError, CompactionKind},
    table::TableIdentifier,
};

const MARKER_SUFFIX: &str = "marker";

/// A pending compaction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionMarker {
    path: PathBuf,
    table: TableIdentifier,
    kind: CompactionKind,
}

impl CompactionMarker {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &TableIdentifier {
        &self.table
    }

    pub fn kind(&self) -> CompactionKind {
        self.kind
    }
}

/// Directory of request markers.
#[derive(Debug, Clone)]
pub struct CompactionQueue {
    dir: PathBuf,
}

fn queue_error(path: &Path, source: io::Error) -> CompactionError {
    CompactionError::RequestQueue {
        path: path.to_path_buf(),
        source,
    }
}

fn encode(table: &TableIdentifier, kind: CompactionKind) -> String {
    format!(
        "database={}\ntable={}\nkind={}\n",
        table.database(),
        table.name(),
        kind
    )
}

fn decode(contents: &str) -> Option<(TableIdentifier, CompactionKind)> {
    let mut database = None;
    let mut table = None;
    let mut kind = None;
    for line in contents.lines() {
        match line.split_once('=') {
            Some(("database", value)) => database = Some(value),
            Some(("table", value)) => table = Some(value),
            Some(("kind", value)) => kind = value.parse::<CompactionKind>().ok(),
            _ => {}
        }
    }
    Some((TableIdentifier::new(database?, table?), kind?))
}

impl CompactionQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a marker for `table`.
    pub async fn record(
        &self,
        table: &TableIdentifier,
        kind: CompactionKind,
    ) -> Result<CompactionMarker, CompactionError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| queue_error(&self.dir, err))?;
        let path = self
            .dir
            .join(format!("{:020}-{}.{}", now_ms(), Ulid::new(), MARKER_SUFFIX));
        fs::write(&path, encode(table, kind))
            .await
            .map_err(|err| queue_error(&path, err))?;
        Ok(CompactionMarker {
            path,
            table: table.clone(),
            kind,
        })
    }

    /// Pending markers, oldest first. Unreadable markers are skipped.
    pub async fn pending(&self) -> Result<Vec<CompactionMarker>, CompactionError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(queue_error(&self.dir, err)),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| queue_error(&self.dir, err))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(MARKER_SUFFIX) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut markers = Vec::with_capacity(paths.len());
        for path in paths {
            let contents = match fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(queue_error(&path, err)),
            };
            if let Some((table, kind)) = decode(&contents) {
                markers.push(CompactionMarker { path, table, kind });
            }
        }
        Ok(markers)
    }

    /// Delete a marker once it has been picked up.
    pub async fn remove(&self, marker: &CompactionMarker) -> Result<(), CompactionError> {
        match fs::remove_file(&marker.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(queue_error(&marker.path, err)),
        }
    }
}
