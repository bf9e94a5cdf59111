use std::path::PathBuf;

use thiserror::Error;

use crate::{
    compaction::ExecutorError,
    event::ListenerError,
    lock::{LockKey, LockPurpose},
    session::ConfigError,
    table::{StoreError, TableIdentifier},
};

/// User-facing compaction failure. `Display` is a single line.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// A load is writing into the table; detected before any lock is taken.
    #[error("concurrent load in progress on table {table}, compaction is not allowed")]
    ConcurrentOperation { table: TableIdentifier },
    /// The lock retry budget was exhausted.
    #[error("{}", lock_unavailable_message(.key))]
    LockUnavailable { key: LockKey },
    #[error("unknown compaction type: {0}")]
    UnknownCompactionType(String),
    /// The merge executor failed; its message is preserved.
    #[error("compaction execution failed: {0}")]
    ExecutionFailure(#[source] ExecutorError),
    /// Closing a streaming table failed while writing status.
    #[error("close streaming failed on table {table} while {step}: {source}")]
    HandoffIo {
        table: TableIdentifier,
        step: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("compaction listener failed: {0}")]
    Listener(#[from] ListenerError),
    #[error("table metadata error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid compaction configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid compaction request: {0}")]
    InvalidRequest(String),
    #[error("compaction request queue error at {path}: {source}")]
    RequestQueue {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn lock_unavailable_message(key: &LockKey) -> String {
    match (key.purpose(), key.is_system()) {
        (LockPurpose::Compaction, true) => {
            "system is already locked for compaction, please try after some time".to_string()
        }
        (LockPurpose::Compaction, false) => format!(
            "table {} is already locked for compaction, please try after some time",
            key.scope_name()
        ),
        (LockPurpose::Streaming, _) => format!(
            "table {} is already locked by another streaming operation, please try after some \
             time",
            key.scope_name()
        ),
    }
}
