use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`LockProvider`](super::LockProvider).
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file {path} io error: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("lock provider state poisoned")]
    Poisoned,
}
