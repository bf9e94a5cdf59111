use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use super::{LockError, LockKey, LockProvider};

/// Process-local [`LockProvider`].
///
/// Only serializes callers sharing the same instance; use
/// [`FileLockProvider`](super::FileLockProvider) when several processes touch
/// the same tables.
#[derive(Debug, Default)]
pub struct InMemoryLockProvider {
    inner: Mutex<MemoryLocks>,
}

#[derive(Debug, Default)]
struct MemoryLocks {
    holders: HashMap<LockKey, String>,
    releases: HashMap<LockKey, usize>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful releases recorded for `key`.
    pub fn release_count(&self, key: &LockKey) -> usize {
        self.locks()
            .map(|locks| locks.releases.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Current holder of `key`, if any.
    pub fn holder_of(&self, key: &LockKey) -> Option<String> {
        self.locks()
            .ok()
            .and_then(|locks| locks.holders.get(key).cloned())
    }

    fn locks(&self) -> Result<MutexGuard<'_, MemoryLocks>, LockError> {
        self.inner.lock().map_err(|_| LockError::Poisoned)
    }
}

impl LockProvider for InMemoryLockProvider {
    fn try_acquire(&self, key: &LockKey, holder: &str) -> Result<bool, LockError> {
        let mut locks = self.locks()?;
        if locks.holders.contains_key(key) {
            return Ok(false);
        }
        locks.holders.insert(key.clone(), holder.to_string());
        Ok(true)
    }

    fn release(&self, key: &LockKey, holder: &str) -> Result<bool, LockError> {
        let mut locks = self.locks()?;
        match locks.holders.get(key) {
            Some(current) if current == holder => {
                locks.holders.remove(key);
                *locks.releases.entry(key.clone()).or_insert(0) += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn is_locked(&self, key: &LockKey) -> Result<bool, LockError> {
        Ok(self.locks()?.holders.contains_key(key))
    }
}
