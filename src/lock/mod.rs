//! Advisory locks serializing compaction and streaming closure.
//!
//! A lock is a named resource ([`LockKey`]) stored by a [`LockProvider`]. The
//! provider is the only concurrency control over segment metadata, so it has to
//! be effective across processes; [`FileLockProvider`] uses create-exclusive
//! lock files for that. [`LockManager`] layers bounded retry on top and hands
//! out [`LockGuard`]s that release exactly once.

mod error;
mod file;
mod memory;

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::Duration,
};

pub use error::LockError;
pub use file::FileLockProvider;
use log::Level;
pub use memory::InMemoryLockProvider;
use ulid::Ulid;

use crate::{
    logging::{compaction_log, LogContext},
    table::TableIdentifier,
};

const SYSTEM_SCOPE: &str = "SYSTEM";

/// What a lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockPurpose {
    /// Compaction of one table, or of every table for the system-wide key.
    Compaction,
    /// Streaming hand-off and closure of one table.
    Streaming,
}

impl LockPurpose {
    /// Name used as the last component of the resource key.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockPurpose::Compaction => "COMPACTION_LOCK",
            LockPurpose::Streaming => "STREAMING_LOCK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockScope {
    Table(TableIdentifier),
    System,
}

/// Resource key of an advisory lock, rendered as `<scope>/<PURPOSE>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    scope: LockScope,
    purpose: LockPurpose,
}

impl LockKey {
    /// `<tableId>/COMPACTION_LOCK`
    pub fn table_compaction(table: &TableIdentifier) -> Self {
        Self {
            scope: LockScope::Table(table.clone()),
            purpose: LockPurpose::Compaction,
        }
    }

    /// `SYSTEM/COMPACTION_LOCK`
    pub fn system_compaction() -> Self {
        Self {
            scope: LockScope::System,
            purpose: LockPurpose::Compaction,
        }
    }

    /// `<tableId>/STREAMING_LOCK`
    pub fn streaming(table: &TableIdentifier) -> Self {
        Self {
            scope: LockScope::Table(table.clone()),
            purpose: LockPurpose::Streaming,
        }
    }

    /// First key component: the table identifier or `SYSTEM`.
    pub fn scope_name(&self) -> String {
        match &self.scope {
            LockScope::Table(table) => table.to_string(),
            LockScope::System => SYSTEM_SCOPE.to_string(),
        }
    }

    pub fn purpose(&self) -> LockPurpose {
        self.purpose
    }

    pub fn is_system(&self) -> bool {
        matches!(self.scope, LockScope::System)
    }
}

impl Display for LockKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope_name(), self.purpose.as_str())
    }
}

/// Storage backend for advisory locks.
///
/// Implementations must guarantee at most one holder per key at a time.
pub trait LockProvider: Send + Sync + 'static {
    /// Try to take `key` for `holder`. Returns `false` when another holder owns it.
    fn try_acquire(&self, key: &LockKey, holder: &str) -> Result<bool, LockError>;

    /// Release `key` if `holder` owns it. Returns `false` when nothing was released.
    fn release(&self, key: &LockKey, holder: &str) -> Result<bool, LockError>;

    /// Whether any holder currently owns `key`.
    fn is_locked(&self, key: &LockKey) -> Result<bool, LockError>;
}

/// Bounded retry used by [`AdvisoryLock::lock_with_retries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one attempt.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// A single attempt without waiting.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Hands out advisory locks on behalf of one holder identity.
#[derive(Clone)]
pub struct LockManager {
    provider: Arc<dyn LockProvider>,
    holder: Arc<str>,
}

impl LockManager {
    /// Create a manager with a fresh, unique holder identity.
    pub fn new(provider: Arc<dyn LockProvider>) -> Self {
        Self::with_holder(provider, format!("{}-{}", std::process::id(), Ulid::new()))
    }

    pub fn with_holder(provider: Arc<dyn LockProvider>, holder: impl Into<String>) -> Self {
        let holder: String = holder.into();
        Self {
            provider,
            holder: holder.into(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn provider(&self) -> &Arc<dyn LockProvider> {
        &self.provider
    }

    /// Describe a lock on `key`; nothing is acquired until
    /// [`AdvisoryLock::lock_with_retries`] is called.
    pub fn lock(&self, key: LockKey, retry: RetryPolicy, log: &LogContext) -> AdvisoryLock {
        let log = log.with("lock", &key);
        AdvisoryLock {
            provider: Arc::clone(&self.provider),
            holder: Arc::clone(&self.holder),
            key,
            retry,
            log,
        }
    }

    /// Whether `key` is currently held by anyone.
    pub fn is_locked(&self, key: &LockKey) -> Result<bool, LockError> {
        self.provider.is_locked(key)
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

/// A not-yet-acquired lock on one resource key.
pub struct AdvisoryLock {
    provider: Arc<dyn LockProvider>,
    holder: Arc<str>,
    key: LockKey,
    retry: RetryPolicy,
    log: LogContext,
}

impl AdvisoryLock {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Attempt acquisition up to the retry budget, sleeping between attempts.
    ///
    /// `None` means the lock could not be acquired; the caller must not proceed.
    pub async fn lock_with_retries(&self) -> Option<LockGuard> {
        let attempts = self.retry.max_attempts();
        for attempt in 1..=attempts {
            match self.provider.try_acquire(&self.key, &self.holder) {
                Ok(true) => {
                    compaction_log!(
                        Level::Debug,
                        ctx: &self.log,
                        "lock_acquired",
                        "attempt={attempt}"
                    );
                    return Some(LockGuard {
                        provider: Arc::clone(&self.provider),
                        holder: Arc::clone(&self.holder),
                        key: self.key.clone(),
                        log: self.log.clone(),
                        released: false,
                    });
                }
                Ok(false) => {
                    compaction_log!(
                        Level::Debug,
                        ctx: &self.log,
                        "lock_busy",
                        "attempt={attempt} max_attempts={attempts}"
                    );
                }
                Err(err) => {
                    compaction_log!(
                        Level::Warn,
                        ctx: &self.log,
                        "lock_error",
                        "attempt={attempt} max_attempts={attempts} error={err}"
                    );
                }
            }
            if attempt < attempts && !self.retry.interval().is_zero() {
                tokio::time::sleep(self.retry.interval()).await;
            }
        }
        compaction_log!(
            Level::Info,
            ctx: &self.log,
            "lock_unavailable",
            "gave up after {attempts} attempt(s)"
        );
        None
    }
}

/// An acquired advisory lock.
///
/// Released by [`LockGuard::unlock`], or on drop when the owning scope exits
/// any other way. Either path releases exactly once.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct LockGuard {
    provider: Arc<dyn LockProvider>,
    holder: Arc<str>,
    key: LockKey,
    log: LogContext,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Release the lock, returning whether the provider confirmed the release.
    ///
    /// Release failures are logged, never escalated.
    pub fn unlock(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        match self.provider.release(&self.key, &self.holder) {
            Ok(true) => {
                compaction_log!(Level::Debug, ctx: &self.log, "lock_released", "ok");
                true
            }
            Ok(false) => {
                compaction_log!(
                    Level::Error,
                    ctx: &self.log,
                    "lock_release_failed",
                    "lock was not held by {}",
                    self.holder
                );
                false
            }
            Err(err) => {
                compaction_log!(
                    Level::Error,
                    ctx: &self.log,
                    "lock_release_failed",
                    "error={err}"
                );
                false
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.release();
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("holder", &self.holder)
            .field("released", &self.released)
            .finish()
    }
}
