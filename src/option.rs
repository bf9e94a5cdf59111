use std::{path::PathBuf, time::Duration};

use crate::{
    lock::RetryPolicy,
    session::{
        ConfigError, SessionInfo, CONCURRENT_COMPACTION, HANDOFF_INTERVAL_MS, LOCK_RETRIES,
        LOCK_RETRY_INTERVAL_MS, MAJOR_SIZE_THRESHOLD, MINOR_SEGMENT_COUNT,
    },
};

const COMPACTION_REQUEST_DIR: &str = "compaction_requests";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOptions {
    pub(crate) system_root: PathBuf,
    pub(crate) concurrent_compaction: bool,
    pub(crate) lock_retries: u32,
    pub(crate) lock_retry_interval: Duration,
    pub(crate) major_size_threshold: u64,
    pub(crate) minor_segment_count: usize,
    pub(crate) handoff_interval: Duration,
}

impl<P> From<P> for CompactionOptions
where
    P: Into<PathBuf>,
{
    fn from(system_root: P) -> Self {
        CompactionOptions {
            system_root: system_root.into(),
            concurrent_compaction: true,
            lock_retries: 3,
            lock_retry_interval: Duration::from_secs(5),
            major_size_threshold: 1024 * 1024 * 1024,
            minor_segment_count: 4,
            handoff_interval: Duration::from_secs(30),
        }
    }
}

impl CompactionOptions {
    pub fn system_root(self, system_root: impl Into<PathBuf>) -> Self {
        CompactionOptions {
            system_root: system_root.into(),
            ..self
        }
    }

    pub fn concurrent_compaction(self, concurrent_compaction: bool) -> Self {
        CompactionOptions {
            concurrent_compaction,
            ..self
        }
    }

    pub fn lock_retries(self, lock_retries: u32) -> Self {
        CompactionOptions {
            lock_retries: lock_retries.max(1),
            ..self
        }
    }

    pub fn lock_retry_interval(self, lock_retry_interval: Duration) -> Self {
        CompactionOptions {
            lock_retry_interval,
            ..self
        }
    }

    pub fn major_size_threshold(self, major_size_threshold: u64) -> Self {
        CompactionOptions {
            major_size_threshold,
            ..self
        }
    }

    pub fn minor_segment_count(self, minor_segment_count: usize) -> Self {
        CompactionOptions {
            minor_segment_count: minor_segment_count.max(1),
            ..self
        }
    }

    pub fn handoff_interval(self, handoff_interval: Duration) -> Self {
        CompactionOptions {
            handoff_interval,
            ..self
        }
    }

    /// Apply overrides carried by a session. Thread parameters win over session parameters.
    pub fn with_session(&self, session: &SessionInfo) -> Result<Self, ConfigError> {
        let mut options = self.clone();
        if let Some(value) = session.get(CONCURRENT_COMPACTION) {
            options.concurrent_compaction = parse(CONCURRENT_COMPACTION, value)?;
        }
        if let Some(value) = session.get(LOCK_RETRIES) {
            options = options.lock_retries(parse(LOCK_RETRIES, value)?);
        }
        if let Some(value) = session.get(LOCK_RETRY_INTERVAL_MS) {
            options.lock_retry_interval =
                Duration::from_millis(parse(LOCK_RETRY_INTERVAL_MS, value)?);
        }
        if let Some(value) = session.get(MAJOR_SIZE_THRESHOLD) {
            options.major_size_threshold = parse(MAJOR_SIZE_THRESHOLD, value)?;
        }
        if let Some(value) = session.get(MINOR_SEGMENT_COUNT) {
            options = options.minor_segment_count(parse(MINOR_SEGMENT_COUNT, value)?);
        }
        if let Some(value) = session.get(HANDOFF_INTERVAL_MS) {
            options.handoff_interval = Duration::from_millis(parse(HANDOFF_INTERVAL_MS, value)?);
        }
        Ok(options)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl CompactionOptions {
    pub(crate) fn lock_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.lock_retries, self.lock_retry_interval)
    }

    pub(crate) fn request_marker_dir(&self) -> PathBuf {
        self.system_root.join(COMPACTION_REQUEST_DIR)
    }

    pub fn is_concurrent_compaction(&self) -> bool {
        self.concurrent_compaction
    }
}
