//! Internal logging helpers for structured compaction events.

use std::{fmt, sync::Arc};

/// Single logging target for the crate.
pub(crate) const LOG_TARGET: &str = "segment_compaction";

/// Common key/value fields appended to every log line emitted in a scope.
///
/// A context is cheap to clone and is carried by
/// [`CompactionContext`](crate::context::CompactionContext), so callers decide
/// which fields (service name, request id, ...) accompany the crate's logs.
#[derive(Clone, Default)]
pub struct LogContext {
    common_kv: Option<Arc<str>>,
}

impl LogContext {
    /// Build a context that appends the provided key/value pairs.
    pub fn new(common_kv: impl Into<String>) -> Self {
        let common_kv: String = common_kv.into();
        if common_kv.is_empty() {
            Self::default()
        } else {
            Self {
                common_kv: Some(common_kv.into()),
            }
        }
    }

    /// Derive a context with one more `key=value` pair.
    pub fn with(&self, key: &str, value: impl fmt::Display) -> Self {
        let kv = match &self.common_kv {
            Some(existing) => format!("{existing} {key}={value}"),
            None => format!("{key}={value}"),
        };
        Self {
            common_kv: Some(kv.into()),
        }
    }

    pub(crate) fn common_kv(&self) -> Option<&str> {
        self.common_kv.as_deref()
    }
}

impl fmt::Debug for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LogContext")
            .field(&self.common_kv().unwrap_or(""))
            .finish()
    }
}

macro_rules! compaction_log {
    ($level:expr, ctx: $ctx:expr, $event:expr, $($arg:tt)+) => {{
        if log::log_enabled!(target: crate::logging::LOG_TARGET, $level) {
            if let Some(common_kv) = $ctx.common_kv() {
                log::log!(
                    target: crate::logging::LOG_TARGET,
                    $level,
                    "event={} {} {}",
                    $event,
                    common_kv,
                    format_args!($($arg)+)
                );
            } else {
                log::log!(
                    target: crate::logging::LOG_TARGET,
                    $level,
                    "event={} {}",
                    $event,
                    format_args!($($arg)+)
                );
            }
        }
    }};
    ($level:expr, $event:expr, $($arg:tt)+) => {{
        if log::log_enabled!(target: crate::logging::LOG_TARGET, $level) {
            log::log!(
                target: crate::logging::LOG_TARGET,
                $level,
                "event={} {}",
                $event,
                format_args!($($arg)+)
            );
        }
    }};
}

pub(crate) use compaction_log;
