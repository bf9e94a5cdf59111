//! Per-session configuration overrides.
//!
//! A session carries two validated key/value layers: session parameters set
//! for the lifetime of a session, and thread parameters scoped to a single
//! request. Thread parameters take precedence when both define a key.

use std::collections::HashMap;

use thiserror::Error;

/// Enables table-scoped locks; `false` serializes every compaction system-wide.
pub const CONCURRENT_COMPACTION: &str = "compaction.concurrent.enabled";
/// Attempts made by `lock_with_retries`.
pub const LOCK_RETRIES: &str = "compaction.lock.retries";
/// Wait between lock attempts, in milliseconds.
pub const LOCK_RETRY_INTERVAL_MS: &str = "compaction.lock.retry_interval_ms";
/// Major compaction size budget in bytes; `0` means unlimited.
pub const MAJOR_SIZE_THRESHOLD: &str = "compaction.major.size_threshold";
/// Number of level-0 segments merged by a minor compaction.
pub const MINOR_SEGMENT_COUNT: &str = "compaction.minor.segment_count";
/// Hand-off monitor tick, in milliseconds.
pub const HANDOFF_INTERVAL_MS: &str = "streaming.handoff.interval_ms";

#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Bool,
    Unsigned,
    Positive,
}

const KNOWN_KEYS: &[(&str, ValueKind)] = &[
    (CONCURRENT_COMPACTION, ValueKind::Bool),
    (LOCK_RETRIES, ValueKind::Positive),
    (LOCK_RETRY_INTERVAL_MS, ValueKind::Unsigned),
    (MAJOR_SIZE_THRESHOLD, ValueKind::Unsigned),
    (MINOR_SEGMENT_COUNT, ValueKind::Positive),
    (HANDOFF_INTERVAL_MS, ValueKind::Positive),
];

/// Invalid session or option configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
    #[error("invalid value `{value}` for configuration key {key}")]
    InvalidValue { key: String, value: String },
}

fn validate(key: &str, value: &str) -> Result<(), ConfigError> {
    let Some((_, kind)) = KNOWN_KEYS.iter().find(|(known, _)| *known == key) else {
        return Err(ConfigError::UnknownKey(key.to_string()));
    };
    let valid = match kind {
        ValueKind::Bool => value.parse::<bool>().is_ok(),
        ValueKind::Unsigned => value.parse::<u64>().is_ok(),
        ValueKind::Positive => value.parse::<u64>().map(|v| v > 0).unwrap_or(false),
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Validated key/value configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionParams {
    props: HashMap<String, String>,
}

impl SessionParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` after checking it is known and its value parses.
    pub fn add_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ConfigError> {
        let key = key.into().trim().to_ascii_lowercase();
        let value = value.into().trim().to_string();
        validate(&key, &value)?;
        self.props.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.props.remove(key)
    }

    pub fn get_all(&self) -> &HashMap<String, String> {
        &self.props
    }

    pub fn clear(&mut self) {
        self.props.clear();
    }
}

/// Session configuration: session-wide and thread-scoped parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    session_params: SessionParams,
    thread_params: SessionParams,
}

impl SessionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_params(&self) -> &SessionParams {
        &self.session_params
    }

    pub fn session_params_mut(&mut self) -> &mut SessionParams {
        &mut self.session_params
    }

    pub fn thread_params(&self) -> &SessionParams {
        &self.thread_params
    }

    pub fn thread_params_mut(&mut self) -> &mut SessionParams {
        &mut self.thread_params
    }

    /// Effective value of `key`: thread parameters first, then session parameters.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.thread_params
            .get(key)
            .or_else(|| self.session_params.get(key))
    }
}
