use std::sync::Arc;

use crate::{event::EventBus, logging::LogContext, session::SessionInfo};

/// Execution context threaded through every compaction call.
///
/// Carries the capabilities a request runs with instead of reaching for
/// process-wide state: the event bus listeners are notified on, the log
/// context appended to every log line, and the caller's session overrides.
#[derive(Debug, Clone, Default)]
pub struct CompactionContext {
    pub(crate) events: Arc<EventBus>,
    pub(crate) log: LogContext,
    pub(crate) session: SessionInfo,
}

impl CompactionContext {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            log: LogContext::default(),
            session: SessionInfo::default(),
        }
    }

    pub fn with_log(self, log: LogContext) -> Self {
        Self { log, ..self }
    }

    pub fn with_session(self, session: SessionInfo) -> Self {
        Self { session, ..self }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn log(&self) -> &LogContext {
        &self.log
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }
}
