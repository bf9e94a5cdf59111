//! Compaction requests and their orchestration.
//!
//! A request is resolved into a [`CompactionKind`] once, validated against the
//! table's current segments, and dispatched under the appropriate advisory
//! lock. The physical merge is delegated to a [`MergeExecutor`].

mod error;
mod executor;
pub mod guard;
mod orchestrator;
pub mod planner;
mod queue;
mod request;

pub use error::CompactionError;
pub use executor::{ExecutorError, IndexMerge, MergeExecutor, MergedSegment};
pub use orchestrator::CompactionOrchestrator;
pub use planner::{plan_merge, LoadContext, MergePlan, PlanRequest};
pub use queue::{CompactionMarker, CompactionQueue};
pub use request::{
    CompactionKind, CompactionRequest, CompactionStatus, TriggerSource, UpdateStatusContext,
};
