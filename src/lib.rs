//! Lifecycle orchestration for compaction of segmented columnar tables.
//!
//! A [`CompactionOrchestrator`] decides whether a compaction may start,
//! serializes conflicting operations through advisory locks, dispatches to one
//! of the [`CompactionKind`](compaction::CompactionKind) strategies, and moves
//! streaming tables into batch mode. The physical merge is delegated to a
//! [`MergeExecutor`](compaction::MergeExecutor) and segment metadata lives
//! behind a [`TableStore`](table::TableStore).
//!
//! Listeners registered on an [`EventBus`](event::EventBus) observe every
//! request through `Pre`, `PreStatusUpdate` and `Post` events and may veto it
//! by returning an error.

/// Compaction requests, planning and dispatch.
pub mod compaction;

/// Explicit execution context threaded through every request.
pub mod context;

/// Synchronous lifecycle event fan-out.
pub mod event;

/// Named advisory locks with bounded retry.
pub mod lock;

/// Structured log context.
pub mod logging;

/// Orchestrator configuration.
pub mod option;

/// Per-session configuration overrides.
pub mod session;

/// Streaming to batch hand-off.
pub mod streaming;

/// Table and segment metadata.
pub mod table;

pub use crate::{
    compaction::{
        CompactionError, CompactionKind, CompactionOrchestrator, CompactionRequest,
        CompactionStatus,
    },
    context::CompactionContext,
    logging::LogContext,
    option::CompactionOptions,
};
