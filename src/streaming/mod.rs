//! Moving streaming segments into batch segments.
//!
//! A streaming table writes into `Streaming` segments. A segment that is closed
//! for writes becomes `StreamingFinish` and is later handed off: the merge
//! executor rewrites it as a new `Success` segment and the source is marked
//! `Compacted`. Each hand-off is published on its own, so an interrupted pass
//! resumes with the segments still in `StreamingFinish`.

mod handoff;
mod monitor;

use std::path::PathBuf;

pub(crate) use handoff::{close_streaming, handoff_finished_segments};
pub(crate) use monitor::HandoffMonitor;

use crate::table::SegmentId;

/// One streaming segment rewritten as a batch segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub source: SegmentId,
    pub output: SegmentId,
}

/// Outcome of closing a streaming table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseStreamingReport {
    pub(crate) handed_off: Vec<Handoff>,
    pub(crate) residual_paths: Vec<PathBuf>,
}

impl CloseStreamingReport {
    /// Hand-offs performed by this call, in segment creation order.
    pub fn handed_off(&self) -> &[Handoff] {
        &self.handed_off
    }

    /// Streaming directories that could not be removed.
    ///
    /// The table is already a batch table when this is non-empty; the listed
    /// directories may still hold checkpoint or log files.
    pub fn residual_paths(&self) -> &[PathBuf] {
        &self.residual_paths
    }

    pub fn is_clean(&self) -> bool {
        self.residual_paths.is_empty()
    }
}
