//! Profiling markers bracketing the phases of each operation.
//!
//! A timeline never influences the outcome of an operation: its methods
//! return nothing and implementations must swallow their own failures.

use crate::entry::TensorEntry;

pub const ALLOCATE_OUTPUT: &str = "ALLOCATE_OUTPUT";
pub const MEMCPY_IN_FUSION_BUFFER: &str = "MEMCPY_IN_FUSION_BUFFER";
pub const MEMCPY_OUT_FUSION_BUFFER: &str = "MEMCPY_OUT_FUSION_BUFFER";
pub const ALLREDUCE: &str = "ALLREDUCE";
pub const ALLGATHER: &str = "ALLGATHER";
pub const BROADCAST: &str = "BROADCAST";

pub trait Timeline: Send + Sync {
    /// Mark the start of `activity` for every entry in the batch.
    fn activity_start_all(&self, entries: &[TensorEntry], activity: &'static str);

    /// Mark the end of the current activity for every entry in the batch.
    fn activity_end_all(&self, entries: &[TensorEntry]);
}

/// Discards every marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTimeline;

impl Timeline for NoopTimeline {
    fn activity_start_all(&self, _entries: &[TensorEntry], _activity: &'static str) {}

    fn activity_end_all(&self, _entries: &[TensorEntry]) {}
}

/// Emits markers as `tracing` events at TRACE level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTimeline;

impl Timeline for TracingTimeline {
    fn activity_start_all(&self, entries: &[TensorEntry], activity: &'static str) {
        for e in entries {
            tracing::trace!(tensor = %e.name, activity, "activity start");
        }
    }

    fn activity_end_all(&self, entries: &[TensorEntry]) {
        for e in entries {
            tracing::trace!(tensor = %e.name, "activity end");
        }
    }
}
