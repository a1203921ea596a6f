//! Sweep tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! spans and events for the sweep phases and page lifecycle. Without it the
//! helpers are absent and call sites compile away.

use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identifier for a GC run.
///
/// Correlates every event emitted while sweeping on behalf of one
/// collection. Monotonically increasing, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GcId(pub u64);

static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

/// Generate the next unique GC ID.
pub fn next_gc_id() -> GcId {
    GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
}

#[cfg(feature = "tracing")]
pub(crate) mod internal {
    use tracing::{span, Level};

    use super::GcId;

    /// What a sweep pass is reclaiming.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SweepKind {
        /// Heap objects and arrays.
        Objects,
        /// Extra object data records.
        ExtraObjects,
    }

    /// Span covering one sweep pass.
    pub fn trace_sweep(kind: SweepKind, gc_id: GcId) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_sweep", kind = ?kind, gc_id = gc_id.0).entered()
    }

    pub fn log_sweep_start(kind: SweepKind, allocated_bytes: usize) {
        tracing::debug!(kind = ?kind, allocated_bytes, "sweep_start");
    }

    pub fn log_sweep_end(kind: SweepKind, kept: u64, swept: u64, finalizers_queued: usize) {
        tracing::debug!(kind = ?kind, kept, swept, finalizers_queued, "sweep_end");
    }

    pub fn log_page_created(kind: &'static str, cells: usize) {
        tracing::trace!(kind, cells, "page_created");
    }

    pub fn log_page_destroyed(kind: &'static str, cells: usize) {
        tracing::trace!(kind, cells, "page_destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc_ids_increase() {
        let first = next_gc_id();
        let second = next_gc_id();
        assert!(second > first);
        assert_ne!(first.0, 0);
    }
}
