//! The GC control block.

use std::sync::atomic::{AtomicUsize, Ordering};

const UNMARKED: usize = 0;
const MARKED: usize = 1;

/// Collector state prefixed to every heap allocation.
///
/// The all-zero bit pattern is the valid "unmarked" state, so freshly carved
/// (zero-filled) cells need no initialization.
#[derive(Debug, Default)]
#[repr(C)]
pub struct ObjectData {
    mark: AtomicUsize,
}

impl ObjectData {
    /// Mark the object. Returns `false` if it was already marked.
    pub fn try_mark(&self) -> bool {
        self.mark
            .compare_exchange(UNMARKED, MARKED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// `true` if the object is marked in the current cycle.
    pub fn is_marked(&self) -> bool {
        self.mark.load(Ordering::Acquire) == MARKED
    }

    /// Clear the mark for the next cycle. Returns whether it was set.
    pub fn try_reset_mark(&self) -> bool {
        self.mark.swap(UNMARKED, Ordering::AcqRel) == MARKED
    }
}
