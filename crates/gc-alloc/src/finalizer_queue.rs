//! Objects awaiting finalization.

use std::ptr::NonNull;

use crate::extra_object::ExtraObjectData;

/// Ordered list of extra data records whose objects died with a finalizer.
///
/// Built by a sweep pass and handed to the finalizer runner afterwards.
/// Entries appear in sweep order: stores in the order the heap sweeps them,
/// pages in the order they were taken off the unswept stack, cells in
/// address order within a page.
///
/// The object memory itself is already reclaimed when an entry is queued;
/// each record is flagged `FLAGS_IN_FINALIZER_QUEUE` and stays alive until
/// the runner calls [`ExtraObjectData::mark_finalized`].
#[derive(Debug, Default)]
pub struct FinalizerQueue {
    queue: Vec<NonNull<ExtraObjectData>>,
}

// SAFETY: the queue only carries addresses of records that no mutator can
// reach any more; whoever drains it becomes their sole user.
unsafe impl Send for FinalizerQueue {}

impl FinalizerQueue {
    /// Create an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self { queue: Vec::new() }
    }

    /// Append a record.
    pub fn push(&mut self, extra_object: NonNull<ExtraObjectData>) {
        self.queue.push(extra_object);
    }

    /// Number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Append every entry of `other`, keeping both orders.
    pub fn merge(&mut self, mut other: Self) {
        self.queue.append(&mut other.queue);
    }

    /// Iterate queued records in order.
    pub fn iter(&self) -> impl Iterator<Item = NonNull<ExtraObjectData>> + '_ {
        self.queue.iter().copied()
    }

    /// Remove and yield every record in order.
    pub fn drain(&mut self) -> impl Iterator<Item = NonNull<ExtraObjectData>> + '_ {
        self.queue.drain(..)
    }
}

impl IntoIterator for FinalizerQueue {
    type Item = NonNull<ExtraObjectData>;
    type IntoIter = std::vec::IntoIter<NonNull<ExtraObjectData>>;

    fn into_iter(self) -> Self::IntoIter {
        self.queue.into_iter()
    }
}
