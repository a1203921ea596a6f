//! Pages: the unit of allocation and sweep.
//!
//! - [`FixedBlockPage`]: a fixed-size region carved into equal blocks of one
//!   size class, allocated from freed blocks in its occupancy bitmap or a
//!   bump cursor.
//! - [`SingleObjectPage`]: a region sized for exactly one large object.
//!
//! A page header sits at the start of its own backing memory, which is
//! page aligned, so every page can be linked into an
//! [`AtomicStack`](crate::atomic_stack::AtomicStack).

mod fixed_block;
mod single_object;

use std::ptr::NonNull;

pub use fixed_block::{FixedBlockPage, FIXED_BLOCK_PAGE_CELLS_OFFSET};
pub use single_object::SingleObjectPage;

use crate::allocation_size::AllocationSize;
use crate::atomic_stack::StackNode;
use crate::finalizer_queue::FinalizerQueue;
use crate::sweep::SweepTraits;

/// Common operations of both page kinds.
pub trait Page: StackNode {
    /// Short name used in diagnostics.
    const KIND: &'static str;

    /// Map a new page whose cells are `size` large. Aborts on OOM.
    fn create(size: AllocationSize) -> NonNull<Self>;

    /// Unmap `page`.
    ///
    /// # Safety
    ///
    /// `page` must come from [`Page::create`], be on no stack, hold no live
    /// cells that anyone still uses, and not be used afterwards.
    unsafe fn destroy(page: NonNull<Self>);

    /// A free, zero-filled cell, or `None` if the page is full.
    fn try_allocate(&mut self) -> Option<NonNull<u8>>;

    /// Sweep every allocated cell with `T`. Returns `true` if any cell
    /// survived.
    ///
    /// # Safety
    ///
    /// Every allocated cell must hold what `T` expects, and no mutator may
    /// allocate from this page concurrently.
    unsafe fn sweep<T: SweepTraits>(
        &mut self,
        scope: &mut T::Scope,
        finalizer_queue: &mut FinalizerQueue,
    ) -> bool;

    /// Call `f` with the start of every allocated cell, in address order.
    fn for_each_allocated(&self, f: impl FnMut(NonNull<u8>));
}
