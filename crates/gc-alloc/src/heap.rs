//! The heap: every page store of the allocator.
//!
//! Objects of up to [`FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS`] cells live in
//! fixed-block pages, one store per cell count. Larger objects get a
//! single-object page each. Extra object data records have a fixed-block
//! store of their own, swept separately.

use std::fmt;
use std::ptr::NonNull;

use crate::allocation_size::{AllocationSize, FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS};
use crate::extra_object::ExtraObjectCell;
use crate::finalizer_queue::FinalizerQueue;
use crate::gc_handle::GcHandle;
use crate::page::{FixedBlockPage, SingleObjectPage};
use crate::page_store::PageStore;
use crate::sweep::{ExtraDataSweepTraits, ObjectSweepTraits};

#[cfg(any(test, feature = "test-util"))]
use crate::page::Page;

/// All pages of one allocator instance.
pub struct Heap {
    /// Indexed by block size in cells; index 0 is unused.
    fixed_block_pages: Box<[PageStore<FixedBlockPage>]>,
    single_object_pages: PageStore<SingleObjectPage>,
    extra_object_pages: PageStore<FixedBlockPage>,
}

impl Heap {
    /// Create an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fixed_block_pages: (0..=FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS)
                .map(|_| PageStore::new())
                .collect(),
            single_object_pages: PageStore::new(),
            extra_object_pages: PageStore::new(),
        }
    }

    /// Queue every page for sweeping.
    ///
    /// Must run while mutators are paused and after every [`Allocator`]
    /// released its pages with [`Allocator::prepare_for_gc`].
    ///
    /// [`Allocator`]: crate::allocator::Allocator
    /// [`Allocator::prepare_for_gc`]: crate::allocator::Allocator::prepare_for_gc
    pub fn prepare_for_gc(&self) {
        for store in &self.fixed_block_pages[1..] {
            store.prepare_for_gc();
        }
        self.single_object_pages.prepare_for_gc();
        self.extra_object_pages.prepare_for_gc();
    }

    /// Sweep heap objects, returning the records whose objects must be
    /// finalized.
    ///
    /// Fixed-block stores are swept in ascending size order, then
    /// single-object pages; the queue follows that order.
    pub fn sweep(&self, gc_handle: &GcHandle) -> FinalizerQueue {
        #[cfg(feature = "tracing")]
        let _span = {
            use crate::tracing::internal::{log_sweep_start, trace_sweep, SweepKind};
            let span = trace_sweep(SweepKind::Objects, gc_handle.id());
            log_sweep_start(SweepKind::Objects, crate::gc_api::allocated_bytes());
            span
        };

        let mut finalizer_queue = FinalizerQueue::new();
        for store in &self.fixed_block_pages[1..] {
            // SAFETY: object stores only hold heap object cells.
            unsafe { store.sweep::<ObjectSweepTraits>(gc_handle, &mut finalizer_queue) };
        }
        // SAFETY: as above.
        unsafe {
            self.single_object_pages
                .sweep_and_free::<ObjectSweepTraits>(gc_handle, &mut finalizer_queue);
        }

        #[cfg(feature = "tracing")]
        {
            let stats = gc_handle.statistics();
            crate::tracing::internal::log_sweep_end(
                crate::tracing::internal::SweepKind::Objects,
                stats.kept_objects,
                stats.swept_objects,
                finalizer_queue.len(),
            );
        }

        finalizer_queue
    }

    /// Sweep extra object data records flagged sweepable.
    pub fn sweep_extra_objects(&self, gc_handle: &GcHandle) {
        #[cfg(feature = "tracing")]
        let _span = crate::tracing::internal::trace_sweep(
            crate::tracing::internal::SweepKind::ExtraObjects,
            gc_handle.id(),
        );

        let mut unused = FinalizerQueue::new();
        // SAFETY: the extra object store only holds extra object cells.
        unsafe {
            self.extra_object_pages
                .sweep::<ExtraDataSweepTraits>(gc_handle, &mut unused);
        }
        debug_assert!(unused.is_empty());

        #[cfg(feature = "tracing")]
        {
            let stats = gc_handle.statistics();
            crate::tracing::internal::log_sweep_end(
                crate::tracing::internal::SweepKind::ExtraObjects,
                stats.kept_extra_objects,
                stats.swept_extra_objects,
                0,
            );
        }
    }

    /// A page of `cells`-sized blocks to allocate from.
    pub fn get_fixed_block_page(&self, cells: usize) -> NonNull<FixedBlockPage> {
        debug_assert!((1..=FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS).contains(&cells));
        self.fixed_block_pages[cells].get_page(AllocationSize::cells(cells))
    }

    /// A fresh page for one object of `cells` cells.
    pub fn get_single_object_page(&self, cells: usize) -> NonNull<SingleObjectPage> {
        self.single_object_pages.new_page(AllocationSize::cells(cells))
    }

    /// A page of extra object cells to allocate from.
    pub fn get_extra_object_page(&self) -> NonNull<FixedBlockPage> {
        self.extra_object_pages.get_page(ExtraObjectCell::SIZE)
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Heap {
    /// Start of every allocated heap object cell.
    ///
    /// Must run while no other thread uses the heap.
    pub fn allocated_objects(&self) -> Vec<NonNull<u8>> {
        let mut objects = Vec::new();
        for store in &self.fixed_block_pages[1..] {
            store.for_each_page(|page| page.for_each_allocated(|cell| objects.push(cell)));
        }
        self.single_object_pages
            .for_each_page(|page| page.for_each_allocated(|cell| objects.push(cell)));
        objects
    }

    /// Every allocated extra object cell.
    ///
    /// Must run while no other thread uses the heap.
    pub fn allocated_extra_objects(&self) -> Vec<NonNull<ExtraObjectCell>> {
        let mut cells = Vec::new();
        self.extra_object_pages
            .for_each_page(|page| page.for_each_allocated(|cell| cells.push(cell.cast())));
        cells
    }

    /// Destroy every page.
    ///
    /// Must run while no other thread uses the heap or any of its objects.
    pub fn clear_for_tests(&self) {
        for store in &self.fixed_block_pages[1..] {
            store.clear_for_tests();
        }
        self.single_object_pages.clear_for_tests();
        self.extra_object_pages.clear_for_tests();
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("fixed_block_classes", &(self.fixed_block_pages.len() - 1))
            .field("single_object_pages", &self.single_object_pages)
            .field("extra_object_pages", &self.extra_object_pages)
            .finish()
    }
}
