use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::AtomicPtr;

use crate::allocation_size::{AllocationSize, CELL_SIZE, FIXED_BLOCK_PAGE_SIZE};
use crate::atomic_stack::StackNode;
use crate::finalizer_queue::FinalizerQueue;
use crate::gc_api::{free, safe_alloc};
use crate::sweep::SweepTraits;
use crate::type_layout::align_up;

use super::Page;

/// Upper bound on blocks per page (one-cell blocks).
const MAX_BLOCKS: usize = FIXED_BLOCK_PAGE_SIZE / CELL_SIZE;
const OCCUPIED_WORDS: usize = MAX_BLOCKS / 64;

/// Offset of the first block from the page start.
pub const FIXED_BLOCK_PAGE_CELLS_OFFSET: usize = align_up(mem::size_of::<FixedBlockPage>(), CELL_SIZE);

/// A page of equal-size blocks.
///
/// Blocks below `bump` are either occupied or were freed by a sweep; blocks
/// at or above it have not been handed out since the last sweep. Every
/// block not in the occupied set is entirely zero, so free blocks are found
/// through the bitmap alone.
#[repr(C)]
pub struct FixedBlockPage {
    next: AtomicPtr<FixedBlockPage>,
    cells: NonNull<u8>,
    block_size: AllocationSize,
    capacity: usize,
    bump: usize,
    /// First occupancy word that may still have a free bit below `bump`.
    scan_word: usize,
    occupied: [u64; OCCUPIED_WORDS],
}

impl StackNode for FixedBlockPage {
    fn next_link(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

impl FixedBlockPage {
    /// Number of blocks a page of `block_size` holds.
    #[must_use]
    pub const fn capacity_for(block_size: AllocationSize) -> usize {
        (FIXED_BLOCK_PAGE_SIZE - FIXED_BLOCK_PAGE_CELLS_OFFSET) / block_size.in_bytes()
    }

    /// Number of blocks in this page.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied blocks.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.occupied.iter().map(|word| word.count_ones() as usize).sum()
    }

    fn block(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity);
        // SAFETY: every block index below capacity lies inside the mapping.
        unsafe { self.cells.add(index * self.block_size.in_bytes()) }
    }

    fn is_occupied(&self, index: usize) -> bool {
        self.occupied[index / 64] & (1 << (index % 64)) != 0
    }

    fn set_occupied(&mut self, index: usize) {
        self.occupied[index / 64] |= 1 << (index % 64);
    }

    fn clear_occupied(&mut self, index: usize) {
        self.occupied[index / 64] &= !(1 << (index % 64));
    }

    /// Occupied block indices below `bump`, ascending.
    fn occupied_indices(&self) -> impl Iterator<Item = usize> + '_ {
        let words = self.bump.div_ceil(64);
        self.occupied[..words]
            .iter()
            .enumerate()
            .flat_map(|(w, &word)| {
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let bit = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(w * 64 + bit)
                })
            })
    }

    /// A freed block below `bump`, lowest index first.
    fn next_free_below_bump(&mut self) -> Option<usize> {
        let words = self.bump.div_ceil(64);
        while self.scan_word < words {
            let free = !self.occupied[self.scan_word];
            if free != 0 {
                let index = self.scan_word * 64 + free.trailing_zeros() as usize;
                return (index < self.bump).then_some(index);
            }
            self.scan_word += 1;
        }
        None
    }
}

impl Page for FixedBlockPage {
    const KIND: &'static str = "fixed_block";

    fn create(block_size: AllocationSize) -> NonNull<Self> {
        debug_assert!(!block_size.is_zero());
        let memory = safe_alloc(FIXED_BLOCK_PAGE_SIZE as u64);
        let page = memory.cast::<Self>();
        let capacity = Self::capacity_for(block_size);

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_page_created(Self::KIND, block_size.in_cells());

        // SAFETY: the mapping is page aligned and larger than the header.
        unsafe {
            page.write(Self {
                next: AtomicPtr::new(ptr::null_mut()),
                cells: memory.add(FIXED_BLOCK_PAGE_CELLS_OFFSET),
                block_size,
                capacity,
                bump: 0,
                scan_word: 0,
                occupied: [0; OCCUPIED_WORDS],
            });
        }
        page
    }

    unsafe fn destroy(page: NonNull<Self>) {
        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_page_destroyed(Self::KIND, unsafe {
            page.as_ref().block_size.in_cells()
        });

        // SAFETY: forwarded caller contract.
        unsafe { free(page.cast(), FIXED_BLOCK_PAGE_SIZE) };
    }

    fn try_allocate(&mut self) -> Option<NonNull<u8>> {
        let index = match self.next_free_below_bump() {
            Some(index) => index,
            None if self.bump < self.capacity => {
                self.bump += 1;
                self.bump - 1
            }
            None => return None,
        };
        self.set_occupied(index);
        Some(self.block(index))
    }

    unsafe fn sweep<T: SweepTraits>(
        &mut self,
        scope: &mut T::Scope,
        finalizer_queue: &mut FinalizerQueue,
    ) -> bool {
        let bump = self.bump;
        let block_bytes = self.block_size.in_bytes();
        let mut alive = false;

        for word_index in 0..bump.div_ceil(64) {
            let mut bits = self.occupied[word_index];
            while bits != 0 {
                let index = word_index * 64 + bits.trailing_zeros() as usize;
                bits &= bits - 1;

                let cell = self.block(index);
                if unsafe { T::sweep_cell(cell, scope, finalizer_queue) } {
                    alive = true;
                } else {
                    // SAFETY: the dead block is ours until it leaves the occupied set.
                    unsafe { cell.write_bytes(0, block_bytes) };
                    self.clear_occupied(index);
                }
            }
        }

        self.bump = self.occupied_indices().last().map_or(0, |last| last + 1);
        self.scan_word = 0;
        alive
    }

    fn for_each_allocated(&self, mut f: impl FnMut(NonNull<u8>)) {
        for index in self.occupied_indices() {
            f(self.block(index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalizer_queue::FinalizerQueue;
    use crate::gc_handle::{GcHandle, GcSweepScope};

    /// Keeps blocks whose first byte is odd.
    enum OddFirstByte {}

    impl SweepTraits for OddFirstByte {
        type Scope = GcSweepScope;

        fn current_sweep_scope(gc_handle: &GcHandle) -> GcSweepScope {
            gc_handle.sweep()
        }

        unsafe fn is_alive(cell: NonNull<u8>) -> bool {
            (unsafe { cell.read() }) % 2 == 1
        }

        unsafe fn on_destroy(_cell: NonNull<u8>, _finalizer_queue: &mut FinalizerQueue) {}
    }

    struct TestPage(NonNull<FixedBlockPage>);

    impl TestPage {
        fn new(cells: usize) -> Self {
            Self(FixedBlockPage::create(AllocationSize::cells(cells)))
        }

        fn page(&mut self) -> &mut FixedBlockPage {
            unsafe { self.0.as_mut() }
        }

        fn sweep(&mut self) -> bool {
            let handle = GcHandle::next();
            let mut scope = OddFirstByte::current_sweep_scope(&handle);
            let mut queue = FinalizerQueue::new();
            let alive = unsafe { self.page().sweep::<OddFirstByte>(&mut scope, &mut queue) };
            assert!(queue.is_empty());
            alive
        }
    }

    impl Drop for TestPage {
        fn drop(&mut self) {
            unsafe { FixedBlockPage::destroy(self.0) };
        }
    }

    fn is_zeroed(cell: NonNull<u8>, len: usize) -> bool {
        unsafe { std::slice::from_raw_parts(cell.as_ptr(), len) }
            .iter()
            .all(|&b| b == 0)
    }

    #[test]
    fn test_page_is_node_aligned() {
        let mut page = TestPage::new(2);
        assert_eq!(page.page() as *mut FixedBlockPage as usize % crate::atomic_stack::NODE_ALIGN, 0);
    }

    #[test]
    fn test_exhaustion() {
        for cells in [1, 2, 3, 16, 128] {
            let mut page = TestPage::new(cells);
            let capacity = FixedBlockPage::capacity_for(AllocationSize::cells(cells));
            assert_eq!(page.page().capacity(), capacity);
            for _ in 0..capacity {
                assert!(page.page().try_allocate().is_some());
            }
            assert!(page.page().try_allocate().is_none());
            assert_eq!(page.page().allocated_count(), capacity);
        }
    }

    #[test]
    fn test_blocks_are_distinct_and_in_bounds() {
        let mut page = TestPage::new(4);
        let first = page.page().try_allocate().unwrap();
        let second = page.page().try_allocate().unwrap();
        assert_eq!(second.as_ptr() as usize - first.as_ptr() as usize, 4 * CELL_SIZE);
        assert_eq!(
            first.as_ptr() as usize - page.0.as_ptr() as usize,
            FIXED_BLOCK_PAGE_CELLS_OFFSET
        );
    }

    #[test]
    fn test_sweep_liveness_combinations() {
        const CELLS: usize = 3;
        let bytes = CELLS * CELL_SIZE;
        // Every liveness pattern over six blocks.
        for pattern in 0u32..(1 << 6) {
            let mut page = TestPage::new(CELLS);
            let blocks: Vec<_> = (0..6).map(|_| page.page().try_allocate().unwrap()).collect();
            for (i, block) in blocks.iter().enumerate() {
                let alive = pattern & (1 << i) != 0;
                unsafe { block.write_bytes(if alive { 0x11 } else { 0x22 }, bytes) };
            }

            assert_eq!(page.sweep(), pattern != 0);

            for (i, block) in blocks.iter().enumerate() {
                if pattern & (1 << i) != 0 {
                    assert!(unsafe { std::slice::from_raw_parts(block.as_ptr(), bytes) }
                        .iter()
                        .all(|&b| b == 0x11));
                } else {
                    assert!(is_zeroed(*block, bytes));
                }
            }
            assert_eq!(page.page().allocated_count(), pattern.count_ones() as usize);
        }
    }

    #[test]
    fn test_freed_blocks_are_fresh_and_reused() {
        let mut page = TestPage::new(2);
        let bytes = 2 * CELL_SIZE;
        let capacity = page.page().capacity();
        let mut blocks = Vec::new();
        while let Some(block) = page.page().try_allocate() {
            unsafe { block.write_bytes(0xAA, bytes) };
            blocks.push(block);
        }
        // Keep every third block.
        for block in blocks.iter().step_by(3) {
            unsafe { block.write(0x01) };
        }

        assert!(page.sweep());
        let kept = blocks.len().div_ceil(3);
        assert_eq!(page.page().allocated_count(), kept);

        let mut reused = 0;
        while let Some(block) = page.page().try_allocate() {
            assert!(is_zeroed(block, bytes));
            assert!(blocks.contains(&block));
            reused += 1;
        }
        assert_eq!(reused, capacity - kept);
    }

    #[test]
    fn test_sweep_of_dead_page_resets_it() {
        let mut page = TestPage::new(1);
        for _ in 0..10 {
            let block = page.page().try_allocate().unwrap();
            unsafe { block.write(0xFE) };
        }
        assert!(!page.sweep());
        assert_eq!(page.page().allocated_count(), 0);

        let capacity = page.page().capacity();
        for _ in 0..capacity {
            let block = page.page().try_allocate().unwrap();
            assert!(is_zeroed(block, CELL_SIZE));
        }
        assert!(page.page().try_allocate().is_none());
    }

    #[test]
    fn test_for_each_allocated_in_address_order() {
        let mut page = TestPage::new(2);
        let blocks: Vec<_> = (0..70).map(|_| page.page().try_allocate().unwrap()).collect();
        let mut seen = Vec::new();
        page.page().for_each_allocated(|cell| seen.push(cell));
        assert_eq!(seen, blocks);
    }
}
