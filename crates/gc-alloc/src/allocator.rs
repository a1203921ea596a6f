//! Per-mutator allocation context.
//!
//! An [`Allocator`] caches one current page per size class and falls back to
//! the shared [`Heap`] when a page runs full. It is owned by a single thread;
//! all cross-thread traffic goes through the heap's page stacks.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::allocation_size::{AllocationSize, SizeClass, FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS};
use crate::extra_object::{ExtraObjectCell, ExtraObjectData, FinalizerFn};
use crate::heap::Heap;
use crate::heap_object::{HeapArray, HeapObject};
use crate::object::{ArrayHeader, ObjHeader, TypeInfo, TF_HAS_FINALIZER};
use crate::page::{FixedBlockPage, Page};

/// Allocation context of one mutator thread.
pub struct Allocator {
    heap: Arc<Heap>,
    /// Current page per block size in cells; index 0 is unused.
    fixed_block_pages: Box<[Option<NonNull<FixedBlockPage>>]>,
    extra_object_page: Option<NonNull<FixedBlockPage>>,
}

// SAFETY: the cached pages are on the heap's `used` stack and only this
// allocator touches their cells until `prepare_for_gc`.
unsafe impl Send for Allocator {}

impl Allocator {
    /// Create an allocator over `heap`.
    #[must_use]
    pub fn new(heap: Arc<Heap>) -> Self {
        Self {
            heap,
            fixed_block_pages: vec![None; FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS + 1].into_boxed_slice(),
            extra_object_page: None,
        }
    }

    /// The heap this allocator takes pages from.
    #[must_use]
    pub const fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// Zero-filled memory for `size`, rounded up to its size class.
    pub fn allocate(&mut self, size: AllocationSize) -> NonNull<u8> {
        match SizeClass::of(size) {
            SizeClass::FixedBlock { cells } => {
                let heap = &self.heap;
                allocate_from(&mut self.fixed_block_pages[cells], || {
                    heap.get_fixed_block_page(cells)
                })
            }
            SizeClass::SingleObject { cells } => {
                let heap = &self.heap;
                allocate_from(&mut None, || heap.get_single_object_page(cells))
            }
        }
    }

    /// Allocate and initialize an instance of `type_info`.
    ///
    /// Types declaring a finalizer get their extra data record up front.
    pub fn allocate_object(&mut self, type_info: &'static TypeInfo) -> NonNull<ObjHeader> {
        debug_assert!(!type_info.is_array(), "{} is an array type", type_info.name());
        let descriptor = HeapObject::make_descriptor(type_info);
        let start = self.allocate(AllocationSize::bytes_at_least(descriptor.size()));
        // SAFETY: `start` is a fresh cell sized for this composite.
        let object = unsafe { HeapObject::from_start(start) }.object();
        unsafe { ObjHeader::init(object, type_info) };

        if type_info.has_flags(TF_HAS_FINALIZER) {
            // SAFETY: the object was just allocated.
            unsafe { self.create_extra_object_data(object, None) };
        }
        object
    }

    /// Allocate and initialize an array of `count` elements of `type_info`.
    pub fn allocate_array(&mut self, type_info: &'static TypeInfo, count: u32) -> NonNull<ArrayHeader> {
        let descriptor = HeapArray::make_descriptor(type_info, count);
        let start = self.allocate(AllocationSize::bytes_at_least(descriptor.size()));
        // SAFETY: `start` is a fresh cell sized for this composite.
        let array = unsafe { HeapArray::from_start(start) }.array();
        unsafe { ArrayHeader::init(array, type_info, count) };
        array
    }

    /// The extra data record of `object`, creating and installing one with
    /// `finalizer` if it has none yet.
    ///
    /// # Safety
    ///
    /// `object` must be a live heap object.
    pub unsafe fn create_extra_object_data(
        &mut self,
        object: NonNull<ObjHeader>,
        finalizer: Option<FinalizerFn>,
    ) -> NonNull<ExtraObjectData> {
        // SAFETY: the caller guarantees `object` is live.
        if let Some(existing) = ExtraObjectData::get(unsafe { object.as_ref() }) {
            return existing;
        }
        let heap = &self.heap;
        let cell = allocate_from(&mut self.extra_object_page, || heap.get_extra_object_page());
        // SAFETY: a fresh, zeroed extra object cell.
        unsafe { ExtraObjectData::install(object, cell.cast::<ExtraObjectCell>(), finalizer) }
    }

    /// Give up every cached page ahead of a collection.
    pub fn prepare_for_gc(&mut self) {
        self.fixed_block_pages.fill(None);
        self.extra_object_page = None;
    }
}

/// Allocate from `current`, replacing it with pages from `next_page` until
/// one has room.
fn allocate_from<P: Page>(
    current: &mut Option<NonNull<P>>,
    mut next_page: impl FnMut() -> NonNull<P>,
) -> NonNull<u8> {
    loop {
        if let Some(mut page) = *current {
            // SAFETY: a page handed to this allocator is ours until the next
            // `prepare_for_gc`.
            if let Some(cell) = unsafe { page.as_mut() }.try_allocate() {
                return cell;
            }
        }
        *current = Some(next_page());
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.fixed_block_pages.iter().filter(|p| p.is_some()).count();
        f.debug_struct("Allocator")
            .field("cached_pages", &cached)
            .field("extra_object_page", &self.extra_object_page)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation_size::CELL_SIZE;
    use crate::extra_object::FLAGS_SWEEPABLE;
    use crate::object::array_address_of_element_at;

    static POINT: TypeInfo = TypeInfo::object("Point", 24);
    static RESOURCE: TypeInfo = TypeInfo::object("Resource", 16).with_flags(TF_HAS_FINALIZER);
    static BYTE_ARRAY: TypeInfo = TypeInfo::array("ByteArray", 1);

    #[test]
    fn test_allocate_object_sets_type() {
        let mut allocator = Allocator::new(Arc::new(Heap::new()));
        let object = allocator.allocate_object(&POINT);
        let header = unsafe { object.as_ref() };
        assert!(std::ptr::eq(header.type_info(), &POINT));
        assert!(header.heap());
        assert!(!header.has_meta());
        assert_eq!(object.as_ptr() as usize % CELL_SIZE, 0);
    }

    #[test]
    fn test_consecutive_objects_do_not_overlap() {
        let mut allocator = Allocator::new(Arc::new(Heap::new()));
        let first = allocator.allocate_object(&POINT).as_ptr() as usize;
        let second = allocator.allocate_object(&POINT).as_ptr() as usize;
        let size = HeapObject::make_descriptor(&POINT).size();
        assert!(first.abs_diff(second) >= size);
    }

    #[test]
    fn test_large_array_gets_own_page() {
        let mut allocator = Allocator::new(Arc::new(Heap::new()));
        let count = 64 * 1024;
        let array = allocator.allocate_array(&BYTE_ARRAY, count);
        assert_eq!(unsafe { array.as_ref() }.count(), count);

        let start = unsafe { HeapArray::from_array(array) }.start();
        let end = unsafe { array_address_of_element_at(array, count as usize) };
        let size = HeapArray::make_descriptor(&BYTE_ARRAY, count).size();
        assert!(end.as_ptr() as usize <= start.as_ptr() as usize + size);
    }

    #[test]
    fn test_finalizable_types_get_extra_data() {
        let mut allocator = Allocator::new(Arc::new(Heap::new()));
        let object = allocator.allocate_object(&RESOURCE);
        let header = unsafe { object.as_ref() };
        assert!(header.has_meta());
        assert!(std::ptr::eq(header.type_info(), &RESOURCE));

        let extra = ExtraObjectData::get(header).unwrap();
        assert_eq!(unsafe { extra.as_ref() }.base_object(), Some(object));
        assert!(!unsafe { extra.as_ref() }.get_flag(FLAGS_SWEEPABLE));
    }

    #[test]
    fn test_create_extra_object_data_is_idempotent() {
        let mut allocator = Allocator::new(Arc::new(Heap::new()));
        let object = allocator.allocate_object(&POINT);
        let first = unsafe { allocator.create_extra_object_data(object, None) };
        let second = unsafe { allocator.create_extra_object_data(object, None) };
        assert_eq!(first, second);
    }

    #[test]
    fn test_fills_past_one_page() {
        let mut allocator = Allocator::new(Arc::new(Heap::new()));
        let capacity = FixedBlockPage::capacity_for(AllocationSize::cells(16));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..=capacity {
            assert!(seen.insert(allocator.allocate(AllocationSize::cells(16))));
        }
    }
}
