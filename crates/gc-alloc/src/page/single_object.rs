use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::AtomicPtr;

use crate::allocation_size::{AllocationSize, CELL_SIZE};
use crate::atomic_stack::StackNode;
use crate::finalizer_queue::FinalizerQueue;
use crate::gc_api::{free, safe_alloc};
use crate::sweep::SweepTraits;
use crate::type_layout::align_up;

use super::Page;

const DATA_OFFSET: usize = align_up(mem::size_of::<SingleObjectPage>(), CELL_SIZE);

/// A page holding one large object.
#[repr(C)]
pub struct SingleObjectPage {
    next: AtomicPtr<SingleObjectPage>,
    data: NonNull<u8>,
    size: AllocationSize,
    mapping_len: usize,
    allocated: bool,
}

impl StackNode for SingleObjectPage {
    fn next_link(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

impl SingleObjectPage {
    /// Bytes mapped for an object of `size`.
    #[must_use]
    pub fn mapping_len_for(size: AllocationSize) -> usize {
        align_up(DATA_OFFSET + size.in_bytes(), sys_alloc::page_size())
    }

    /// `true` while the object has not been swept away.
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.allocated
    }
}

impl Page for SingleObjectPage {
    const KIND: &'static str = "single_object";

    fn create(size: AllocationSize) -> NonNull<Self> {
        let mapping_len = Self::mapping_len_for(size);
        let memory = safe_alloc(mapping_len as u64);
        let page = memory.cast::<Self>();

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_page_created(Self::KIND, size.in_cells());

        // SAFETY: the mapping holds the header followed by `size` bytes.
        unsafe {
            page.write(Self {
                next: AtomicPtr::new(ptr::null_mut()),
                data: memory.add(DATA_OFFSET),
                size,
                mapping_len,
                allocated: false,
            });
        }
        page
    }

    unsafe fn destroy(page: NonNull<Self>) {
        // SAFETY: the caller guarantees `page` is live.
        let header = unsafe { page.as_ref() };
        let mapping_len = header.mapping_len;

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_page_destroyed(Self::KIND, header.size.in_cells());

        // SAFETY: forwarded caller contract.
        unsafe { free(page.cast(), mapping_len) };
    }

    fn try_allocate(&mut self) -> Option<NonNull<u8>> {
        if self.allocated {
            return None;
        }
        self.allocated = true;
        Some(self.data)
    }

    unsafe fn sweep<T: SweepTraits>(
        &mut self,
        scope: &mut T::Scope,
        finalizer_queue: &mut FinalizerQueue,
    ) -> bool {
        if !self.allocated {
            return false;
        }
        if unsafe { T::sweep_cell(self.data, scope, finalizer_queue) } {
            return true;
        }
        // SAFETY: the dead object is ours.
        unsafe { self.data.write_bytes(0, self.size.in_bytes()) };
        self.allocated = false;
        false
    }

    fn for_each_allocated(&self, mut f: impl FnMut(NonNull<u8>)) {
        if self.allocated {
            f(self.data);
        }
    }
}
