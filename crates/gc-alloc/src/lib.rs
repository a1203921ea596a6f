//! A size-classed page allocator and sweep engine for a non-moving
//! mark-sweep collector.
//!
//! `gc-alloc` hands out zero-filled memory for managed objects and reclaims
//! it after the collector has marked what is reachable. It uses a **`BiBOP`
//! (Big Bag of Pages)** layout: small objects live in pages of equal-size
//! blocks, one store per size class, and large objects get a page each.
//!
//! # Features
//!
//! - **Composite layouts**: every allocation is a GC control block followed
//!   by the object body, convertible in both directions with constant
//!   offsets ([`HeapObject`], [`HeapArray`], [`Composite`]).
//! - **Lock-free page handoff**: pages move between mutators and the
//!   sweeper through tagged [`AtomicStack`]s; no mutex anywhere.
//! - **Generic sweep**: one page walk, parameterized by [`SweepTraits`],
//!   sweeps both objects (mark bit) and extra object data
//!   ([`FLAGS_SWEEPABLE`]).
//! - **Finalization**: dead objects with finalizers end up in a
//!   [`FinalizerQueue`] in sweep order.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use gc_alloc::{Allocator, GcHandle, Heap, TypeInfo};
//!
//! static POINT: TypeInfo = TypeInfo::object("Point", 24);
//!
//! let heap = Arc::new(Heap::new());
//! let mut allocator = Allocator::new(Arc::clone(&heap));
//! let _point = allocator.allocate_object(&POINT);
//!
//! // Nothing marked it, so the next sweep reclaims it.
//! allocator.prepare_for_gc();
//! heap.prepare_for_gc();
//! let handle = GcHandle::next();
//! let finalizers = heap.sweep(&handle);
//! assert!(finalizers.is_empty());
//! assert_eq!(handle.statistics().swept_objects, 1);
//! ```
//!
//! # Thread Safety
//!
//! [`Heap`] is shared between threads; each mutator owns an [`Allocator`].
//! The collector must pause mutators around [`Heap::prepare_for_gc`]; the
//! sweeps themselves may overlap with allocation.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod allocation_size;
mod allocator;
mod atomic_stack;
mod config;
mod extra_object;
mod finalizer_queue;
mod gc_api;
mod gc_handle;
mod heap;
mod heap_object;
mod object;
mod object_data;
mod page_store;
mod sweep;
mod tracing;
mod type_layout;

/// Page kinds.
///
/// Public for tests and for collectors that drive sweeps page by page.
pub mod page;

// Re-export public API
pub use allocation_size::{
    AllocationSize, SizeClass, CELL_SIZE, FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS, FIXED_BLOCK_PAGE_SIZE,
    HEAP_ALIGNMENT,
};
pub use allocator::Allocator;
pub use atomic_stack::{AtomicStack, StackNode, NODE_ALIGN};
pub use config::{allocator_config, set_allocator_config, AllocatorConfig};
pub use extra_object::{
    ExtraObjectCell, ExtraObjectData, FinalizerFn, FLAGS_FINALIZED, FLAGS_IN_FINALIZER_QUEUE,
    FLAGS_NONE, FLAGS_SWEEPABLE,
};
pub use finalizer_queue::FinalizerQueue;
pub use gc_api::{allocated_bytes, free, safe_alloc, sweep_extra_object, sweep_object};
pub use gc_handle::{GcHandle, GcSweepExtraObjectsScope, GcSweepScope, SweepStatistics};
pub use heap::Heap;
pub use heap_object::{HeapArray, HeapArrayDescriptor, HeapObject, HeapObjectDescriptor};
pub use object::{
    array_address_of_element_at, ArrayBody, ArrayHeader, ObjHeader, ObjectBody, TypeInfo,
    ARRAY_DATA_OFFSET, TF_HAS_FINALIZER,
};
pub use object_data::ObjectData;
pub use page_store::PageStore;
pub use sweep::{ExtraDataSweepTraits, ObjectSweepTraits, SweepScope, SweepTraits};
pub use tracing::{next_gc_id, GcId};
pub use type_layout::{align_up, BodyDescriptor, Composite, Static};

#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod test_util {
    use std::ptr::NonNull;

    use crate::{HeapObject, ObjHeader};

    /// Mark `object` the way the collector's mark phase would.
    ///
    /// # Safety
    ///
    /// `object` must be a live heap object.
    pub unsafe fn mark(object: NonNull<ObjHeader>) -> bool {
        // SAFETY: forwarded caller contract.
        let object = unsafe { HeapObject::from_object(object) };
        unsafe { object.object_data().as_ref() }.try_mark()
    }

    /// `true` if `object` is marked.
    ///
    /// # Safety
    ///
    /// `object` must be a live heap object.
    pub unsafe fn is_marked(object: NonNull<ObjHeader>) -> bool {
        // SAFETY: forwarded caller contract.
        let object = unsafe { HeapObject::from_object(object) };
        unsafe { object.object_data().as_ref() }.is_marked()
    }

    /// `true` if `len` bytes at `ptr` are all zero.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes.
    pub unsafe fn is_zeroed(ptr: NonNull<u8>, len: usize) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }
            .iter()
            .all(|&b| b == 0)
    }
}
