//! The allocator's narrow call boundary.
//!
//! [`safe_alloc`] and [`free`] move page-sized memory between the OS and the
//! page pools and keep [`allocated_bytes`] current. [`sweep_object`] and
//! [`sweep_extra_object`] are the per-cell sweep decisions the collector
//! uses outside of a page walk.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use sys_alloc::{Mmap, MmapOptions};

use crate::config::freeze_allocator_config;
use crate::extra_object::ExtraObjectData;
use crate::finalizer_queue::FinalizerQueue;
use crate::gc_handle::{GcSweepExtraObjectsScope, GcSweepScope};
use crate::sweep::{ExtraDataSweepTraits, ObjectSweepTraits, SweepTraits};

static ALLOCATED_BYTES: AtomicUsize = AtomicUsize::new(0);

fn out_of_memory(size: u64, reason: &dyn std::fmt::Display) -> ! {
    #[cfg(feature = "tracing")]
    tracing::error!(size, %reason, "out_of_memory");

    eprintln!("Out of memory trying to allocate {size} bytes: {reason}. Aborting.");
    std::process::abort()
}

fn page_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size, sys_alloc::page_size()).ok()
}

/// Obtain `size` bytes of zero-filled, page-aligned memory.
///
/// Never fails: if the memory cannot be obtained the process aborts, since
/// a half-built object graph cannot be unwound.
#[must_use]
pub fn safe_alloc(size: u64) -> NonNull<u8> {
    let Ok(len) = usize::try_from(size) else {
        out_of_memory(size, &"size exceeds the address space");
    };
    if len == 0 {
        out_of_memory(size, &"zero-sized request");
    }

    let config = freeze_allocator_config();
    let memory = if config.disable_mmap {
        let Some(layout) = page_layout(len) else {
            out_of_memory(size, &"invalid layout");
        };
        // SAFETY: `layout` has a non-zero size.
        match NonNull::new(unsafe { alloc_zeroed(layout) }) {
            Some(memory) => memory,
            None => out_of_memory(size, &"global allocator returned null"),
        }
    } else {
        let mapping = MmapOptions::new()
            .len(len)
            .populate(config.populate)
            .no_reserve(config.no_reserve)
            .map_anon();
        match mapping {
            Ok(mapping) => mapping.into_raw().0,
            Err(err) => out_of_memory(size, &err),
        }
    };

    ALLOCATED_BYTES.fetch_add(len, Ordering::Relaxed);
    memory
}

/// Return memory obtained from [`safe_alloc`].
///
/// # Safety
///
/// `ptr` must come from `safe_alloc(size)` with exactly this `size`, and
/// must not be used afterwards.
pub unsafe fn free(ptr: NonNull<u8>, size: usize) {
    if freeze_allocator_config().disable_mmap {
        if let Some(layout) = page_layout(size) {
            // SAFETY: allocated by `safe_alloc` with this layout.
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    } else {
        // SAFETY: `safe_alloc` released exactly this mapping via `into_raw`.
        drop(unsafe { Mmap::from_raw(ptr, size) });
    }
    ALLOCATED_BYTES.fetch_sub(size, Ordering::Relaxed);
}

/// Bytes currently obtained through [`safe_alloc`] and not yet freed.
#[must_use]
pub fn allocated_bytes() -> usize {
    ALLOCATED_BYTES.load(Ordering::Relaxed)
}

/// Sweep decision for one heap object. Returns `true` if it must be kept.
///
/// Dead objects have their extra data detached (and queued for
/// finalization when needed); the caller frees the cell.
///
/// # Safety
///
/// `object` must be the start of an allocated heap object cell that no
/// mutator can reach concurrently.
pub unsafe fn sweep_object(
    object: NonNull<u8>,
    finalizer_queue: &mut FinalizerQueue,
    sweep_scope: &mut GcSweepScope,
) -> bool {
    unsafe { ObjectSweepTraits::sweep_cell(object, sweep_scope, finalizer_queue) }
}

/// Sweep decision for one extra data record. Returns `true` if it must be kept.
///
/// Swept records are dropped in place; the caller frees the cell.
///
/// # Safety
///
/// `extra_object` must be a live record inside an extra object cell.
pub unsafe fn sweep_extra_object(
    extra_object: NonNull<ExtraObjectData>,
    sweep_scope: &mut GcSweepExtraObjectsScope,
) -> bool {
    let mut unused = FinalizerQueue::new();
    unsafe { ExtraDataSweepTraits::sweep_cell(extra_object.cast(), sweep_scope, &mut unused) }
}
