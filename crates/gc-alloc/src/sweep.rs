//! Sweep strategies.
//!
//! Pages walk their occupied cells and ask a [`SweepTraits`] implementation
//! what to do with each one. The strategy is a type parameter, so the choice
//! is made once per sweep pass and the per-cell calls are static.

use std::ptr::NonNull;

use crate::extra_object::{
    ExtraObjectCell, ExtraObjectData, FLAGS_IN_FINALIZER_QUEUE, FLAGS_SWEEPABLE,
};
use crate::finalizer_queue::FinalizerQueue;
use crate::gc_handle::{GcHandle, GcSweepExtraObjectsScope, GcSweepScope};
use crate::heap_object::HeapObject;

/// Kept/swept counters of a sweep scope token.
pub trait SweepScope {
    /// Count a surviving cell.
    fn add_kept_object(&mut self);
    /// Count a reclaimed cell.
    fn add_swept_object(&mut self);
}

impl SweepScope for GcSweepScope {
    fn add_kept_object(&mut self) {
        Self::add_kept_object(self);
    }

    fn add_swept_object(&mut self) {
        Self::add_swept_object(self);
    }
}

impl SweepScope for GcSweepExtraObjectsScope {
    fn add_kept_object(&mut self) {
        Self::add_kept_object(self);
    }

    fn add_swept_object(&mut self) {
        Self::add_swept_object(self);
    }
}

/// What a sweep pass does with the cells of one pool.
pub trait SweepTraits {
    /// Statistics token for one pass.
    type Scope: SweepScope;

    /// Open the token for a pass on behalf of `gc_handle`.
    fn current_sweep_scope(gc_handle: &GcHandle) -> Self::Scope;

    /// `true` if `cell` must be kept. Only reads the cell.
    ///
    /// # Safety
    ///
    /// `cell` must be the start of an allocated cell of this pool.
    unsafe fn is_alive(cell: NonNull<u8>) -> bool;

    /// Clean up after a dead `cell` before the page zeroes it.
    ///
    /// # Safety
    ///
    /// `cell` must be an allocated cell of this pool that [`Self::is_alive`]
    /// just rejected.
    unsafe fn on_destroy(cell: NonNull<u8>, finalizer_queue: &mut FinalizerQueue);

    /// Reset per-cycle state of a surviving `cell`, such as its mark bit.
    ///
    /// # Safety
    ///
    /// `cell` must be an allocated cell of this pool that [`Self::is_alive`]
    /// just accepted.
    #[inline]
    unsafe fn on_keep(_cell: NonNull<u8>) {}

    /// Decide one cell: `true` keeps it, `false` means the caller must free
    /// it.
    ///
    /// # Safety
    ///
    /// As for [`Self::is_alive`].
    #[inline]
    unsafe fn sweep_cell(
        cell: NonNull<u8>,
        scope: &mut Self::Scope,
        finalizer_queue: &mut FinalizerQueue,
    ) -> bool {
        if unsafe { Self::is_alive(cell) } {
            unsafe { Self::on_keep(cell) };
            scope.add_kept_object();
            return true;
        }
        unsafe { Self::on_destroy(cell, finalizer_queue) };
        scope.add_swept_object();
        false
    }
}

/// Sweeps heap objects and arrays by their mark bit.
#[derive(Debug, Clone, Copy)]
pub enum ObjectSweepTraits {}

impl SweepTraits for ObjectSweepTraits {
    type Scope = GcSweepScope;

    fn current_sweep_scope(gc_handle: &GcHandle) -> GcSweepScope {
        gc_handle.sweep()
    }

    unsafe fn is_alive(cell: NonNull<u8>) -> bool {
        // SAFETY: every cell of an object pool starts with a control block.
        let object = unsafe { HeapObject::from_start(cell) };
        unsafe { object.object_data().as_ref() }.is_marked()
    }

    unsafe fn on_keep(cell: NonNull<u8>) {
        let object = unsafe { HeapObject::from_start(cell) };
        unsafe { object.object_data().as_ref() }.try_reset_mark();
    }

    unsafe fn on_destroy(cell: NonNull<u8>, finalizer_queue: &mut FinalizerQueue) {
        let object = unsafe { HeapObject::from_start(cell) };
        // SAFETY: the body of a dead object is still intact until zeroed.
        let header = unsafe { object.object().as_ref() };
        let Some(extra_object) = ExtraObjectData::get(header) else {
            return;
        };
        // SAFETY: an installed record outlives its object.
        let extra = unsafe { extra_object.as_ref() };
        extra.clear_weak_reference();
        extra.detach_base_object();
        if extra.needs_finalization() {
            extra.set_flag(FLAGS_IN_FINALIZER_QUEUE);
            finalizer_queue.push(extra_object);
        } else {
            extra.set_flag(FLAGS_SWEEPABLE);
        }
    }
}

/// Sweeps extra object cells flagged [`FLAGS_SWEEPABLE`].
#[derive(Debug, Clone, Copy)]
pub enum ExtraDataSweepTraits {}

impl SweepTraits for ExtraDataSweepTraits {
    type Scope = GcSweepExtraObjectsScope;

    fn current_sweep_scope(gc_handle: &GcHandle) -> GcSweepExtraObjectsScope {
        gc_handle.sweep_extra_objects()
    }

    unsafe fn is_alive(cell: NonNull<u8>) -> bool {
        let extra = ExtraObjectCell::data(cell.cast());
        // SAFETY: allocated extra object cells always hold a record.
        !unsafe { extra.as_ref() }.get_flag(FLAGS_SWEEPABLE)
    }

    unsafe fn on_destroy(cell: NonNull<u8>, _finalizer_queue: &mut FinalizerQueue) {
        let extra = ExtraObjectCell::data(cell.cast());
        // SAFETY: sweepable records are unreachable; drop before zeroing.
        unsafe { extra.drop_in_place() };
    }
}
