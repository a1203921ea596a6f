//! Side records for objects that need more than a header.
//!
//! An [`ExtraObjectData`] carries what only a few objects need: a finalizer,
//! a weak reference, an associated native object. It lives in an
//! [`ExtraObjectCell`] taken from the heap's extra object pool and is linked
//! from the object header, which then points at the record instead of the
//! type (the record remembers the type).
//!
//! Lifecycle: the record is created unsweepable. When its object dies the
//! object sweep detaches it and either queues it for finalization or flags
//! it [`FLAGS_SWEEPABLE`]. The next extra object sweep drops sweepable
//! records and zeroes their cells.

use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::allocation_size::{AllocationSize, CELL_SIZE};
use crate::object::{ObjHeader, TypeInfo, TF_HAS_FINALIZER};

/// No flags.
pub const FLAGS_NONE: u32 = 0;
/// Record is on a finalizer queue.
pub const FLAGS_IN_FINALIZER_QUEUE: u32 = 1 << 0;
/// Record can be reclaimed by the next extra object sweep.
pub const FLAGS_SWEEPABLE: u32 = 1 << 1;
/// The finalizer has run.
pub const FLAGS_FINALIZED: u32 = 1 << 2;

/// Finalizer callback. Runs after the base object is gone, so it only sees
/// the record.
pub type FinalizerFn = fn(&ExtraObjectData);

/// Side record attached to one heap object.
#[derive(Debug)]
#[repr(C)]
pub struct ExtraObjectData {
    type_info: Option<&'static TypeInfo>,
    base_object: AtomicPtr<ObjHeader>,
    weak_reference: AtomicPtr<ObjHeader>,
    associated_object: AtomicPtr<()>,
    finalizer: Option<FinalizerFn>,
    flags: AtomicU32,
}

impl ExtraObjectData {
    /// Record for `base_object` of type `type_info`, with no flags set.
    #[must_use]
    pub fn new(base_object: Option<NonNull<ObjHeader>>, type_info: Option<&'static TypeInfo>) -> Self {
        Self {
            type_info,
            base_object: AtomicPtr::new(base_object.map_or(ptr::null_mut(), NonNull::as_ptr)),
            weak_reference: AtomicPtr::new(ptr::null_mut()),
            associated_object: AtomicPtr::new(ptr::null_mut()),
            finalizer: None,
            flags: AtomicU32::new(FLAGS_NONE),
        }
    }

    /// Same record, finalized by `finalizer` once its object dies.
    #[must_use]
    pub fn with_finalizer(mut self, finalizer: FinalizerFn) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    /// Construct a record for `object` in `cell` and install it.
    ///
    /// If another record was installed first, the new one is flagged
    /// sweepable and the winner is returned instead.
    ///
    /// # Safety
    ///
    /// `object` must be live and `cell` must be a freshly allocated,
    /// zero-filled extra object cell.
    pub unsafe fn install(
        object: NonNull<ObjHeader>,
        cell: NonNull<ExtraObjectCell>,
        finalizer: Option<FinalizerFn>,
    ) -> NonNull<Self> {
        // SAFETY: the caller guarantees `object` is live.
        let header = unsafe { object.as_ref() };
        let mut data = Self::new(Some(object), Some(header.type_info()));
        data.finalizer = finalizer;
        let record = ExtraObjectCell::data(cell);
        // SAFETY: the cell is ours and sized for a record.
        unsafe { record.write(data) };

        match header.try_install_meta(record) {
            Ok(()) => record,
            Err(winner) => {
                // SAFETY: never published, still exclusively ours.
                let loser = unsafe { record.as_ref() };
                loser.detach_base_object();
                loser.set_flag(FLAGS_SWEEPABLE);
                winner
            }
        }
    }

    /// The record installed on `object`, if any.
    #[must_use]
    pub fn get(object: &ObjHeader) -> Option<NonNull<Self>> {
        object.meta()
    }

    /// Set `flag`.
    pub fn set_flag(&self, flag: u32) {
        self.flags.fetch_or(flag, Ordering::AcqRel);
    }

    /// Clear `flag`.
    pub fn clear_flag(&self, flag: u32) {
        self.flags.fetch_and(!flag, Ordering::AcqRel);
    }

    /// `true` if every bit of `flag` is set.
    #[must_use]
    pub fn get_flag(&self, flag: u32) -> bool {
        self.flags.load(Ordering::Acquire) & flag == flag
    }

    /// Type of the base object.
    #[must_use]
    pub const fn type_info(&self) -> Option<&'static TypeInfo> {
        self.type_info
    }

    /// The object this record belongs to, or `None` once it died.
    #[must_use]
    pub fn base_object(&self) -> Option<NonNull<ObjHeader>> {
        NonNull::new(self.base_object.load(Ordering::Acquire))
    }

    /// Forget the base object.
    pub fn detach_base_object(&self) {
        self.base_object.store(ptr::null_mut(), Ordering::Release);
    }

    /// The weak reference object, if any.
    #[must_use]
    pub fn weak_reference(&self) -> Option<NonNull<ObjHeader>> {
        NonNull::new(self.weak_reference.load(Ordering::Acquire))
    }

    /// Attach a weak reference object.
    pub fn set_weak_reference(&self, weak: NonNull<ObjHeader>) {
        self.weak_reference.store(weak.as_ptr(), Ordering::Release);
    }

    /// Drop the weak reference so it no longer resolves to the base object.
    pub fn clear_weak_reference(&self) {
        self.weak_reference.store(ptr::null_mut(), Ordering::Release);
    }

    /// Native object associated with the base object.
    #[must_use]
    pub fn associated_object(&self) -> Option<NonNull<()>> {
        NonNull::new(self.associated_object.load(Ordering::Acquire))
    }

    /// Associate a native object.
    pub fn set_associated_object(&self, associated: NonNull<()>) {
        self.associated_object.store(associated.as_ptr(), Ordering::Release);
    }

    /// The finalizer, if any.
    #[must_use]
    pub const fn finalizer(&self) -> Option<FinalizerFn> {
        self.finalizer
    }

    /// `true` if the base object must be finalized when it dies: either a
    /// finalizer was attached or the type declares one.
    #[must_use]
    pub fn needs_finalization(&self) -> bool {
        self.finalizer.is_some()
            || self
                .type_info
                .is_some_and(|type_info| type_info.has_flags(TF_HAS_FINALIZER))
    }

    /// Record that the finalizer ran. The next extra object sweep reclaims
    /// the record.
    pub fn mark_finalized(&self) {
        self.clear_flag(FLAGS_IN_FINALIZER_QUEUE);
        self.set_flag(FLAGS_FINALIZED | FLAGS_SWEEPABLE);
    }
}

/// Storage for one [`ExtraObjectData`] in the extra object pool.
#[repr(C, align(8))]
pub struct ExtraObjectCell {
    _storage: MaybeUninit<ExtraObjectData>,
}

impl ExtraObjectCell {
    /// Allocation size of a cell.
    pub const SIZE: AllocationSize = AllocationSize::bytes_exactly(mem::size_of::<Self>());

    /// The record stored in `cell`.
    #[must_use]
    pub const fn data(cell: NonNull<Self>) -> NonNull<ExtraObjectData> {
        cell.cast()
    }

    /// The cell holding `data`.
    #[must_use]
    pub const fn from_extra_object_data(data: NonNull<ExtraObjectData>) -> NonNull<Self> {
        data.cast()
    }
}

const _: () = assert!(mem::size_of::<ExtraObjectCell>() % CELL_SIZE == 0);
const _: () = assert!(mem::align_of::<ExtraObjectData>() >= 4);

#[cfg(test)]
mod tests {
    use super::*;

    static POINT: TypeInfo = TypeInfo::object("Point", 16);

    #[test]
    fn test_new_record_is_not_sweepable() {
        let data = ExtraObjectData::new(None, None);
        assert!(!data.get_flag(FLAGS_SWEEPABLE));
        assert!(!data.get_flag(FLAGS_IN_FINALIZER_QUEUE));
        assert!(data.get_flag(FLAGS_NONE));
        assert!(!data.needs_finalization());
    }

    #[test]
    fn test_flags() {
        let data = ExtraObjectData::new(None, None);
        data.set_flag(FLAGS_IN_FINALIZER_QUEUE);
        assert!(data.get_flag(FLAGS_IN_FINALIZER_QUEUE));

        data.mark_finalized();
        assert!(!data.get_flag(FLAGS_IN_FINALIZER_QUEUE));
        assert!(data.get_flag(FLAGS_FINALIZED | FLAGS_SWEEPABLE));

        data.clear_flag(FLAGS_SWEEPABLE);
        assert!(!data.get_flag(FLAGS_SWEEPABLE));
        assert!(data.get_flag(FLAGS_FINALIZED));
    }

    #[test]
    fn test_install_and_get() {
        let object = ObjHeader::new(&POINT);
        let object_ptr = NonNull::from(&object);
        let mut cells: [MaybeUninit<ExtraObjectCell>; 2] = [const { MaybeUninit::zeroed() }; 2];
        let first_cell = NonNull::from(&mut cells[0]).cast::<ExtraObjectCell>();
        let second_cell = NonNull::from(&mut cells[1]).cast::<ExtraObjectCell>();

        let record = unsafe { ExtraObjectData::install(object_ptr, first_cell, None) };
        assert!(object.has_meta());
        assert_eq!(ExtraObjectData::get(&object), Some(record));
        assert!(std::ptr::eq(object.type_info(), &POINT));

        let record_ref = unsafe { record.as_ref() };
        assert_eq!(record_ref.base_object(), Some(object_ptr));
        assert!(std::ptr::eq(record_ref.type_info().unwrap(), &POINT));

        // A second install finds the first record and gives up its own.
        let again = unsafe { ExtraObjectData::install(object_ptr, second_cell, None) };
        assert_eq!(again, record);
        let loser = unsafe { ExtraObjectCell::data(second_cell).as_ref() };
        assert!(loser.get_flag(FLAGS_SWEEPABLE));
        assert!(loser.base_object().is_none());
    }

    #[test]
    fn test_finalization_from_type_or_callback() {
        static RESOURCE: TypeInfo = TypeInfo::object("Resource", 16).with_flags(TF_HAS_FINALIZER);
        assert!(ExtraObjectData::new(None, Some(&RESOURCE)).needs_finalization());
        assert!(!ExtraObjectData::new(None, Some(&POINT)).needs_finalization());
        assert!(ExtraObjectData::new(None, Some(&POINT))
            .with_finalizer(|_| {})
            .needs_finalization());
    }

    #[test]
    fn test_weak_reference_and_base_object() {
        let object = ObjHeader::new(&POINT);
        let weak = ObjHeader::new(&POINT);
        let data = ExtraObjectData::new(Some(NonNull::from(&object)), Some(&POINT));

        data.set_weak_reference(NonNull::from(&weak));
        assert!(data.weak_reference().is_some());
        data.clear_weak_reference();
        assert!(data.weak_reference().is_none());

        data.detach_base_object();
        assert!(data.base_object().is_none());
    }

    #[test]
    fn test_cell_conversions() {
        let cell = NonNull::<ExtraObjectCell>::dangling();
        let data = ExtraObjectCell::data(cell);
        assert_eq!(ExtraObjectCell::from_extra_object_data(data), cell);
        assert!(ExtraObjectCell::SIZE.in_bytes() >= mem::size_of::<ExtraObjectData>());
    }
}
