//! `HeapObject` and `HeapArray`: views over `{ ObjectData, body }`.
//!
//! A heap allocation is a [`Composite`] of the collector's [`ObjectData`]
//! and the object body. The views below are plain addresses; converting
//! between the control block, the composite and the body never copies.

use std::ptr::NonNull;

use crate::object::{ArrayBody, ArrayHeader, ObjHeader, ObjectBody, TypeInfo};
use crate::object_data::ObjectData;
use crate::type_layout::Composite;

/// Layout of a heap object.
pub type HeapObjectDescriptor = Composite<ObjectData, ObjectBody>;

/// Layout of a heap array.
pub type HeapArrayDescriptor = Composite<ObjectData, ArrayBody>;

// Arrays must be usable wherever objects are.
const _: () = assert!(HeapObjectDescriptor::FIELD1_OFFSET == HeapArrayDescriptor::FIELD1_OFFSET);

/// View of a scalar heap allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct HeapObject {
    start: NonNull<u8>,
}

impl HeapObject {
    /// Layout of an instance of `type_info`.
    #[must_use]
    pub const fn make_descriptor(type_info: &'static TypeInfo) -> HeapObjectDescriptor {
        Composite::new(ObjectBody::new(type_info))
    }

    /// View the allocation starting at `start`.
    ///
    /// # Safety
    ///
    /// `start` must be the first byte of a heap object allocation.
    #[must_use]
    pub const unsafe fn from_start(start: NonNull<u8>) -> Self {
        Self { start }
    }

    /// Recover the allocation from its control block.
    #[must_use]
    pub const fn from_object_data(object_data: NonNull<ObjectData>) -> Self {
        Self {
            start: HeapObjectDescriptor::from_field0(object_data),
        }
    }

    /// Recover the allocation from its body.
    ///
    /// # Safety
    ///
    /// `object` must be a live object allocated in the GC heap.
    #[must_use]
    pub unsafe fn from_object(object: NonNull<ObjHeader>) -> Self {
        debug_assert!(
            unsafe { object.as_ref() }.heap(),
            "Object {object:p} does not reside in the heap"
        );
        Self {
            // SAFETY: heap objects are always field 1 of a heap composite.
            start: unsafe { HeapObjectDescriptor::from_field1(object.cast()) },
        }
    }

    /// First byte of the allocation.
    #[must_use]
    pub const fn start(self) -> NonNull<u8> {
        self.start
    }

    /// The control block.
    #[must_use]
    pub const fn object_data(self) -> NonNull<ObjectData> {
        HeapObjectDescriptor::field0(self.start)
    }

    /// The object body.
    #[must_use]
    pub const fn object(self) -> NonNull<ObjHeader> {
        // SAFETY: `self` views a heap composite.
        unsafe { HeapObjectDescriptor::field1(self.start) }.cast()
    }
}

/// View of an array heap allocation.
///
/// Shares its control-block prefix with [`HeapObject`]; see the
/// `From<HeapArray>` conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct HeapArray {
    start: NonNull<u8>,
}

impl HeapArray {
    /// Layout of an array of `count` elements of `type_info`.
    #[must_use]
    pub const fn make_descriptor(type_info: &'static TypeInfo, count: u32) -> HeapArrayDescriptor {
        Composite::new(ArrayBody::new(type_info, count))
    }

    /// View the allocation starting at `start`.
    ///
    /// # Safety
    ///
    /// `start` must be the first byte of a heap array allocation.
    #[must_use]
    pub const unsafe fn from_start(start: NonNull<u8>) -> Self {
        Self { start }
    }

    /// Recover the allocation from its control block.
    #[must_use]
    pub const fn from_object_data(object_data: NonNull<ObjectData>) -> Self {
        Self {
            start: HeapArrayDescriptor::from_field0(object_data),
        }
    }

    /// Recover the allocation from its body.
    ///
    /// # Safety
    ///
    /// `array` must be a live array allocated in the GC heap.
    #[must_use]
    pub unsafe fn from_array(array: NonNull<ArrayHeader>) -> Self {
        debug_assert!(
            unsafe { array.as_ref() }.obj().heap(),
            "Array {array:p} does not reside in the heap"
        );
        Self {
            // SAFETY: heap arrays are always field 1 of a heap array composite.
            start: unsafe { HeapArrayDescriptor::from_field1(array.cast()) },
        }
    }

    /// First byte of the allocation.
    #[must_use]
    pub const fn start(self) -> NonNull<u8> {
        self.start
    }

    /// The control block.
    #[must_use]
    pub const fn object_data(self) -> NonNull<ObjectData> {
        HeapArrayDescriptor::field0(self.start)
    }

    /// The array body.
    #[must_use]
    pub const fn array(self) -> NonNull<ArrayHeader> {
        // SAFETY: `self` views a heap array composite.
        unsafe { HeapArrayDescriptor::field1(self.start) }.cast()
    }
}

impl From<HeapArray> for HeapObject {
    fn from(array: HeapArray) -> Self {
        Self { start: array.start }
    }
}
