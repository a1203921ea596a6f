//! The language-visible object model, as far as the allocator sees it.
//!
//! Type descriptors are emitted by the compiler and consumed opaquely: the
//! allocator only reads sizes from them. Object bodies start with an
//! [`ObjHeader`] holding the type pointer; arrays extend it with an element
//! count ([`ArrayHeader`]) followed by inline elements.

use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::extra_object::ExtraObjectData;
use crate::type_layout::{align_up, BodyDescriptor};

/// Header type pointer carries an installed [`ExtraObjectData`] instead.
const OBJECT_TAG_HAS_META: usize = 0b01;
/// Object lives outside the GC heap (static data, stack allocation).
const OBJECT_TAG_PERMANENT: usize = 0b10;
const OBJECT_TAG_MASK: usize = OBJECT_TAG_HAS_META | OBJECT_TAG_PERMANENT;

/// `TypeInfo` flag: instances carry a finalizer.
pub const TF_HAS_FINALIZER: u32 = 1 << 0;

/// Compiler-emitted type descriptor.
#[derive(Debug)]
#[repr(C, align(8))]
pub struct TypeInfo {
    name: &'static str,
    instance_size: usize,
    element_size: usize,
    flags: u32,
}

impl TypeInfo {
    /// Descriptor of a scalar type whose body (header included) is
    /// `instance_size` bytes.
    #[must_use]
    pub const fn object(name: &'static str, instance_size: usize) -> Self {
        assert!(instance_size >= mem::size_of::<ObjHeader>());
        Self {
            name,
            instance_size,
            element_size: 0,
            flags: 0,
        }
    }

    /// Descriptor of an array type with `element_size`-byte elements.
    #[must_use]
    pub const fn array(name: &'static str, element_size: usize) -> Self {
        assert!(element_size > 0);
        Self {
            name,
            instance_size: 0,
            element_size,
            flags: 0,
        }
    }

    /// Same descriptor with `flags` set.
    #[must_use]
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    /// Type name, for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// `true` for array types.
    #[must_use]
    pub const fn is_array(&self) -> bool {
        self.element_size != 0
    }

    /// Body size of a scalar instance, header included.
    #[must_use]
    pub const fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// Size of one array element.
    #[must_use]
    pub const fn element_size(&self) -> usize {
        self.element_size
    }

    /// `true` if every flag in `flags` is set.
    #[must_use]
    pub const fn has_flags(&self, flags: u32) -> bool {
        self.flags & flags == flags
    }
}

// ============================================================================
// ObjHeader / ArrayHeader
// ============================================================================

/// Header at the start of every object body.
///
/// The single word holds the type pointer, or a pointer to the object's
/// [`ExtraObjectData`] once one is installed; the low bits tag which.
#[derive(Debug)]
#[repr(C)]
pub struct ObjHeader {
    type_info_or_meta: AtomicUsize,
}

impl ObjHeader {
    /// Header of a heap object of type `type_info`.
    #[must_use]
    pub fn new(type_info: &'static TypeInfo) -> Self {
        Self {
            type_info_or_meta: AtomicUsize::new(std::ptr::from_ref(type_info) as usize),
        }
    }

    /// Header of an object living outside the GC heap.
    #[must_use]
    pub fn permanent(type_info: &'static TypeInfo) -> Self {
        Self {
            type_info_or_meta: AtomicUsize::new(
                std::ptr::from_ref(type_info) as usize | OBJECT_TAG_PERMANENT,
            ),
        }
    }

    /// The object's type, looking through an installed extra data record.
    #[must_use]
    pub fn type_info(&self) -> &'static TypeInfo {
        let word = self.type_info_or_meta.load(Ordering::Acquire);
        if word & OBJECT_TAG_HAS_META != 0 {
            let meta = (word & !OBJECT_TAG_MASK) as *const ExtraObjectData;
            // SAFETY: a tagged meta pointer always refers to a live record
            // holding the type of its base object.
            if let Some(type_info) = unsafe { (*meta).type_info() } {
                return type_info;
            }
        }
        // SAFETY: untagged words always come from a `&'static TypeInfo`.
        unsafe { &*((word & !OBJECT_TAG_MASK) as *const TypeInfo) }
    }

    /// `true` if the object was allocated in the GC heap.
    #[must_use]
    pub fn heap(&self) -> bool {
        self.type_info_or_meta.load(Ordering::Relaxed) & OBJECT_TAG_PERMANENT == 0
    }

    /// `true` if an [`ExtraObjectData`] is installed on this object.
    #[must_use]
    pub fn has_meta(&self) -> bool {
        self.type_info_or_meta.load(Ordering::Relaxed) & OBJECT_TAG_HAS_META != 0
    }

    /// The installed extra data record, if any.
    pub(crate) fn meta(&self) -> Option<NonNull<ExtraObjectData>> {
        let word = self.type_info_or_meta.load(Ordering::Acquire);
        if word & OBJECT_TAG_HAS_META == 0 {
            return None;
        }
        NonNull::new((word & !OBJECT_TAG_MASK) as *mut ExtraObjectData)
    }

    /// Publish `meta` as this object's extra data.
    ///
    /// Fails with the record that won if another one was installed first.
    pub(crate) fn try_install_meta(
        &self,
        meta: NonNull<ExtraObjectData>,
    ) -> Result<(), NonNull<ExtraObjectData>> {
        let meta_word = meta.as_ptr() as usize;
        debug_assert_eq!(meta_word & OBJECT_TAG_MASK, 0, "misaligned extra object data");

        let mut current = self.type_info_or_meta.load(Ordering::Acquire);
        loop {
            if let Some(existing) = self.meta() {
                return Err(existing);
            }
            let tagged = meta_word | OBJECT_TAG_HAS_META | (current & OBJECT_TAG_PERMANENT);
            match self.type_info_or_meta.compare_exchange_weak(
                current,
                tagged,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Write a fresh header for a new object of type `type_info`.
    ///
    /// # Safety
    ///
    /// `object` must be valid for writes of an `ObjHeader`.
    pub(crate) unsafe fn init(object: NonNull<Self>, type_info: &'static TypeInfo) {
        unsafe { object.write(Self::new(type_info)) };
    }
}

/// Header of an array body.
///
/// Starts with an [`ObjHeader`], so an array pointer is always a valid
/// object pointer.
#[derive(Debug)]
#[repr(C)]
pub struct ArrayHeader {
    header: ObjHeader,
    count: u32,
}

/// Offset of the first element from the array header.
pub const ARRAY_DATA_OFFSET: usize = align_up(mem::size_of::<ArrayHeader>(), 8);

impl ArrayHeader {
    /// Header of a heap array of `count` elements.
    #[must_use]
    pub fn new(type_info: &'static TypeInfo, count: u32) -> Self {
        debug_assert!(type_info.is_array(), "{} is not an array type", type_info.name());
        Self {
            header: ObjHeader::new(type_info),
            count,
        }
    }

    /// The array viewed as a plain object.
    #[must_use]
    pub const fn obj(&self) -> &ObjHeader {
        &self.header
    }

    /// Number of elements.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Write a fresh header for a new array.
    ///
    /// # Safety
    ///
    /// `array` must be valid for writes of an `ArrayHeader`.
    pub(crate) unsafe fn init(array: NonNull<Self>, type_info: &'static TypeInfo, count: u32) {
        unsafe { array.write(Self::new(type_info, count)) };
    }
}

/// Address of element `index` of `array`.
///
/// `index == count` yields the one-past-the-end address.
///
/// # Safety
///
/// `array` must point to a live array and `index <= count`.
#[must_use]
pub unsafe fn array_address_of_element_at(array: NonNull<ArrayHeader>, index: usize) -> NonNull<u8> {
    // SAFETY: the caller guarantees `array` is live.
    let element_size = unsafe { array.as_ref() }.obj().type_info().element_size();
    debug_assert!(index <= unsafe { array.as_ref() }.count() as usize);
    // SAFETY: elements (and one past the last) lie in the array allocation.
    unsafe { array.cast::<u8>().add(ARRAY_DATA_OFFSET + index * element_size) }
}

// ============================================================================
// Body descriptors
// ============================================================================

/// Body of a scalar object.
#[derive(Debug, Clone, Copy)]
pub struct ObjectBody {
    type_info: &'static TypeInfo,
}

impl ObjectBody {
    /// Body of an instance of `type_info`.
    #[must_use]
    pub const fn new(type_info: &'static TypeInfo) -> Self {
        Self { type_info }
    }
}

impl BodyDescriptor for ObjectBody {
    const ALIGN: usize = mem::align_of::<ObjHeader>();

    fn size(&self) -> usize {
        self.type_info.instance_size()
    }
}

/// Body of an array: header plus `count` inline elements.
#[derive(Debug, Clone, Copy)]
pub struct ArrayBody {
    type_info: &'static TypeInfo,
    count: u32,
}

impl ArrayBody {
    /// Body of an array of `count` elements of `type_info`.
    #[must_use]
    pub const fn new(type_info: &'static TypeInfo, count: u32) -> Self {
        Self { type_info, count }
    }
}

impl BodyDescriptor for ArrayBody {
    const ALIGN: usize = mem::align_of::<ArrayHeader>();

    fn size(&self) -> usize {
        ARRAY_DATA_OFFSET + self.type_info.element_size() * self.count as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static POINT: TypeInfo = TypeInfo::object("Point", 24);
    static INT_ARRAY: TypeInfo = TypeInfo::array("IntArray", 4);

    #[test]
    fn test_header_reports_type() {
        let header = ObjHeader::new(&POINT);
        assert!(std::ptr::eq(header.type_info(), &POINT));
        assert!(header.heap());
        assert!(!header.has_meta());
        assert!(header.meta().is_none());
    }

    #[test]
    fn test_permanent_objects_are_not_in_heap() {
        let header = ObjHeader::permanent(&POINT);
        assert!(!header.heap());
        assert!(std::ptr::eq(header.type_info(), &POINT));
    }

    #[test]
    fn test_body_sizes() {
        assert_eq!(ObjectBody::new(&POINT).size(), 24);
        assert_eq!(ArrayBody::new(&INT_ARRAY, 0).size(), ARRAY_DATA_OFFSET);
        assert_eq!(ArrayBody::new(&INT_ARRAY, 3).size(), ARRAY_DATA_OFFSET + 12);
    }

    #[test]
    fn test_array_header_starts_with_object_header() {
        let array = ArrayHeader::new(&INT_ARRAY, 7);
        assert_eq!(array.count(), 7);
        assert!(std::ptr::eq(
            std::ptr::from_ref(array.obj()).cast::<u8>(),
            std::ptr::from_ref(&array).cast::<u8>()
        ));
        assert!(array.obj().type_info().is_array());
    }

    #[test]
    fn test_type_flags() {
        static FINALIZABLE: TypeInfo =
            TypeInfo::object("Resource", 16).with_flags(TF_HAS_FINALIZER);
        assert!(FINALIZABLE.has_flags(TF_HAS_FINALIZER));
        assert!(!POINT.has_flags(TF_HAS_FINALIZER));
    }
}
