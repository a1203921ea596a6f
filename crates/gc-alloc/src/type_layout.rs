//! Composite layouts: two records sharing one allocation.
//!
//! A [`Composite<C, B>`] places a statically typed prefix `C` (the GC
//! control block) and a dynamically sized body described by `B` in one
//! contiguous block. The offsets are compile-time constants, so moving
//! between the composite start and either sub-part is a single pointer
//! addition or subtraction that needs no knowledge of the body's size.

use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

/// Round `value` up to a multiple of `align` (a power of two).
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Describes the shape of a composite's body.
pub trait BodyDescriptor {
    /// Alignment of the body. Fixed per body kind, never per instance, so
    /// the body offset is the same for every composite of this kind.
    const ALIGN: usize;

    /// Size of this body in bytes.
    fn size(&self) -> usize;
}

/// Body descriptor for a statically sized `T`.
pub struct Static<T>(PhantomData<fn() -> T>);

impl<T> Static<T> {
    /// Descriptor of a `T`.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Static<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BodyDescriptor for Static<T> {
    const ALIGN: usize = mem::align_of::<T>();

    fn size(&self) -> usize {
        mem::size_of::<T>()
    }
}

/// Layout of `{ C, body }` in one allocation.
///
/// Field 0 is the `C` prefix at offset 0, field 1 is the body at
/// [`Composite::FIELD1_OFFSET`].
pub struct Composite<C, B> {
    body: B,
    _prefix: PhantomData<fn() -> C>,
}

impl<C, B: BodyDescriptor> Composite<C, B> {
    /// Offset of the prefix.
    pub const FIELD0_OFFSET: usize = 0;

    /// Offset of the body.
    pub const FIELD1_OFFSET: usize = align_up(mem::size_of::<C>(), B::ALIGN);

    /// Alignment of the whole composite.
    pub const ALIGN: usize = if mem::align_of::<C>() > B::ALIGN {
        mem::align_of::<C>()
    } else {
        B::ALIGN
    };

    /// Build a descriptor for a composite with the given body.
    pub const fn new(body: B) -> Self {
        Self {
            body,
            _prefix: PhantomData,
        }
    }

    /// Total size of the composite, padded to its alignment.
    pub fn size(&self) -> usize {
        align_up(Self::FIELD1_OFFSET + self.body.size(), Self::ALIGN)
    }

    /// The prefix of the composite starting at `start`.
    pub const fn field0(start: NonNull<u8>) -> NonNull<C> {
        start.cast::<C>()
    }

    /// The body of the composite starting at `start`.
    ///
    /// # Safety
    ///
    /// `start` must be the start of a composite of this layout.
    pub const unsafe fn field1(start: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: the body lies inside the composite.
        unsafe { start.add(Self::FIELD1_OFFSET) }
    }

    /// Recover the composite start from its prefix.
    pub const fn from_field0(prefix: NonNull<C>) -> NonNull<u8> {
        prefix.cast::<u8>()
    }

    /// Recover the composite start from its body.
    ///
    /// # Safety
    ///
    /// `body` must really be field 1 of some composite of a layout with the
    /// same `C` and `B::ALIGN`. Nothing is checked.
    pub const unsafe fn from_field1(body: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: forwarded caller contract; the start lies in the same allocation.
        unsafe { body.sub(Self::FIELD1_OFFSET) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(#[allow(dead_code)] u16);

    #[repr(align(16))]
    struct Wide([u8; 16]);

    struct Bytes(usize);

    impl BodyDescriptor for Bytes {
        const ALIGN: usize = 4;

        fn size(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(13, 4), 16);
    }

    #[test]
    fn test_body_offset_respects_body_alignment() {
        assert_eq!(Composite::<Tag, Static<Wide>>::FIELD1_OFFSET, 16);
        assert_eq!(Composite::<Tag, Static<Wide>>::ALIGN, 16);
        assert_eq!(Composite::<Tag, Bytes>::FIELD1_OFFSET, 4);
        assert_eq!(Composite::<Tag, Bytes>::ALIGN, 4);
    }

    #[test]
    fn test_size_covers_body_and_padding() {
        assert_eq!(Composite::<Tag, Static<Wide>>::new(Static::new()).size(), 32);
        assert_eq!(Composite::<Tag, Bytes>::new(Bytes(0)).size(), 4);
        assert_eq!(Composite::<Tag, Bytes>::new(Bytes(5)).size(), 12);
    }

    #[test]
    fn test_fields_round_trip() {
        type Layout = Composite<Tag, Bytes>;
        let mut storage = [0u32; 8];
        let start = NonNull::from(&mut storage).cast::<u8>();

        let prefix = Layout::field0(start);
        let body = unsafe { Layout::field1(start) };

        assert_eq!(Layout::from_field0(prefix), start);
        assert_eq!(unsafe { Layout::from_field1(body) }, start);
        assert_eq!(body.as_ptr() as usize - start.as_ptr() as usize, 4);
    }
}
