//! Anonymous, zero-filled page mappings.
//!
//! Every page the allocator hands out is backed by one mapping from this
//! crate. Mappings are owned by [`Mmap`] and released when it drops; the
//! allocator's C-like `safe_alloc`/`free` boundary moves ownership across
//! with [`Mmap::into_raw`] and [`Mmap::from_raw`].

use std::io;
use std::ptr::NonNull;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows, this is typically 64KB. On Unix, this is the system page size.
/// Every mapping starts at an address aligned to this value.
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// An owned anonymous memory mapping.
///
/// The mapping is unmapped when this handle is dropped. Fresh mappings are
/// always zero-filled.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the start of the mapping.
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the mapping covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Gives up ownership of the mapping, returning its start and length.
    ///
    /// The memory stays mapped until it is handed back to [`Mmap::from_raw`]
    /// and that handle is dropped.
    pub fn into_raw(self) -> (NonNull<u8>, usize) {
        let len = self.inner.len();
        let ptr = self.inner.ptr();
        std::mem::forget(self);
        // SAFETY: successful mappings never start at null.
        (unsafe { NonNull::new_unchecked(ptr) }, len)
    }

    /// Re-takes ownership of a mapping released by [`Mmap::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` and `len` must be exactly the pair returned by a previous
    /// `into_raw`, and the mapping must not have been reclaimed since.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            // SAFETY: forwarded caller contract.
            inner: unsafe { os::MmapInner::from_raw(ptr.as_ptr(), len) },
        }
    }
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

/// Configuration for creating an anonymous mapping.
#[derive(Debug, Clone)]
pub struct MmapOptions {
    len: usize,
    populate: bool,
    no_reserve: bool,
}

impl MmapOptions {
    /// Creates a new `MmapOptions` with length 0.
    /// A length must be set before mapping.
    pub const fn new() -> Self {
        Self {
            len: 0,
            populate: false,
            no_reserve: false,
        }
    }

    /// Sets the length of the mapping in bytes.
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Sets whether to prefault the page tables (`MAP_POPULATE` on Linux).
    pub const fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Sets whether to skip swap reservation (`MAP_NORESERVE` where supported).
    pub const fn no_reserve(mut self, no_reserve: bool) -> Self {
        self.no_reserve = no_reserve;
        self
    }

    /// Creates an anonymous, zero-filled, read-write mapping.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero length, or the OS error when the
    /// mapping cannot be created (typically address-space exhaustion).
    pub fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        // SAFETY: no hint address is passed, so the OS picks a fresh range
        // that cannot alias any existing allocation.
        let inner = unsafe { os::MmapInner::map_anon(self.len, self.populate, self.no_reserve)? };

        Ok(Mmap { inner })
    }
}

impl Default for MmapOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn test_page_size() {
        let ps = page_size();
        assert!(ps > 0);
        assert_eq!(ps & (ps - 1), 0, "Page size should be power of 2");
    }

    #[test]
    fn test_allocation_granularity() {
        let ag = allocation_granularity();
        assert!(ag > 0);
        assert_eq!(ag & (ag - 1), 0, "Allocation granularity should be power of 2");
        assert!(ag >= page_size());
    }

    #[test]
    fn test_zero_length_rejected() {
        let err = MmapOptions::new().map_anon().err().map(|e| e.kind());
        assert_eq!(err, Some(io::ErrorKind::InvalidInput));
    }

    #[test]
    fn test_fresh_mapping_is_zeroed_and_aligned() {
        let len = 4 * page_size();
        let mmap = MmapOptions::new()
            .len(len)
            .populate(true)
            .no_reserve(true)
            .map_anon()
            .expect("failed to map");

        assert_eq!(mmap.len(), len);
        assert_eq!(mmap.ptr() as usize % allocation_granularity(), 0);

        let bytes = unsafe { std::slice::from_raw_parts(mmap.ptr(), len) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_raw_round_trip_keeps_mapping() {
        let len = page_size();
        let mmap = MmapOptions::new().len(len).map_anon().expect("failed to map");

        let (raw, raw_len) = mmap.into_raw();
        assert_eq!(raw_len, len);

        unsafe {
            ptr::write_volatile(raw.as_ptr(), 42);
            assert_eq!(ptr::read_volatile(raw.as_ptr()), 42);
        }

        let mmap = unsafe { Mmap::from_raw(raw, raw_len) };
        assert_eq!(mmap.ptr(), raw.as_ptr());
        drop(mmap);
    }
}
