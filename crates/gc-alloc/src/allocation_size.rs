//! Allocation sizes and size-class routing.
//!
//! All heap memory is measured in *cells* of [`CELL_SIZE`] bytes. Every
//! object starts on a cell boundary, which is what gives the runtime its
//! pointer-tagging bits and satisfies the strictest field alignment.

/// Size of one allocation cell in bytes.
pub const CELL_SIZE: usize = 8;

/// Alignment every heap object is guaranteed to have.
pub const HEAP_ALIGNMENT: usize = CELL_SIZE;

/// Size of a fixed-block page in bytes (256KB).
pub const FIXED_BLOCK_PAGE_SIZE: usize = 256 * 1024;

/// Largest block, in cells, served from fixed-block pages.
/// Anything bigger gets a page of its own.
pub const FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS: usize = 128;

/// A byte size rounded to whole cells.
///
/// Cell counts and byte sizes convert back and forth exactly:
/// `AllocationSize::cells(n).in_bytes() / CELL_SIZE == n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocationSize {
    cells: usize,
}

impl AllocationSize {
    /// A size of exactly `cells` cells.
    #[must_use]
    pub const fn cells(cells: usize) -> Self {
        Self { cells }
    }

    /// The smallest size holding `bytes` bytes.
    #[must_use]
    pub const fn bytes_at_least(bytes: usize) -> Self {
        Self {
            cells: bytes.div_ceil(CELL_SIZE),
        }
    }

    /// A size of exactly `bytes` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is not a multiple of [`CELL_SIZE`]. In a `const`
    /// context this is a compile error.
    #[must_use]
    pub const fn bytes_exactly(bytes: usize) -> Self {
        assert!(
            bytes % CELL_SIZE == 0,
            "size is not a whole number of cells"
        );
        Self {
            cells: bytes / CELL_SIZE,
        }
    }

    /// Number of cells.
    #[must_use]
    pub const fn in_cells(self) -> usize {
        self.cells
    }

    /// Number of bytes.
    #[must_use]
    pub const fn in_bytes(self) -> usize {
        self.cells * CELL_SIZE
    }

    /// `true` for a zero-cell size.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.cells == 0
    }
}

// ============================================================================
// SizeClass - routing a request to a page kind
// ============================================================================

/// The page pool an allocation is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeClass {
    /// A block of `cells` cells inside a shared [`FixedBlockPage`](crate::page::FixedBlockPage).
    FixedBlock {
        /// Block size in cells, `1..=FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS`.
        cells: usize,
    },
    /// A dedicated [`SingleObjectPage`](crate::page::SingleObjectPage).
    SingleObject {
        /// Object size in cells.
        cells: usize,
    },
}

impl SizeClass {
    /// Route `size` to its size class.
    ///
    /// Empty requests still occupy one cell so the allocation stays
    /// trackable by its page.
    #[must_use]
    pub const fn of(size: AllocationSize) -> Self {
        let cells = if size.cells == 0 { 1 } else { size.cells };
        if cells <= FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS {
            Self::FixedBlock { cells }
        } else {
            Self::SingleObject { cells }
        }
    }

    /// Route a request of `bytes` bytes to its size class.
    #[must_use]
    pub const fn for_bytes(bytes: usize) -> Self {
        Self::of(AllocationSize::bytes_at_least(bytes))
    }

    /// The size actually reserved for an allocation in this class.
    #[must_use]
    pub const fn allocation_size(self) -> AllocationSize {
        match self {
            Self::FixedBlock { cells } | Self::SingleObject { cells } => {
                AllocationSize::cells(cells)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_round_up_to_cells() {
        assert_eq!(AllocationSize::bytes_at_least(0).in_cells(), 0);
        assert_eq!(AllocationSize::bytes_at_least(1).in_cells(), 1);
        assert_eq!(AllocationSize::bytes_at_least(8).in_cells(), 1);
        assert_eq!(AllocationSize::bytes_at_least(9).in_cells(), 2);
        assert_eq!(AllocationSize::bytes_at_least(24).in_bytes(), 24);
        assert_eq!(AllocationSize::bytes_at_least(25).in_bytes(), 32);
    }

    #[test]
    fn test_cells_bytes_round_trip() {
        for cells in 0..1024 {
            let size = AllocationSize::cells(cells);
            assert_eq!(AllocationSize::bytes_exactly(size.in_bytes()), size);
            assert_eq!(size.in_bytes() % HEAP_ALIGNMENT, 0);
        }
    }

    #[test]
    #[should_panic(expected = "whole number of cells")]
    fn test_bytes_exactly_rejects_partial_cells() {
        let _ = AllocationSize::bytes_exactly(12);
    }

    #[test]
    fn test_zero_size_gets_smallest_class() {
        assert_eq!(SizeClass::for_bytes(0), SizeClass::FixedBlock { cells: 1 });
        assert_eq!(SizeClass::for_bytes(0).allocation_size().in_bytes(), CELL_SIZE);
    }

    #[test]
    fn test_size_class_is_monotonic_and_fits() {
        let mut previous = SizeClass::for_bytes(0).allocation_size();
        for bytes in 0..4 * FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS * CELL_SIZE {
            let class = SizeClass::for_bytes(bytes).allocation_size();
            assert!(class >= previous, "class shrank at {bytes} bytes");
            assert!(class.in_bytes() >= bytes);
            assert!(class.in_bytes() - bytes < CELL_SIZE || bytes == 0);
            previous = class;
        }
    }

    #[test]
    fn test_large_sizes_get_single_object_pages() {
        let limit = FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS * CELL_SIZE;
        assert!(matches!(
            SizeClass::for_bytes(limit),
            SizeClass::FixedBlock { cells } if cells == FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS
        ));
        assert!(matches!(
            SizeClass::for_bytes(limit + 1),
            SizeClass::SingleObject { cells } if cells == FIXED_BLOCK_PAGE_MAX_BLOCK_CELLS + 1
        ));
    }
}
