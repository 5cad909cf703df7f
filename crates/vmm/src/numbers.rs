//! Virtual page numbers.
//!
//! A virtual page number knows how it splits into the two page table indices.

use core::fmt;

use crate::{
    address::VirtualAddress,
    layout::{PAGE_SIZE, SECOND_LEVEL_BITS, SECOND_LEVEL_ENTRIES, TOP_LEVEL_ENTRIES},
};

/// A virtual page number.
///
/// Page numbers are zero-indexed and correspond to PAGE_SIZE-aligned user virtual
/// addresses, so both page table indices of a page number are always in range.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PageNumber(usize);

impl PageNumber {
    /// Number of pages in the user address space.
    pub const COUNT: usize = TOP_LEVEL_ENTRIES * SECOND_LEVEL_ENTRIES;

    /// Creates a new page number.
    ///
    /// # Panics
    ///
    /// Panics if the page lies outside the user address space.
    #[inline]
    pub const fn new(number: usize) -> Self {
        assert!(
            number < Self::COUNT,
            "page number exceeds user address space"
        );
        Self(number)
    }

    /// Builds a page number from its page table indices.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    #[inline]
    pub const fn from_indices(top: usize, second: usize) -> Self {
        assert!(top < TOP_LEVEL_ENTRIES, "top-level index out of range");
        assert!(second < SECOND_LEVEL_ENTRIES, "second-level index out of range");
        Self((top << SECOND_LEVEL_BITS) | second)
    }

    /// Returns the index into the top-level directory (address bits 21-31).
    #[inline]
    pub const fn top_index(self) -> usize {
        self.0 >> SECOND_LEVEL_BITS
    }

    /// Returns the index into the second-level table (address bits 12-20).
    #[inline]
    pub const fn second_index(self) -> usize {
        self.0 & (SECOND_LEVEL_ENTRIES - 1)
    }

    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 * PAGE_SIZE)
    }
}

impl fmt::Debug for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageNumber({:#x})", self.0)
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        Self::new(addr.as_usize() / PAGE_SIZE)
    }
}
