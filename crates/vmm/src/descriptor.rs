//! Frame descriptors stored in the page table.

use core::fmt;

use crate::{PhysicalAddress, layout::PAGE_SIZE};

/// A page table entry mapping one virtual page to a physical frame.
///
/// The layout matches the low word of a software-loaded TLB entry, so a descriptor can be
/// installed without repacking:
/// - Bits 0-8: Reserved (zero)
/// - Bit 9: Valid
/// - Bit 10: Dirty (the page may be written)
/// - Bits 12 and up: Physical frame address
///
/// A descriptor of zero means "no mapping".
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct FrameDescriptor(usize);

impl FrameDescriptor {
    /// The empty (unmapped) descriptor.
    pub const EMPTY: Self = Self(0);

    /// Physical frame mask.
    const FRAME_MASK: usize = !(PAGE_SIZE - 1);

    /// Valid bit (bit 9).
    const VALID: usize = 1 << 9;

    /// Dirty bit (bit 10). Without it the hardware treats the page as read-only.
    const DIRTY: usize = 1 << 10;

    /// Creates a valid descriptor for `frame`.
    ///
    /// The frame address must be page-aligned.
    pub fn new(frame: PhysicalAddress, dirty: bool) -> Self {
        debug_assert!(
            frame.is_aligned(PAGE_SIZE),
            "frame address must be page-aligned"
        );

        let mut bits = (frame.as_usize() & Self::FRAME_MASK) | Self::VALID;
        if dirty {
            bits |= Self::DIRTY;
        }
        Self(bits)
    }

    /// Returns whether this descriptor maps nothing.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns whether the valid bit is set.
    pub const fn is_valid(self) -> bool {
        self.0 & Self::VALID != 0
    }

    /// Returns whether the dirty (writable) bit is set.
    pub const fn is_dirty(self) -> bool {
        self.0 & Self::DIRTY != 0
    }

    /// Returns the mapped frame, or None if the descriptor is not valid.
    pub fn frame(self) -> Option<PhysicalAddress> {
        if self.is_valid() {
            Some(PhysicalAddress::new(self.0 & Self::FRAME_MASK))
        } else {
            None
        }
    }

    /// Returns a copy with the dirty bit set to `dirty`, preserving the frame.
    pub const fn with_dirty(self, dirty: bool) -> Self {
        if dirty {
            Self(self.0 | Self::DIRTY)
        } else {
            Self(self.0 & !Self::DIRTY)
        }
    }

    /// Returns the raw value of this descriptor.
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "FrameDescriptor(empty)");
        }
        write!(
            f,
            "FrameDescriptor({:#x}{}{})",
            self.0 & Self::FRAME_MASK,
            if self.is_valid() { " V" } else { "" },
            if self.is_dirty() { " D" } else { "" },
        )
    }
}
