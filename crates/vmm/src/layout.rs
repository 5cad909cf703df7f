//! User address-space layout.
//!
//! The page table is software-managed, so its shape is fixed here rather than by the
//! hardware backend. A 32-bit user virtual address splits into three fields:
//!
//! - Bits 21-31: top-level index (2048 entries)
//! - Bits 12-20: second-level index (512 entries)
//! - Bits 0-11: page offset (4 KiB pages)

/// Number of bits in a user virtual address.
pub const VIRTUAL_BITS: usize = 32;

/// Number of bits in the page offset.
pub const PAGE_SHIFT: usize = 12;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Number of bits in the second-level index.
pub const SECOND_LEVEL_BITS: usize = 9;

/// Number of bits in the top-level index.
pub const TOP_LEVEL_BITS: usize = VIRTUAL_BITS - SECOND_LEVEL_BITS - PAGE_SHIFT;

/// Number of entries in the top-level directory.
pub const TOP_LEVEL_ENTRIES: usize = 1 << TOP_LEVEL_BITS;

/// Number of entries in each second-level table.
pub const SECOND_LEVEL_ENTRIES: usize = 1 << SECOND_LEVEL_BITS;

/// Largest valid user virtual address.
pub const MAX_VIRTUAL_ADDRESS: usize = ((1u64 << VIRTUAL_BITS) - 1) as usize;

/// Default top of the user stack (the base of the kernel segment).
pub const USER_STACK_TOP: usize = 0x8000_0000;

/// Default number of pages reserved for a user stack.
pub const USER_STACK_PAGES: usize = 16;

const _: () = assert!(
    (TOP_LEVEL_ENTRIES as u64) * (SECOND_LEVEL_ENTRIES as u64) * (PAGE_SIZE as u64)
        == 1u64 << VIRTUAL_BITS,
    "page table layout must cover the whole virtual address space"
);

/// Returns whether `addr` is a valid user virtual address.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    addr <= MAX_VIRTUAL_ADDRESS
}
