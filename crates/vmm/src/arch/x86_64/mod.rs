//! x86_64 architecture-specific implementation.
//!
//! x86_64 refills its TLB by walking the hardware page tables, so [`HardwareTlb`] installs
//! a translation by mapping it in those tables.

mod tlb;

pub use tlb::HardwareTlb;

/// Maximum number of bits in a physical address on x86_64.
/// This is typically 52 bits on modern CPUs, but we use 48 as a conservative default.
pub const MAX_PHYSICAL_BITS: usize = 48;

/// Validates a physical address for x86_64.
///
/// Physical addresses must not exceed the maximum physical address width.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    let max_addr = (1usize << MAX_PHYSICAL_BITS) - 1;
    addr <= max_addr
}

/// Runs `f` with interrupts disabled, restoring the previous interrupt flag afterwards.
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    ::x86_64::instructions::interrupts::without_interrupts(f)
}
