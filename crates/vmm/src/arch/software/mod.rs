//! Software emulation for testing and development.
//!
//! This module provides an emulated machine that can run on any host. It is shaped like a
//! small 32-bit board with a software-loaded TLB:
//! - 32-bit physical addresses backed by a host buffer ([`EmulatedMemory`])
//! - A pool of 4 KiB frames carved out of that buffer ([`EmulatedFrames`])
//! - A 64-entry TLB with random replacement ([`EmulatedTlb`])
//! - A per-thread interrupt enable flag
//!
//! Every test thread gets its own machine, so tests never observe each other.

mod frames;
mod tlb;

use core::cell::Cell;

pub use frames::EmulatedFrames;
pub use tlb::{EmulatedTlb, TLB_ENTRIES};

use crate::{AddressTranslator, layout::PAGE_SIZE};

/// Maximum number of bits in a physical address for software emulation.
pub const MAX_PHYSICAL_BITS: usize = 32;

/// Validates a physical address for software emulation.
///
/// Physical addresses must fit within 32 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr <= ((1u64 << MAX_PHYSICAL_BITS) - 1) as usize
}

std::thread_local! {
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Returns whether emulated interrupts are currently enabled on this thread.
pub fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.with(Cell::get)
}

/// Enables or disables emulated interrupts on this thread.
pub fn set_interrupts_enabled(enabled: bool) {
    INTERRUPTS_ENABLED.with(|flag| flag.set(enabled));
}

/// Runs `f` with emulated interrupts disabled, then restores the previous state.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = INTERRUPTS_ENABLED.with(|flag| flag.replace(false));
    let result = f();
    set_interrupts_enabled(previous);
    result
}

/// Sets up an emulated machine with `frames` physical frames on the current thread.
///
/// Installs an emulated [`AddressTranslator`] large enough for the pool. Call this once
/// per thread.
///
/// # Panics
/// Panics if the thread already has a translator that cannot fit the pool.
pub fn machine(frames: usize) -> (EmulatedFrames, EmulatedTlb) {
    if AddressTranslator::try_current().is_none() {
        AddressTranslator::set_current(AddressTranslator::emulated(frames * PAGE_SIZE));
    }
    (EmulatedFrames::new(frames), EmulatedTlb::new())
}

/// One page of emulated memory.
#[derive(Clone)]
#[repr(C, align(4096))]
struct EmulatedPage([u8; PAGE_SIZE]);

/// Emulated memory for software simulation.
///
/// This provides a simulated physical memory space so frame contents can be read and
/// written without requiring real hardware. The buffer is page-aligned, so emulated frames
/// can hold structures with page alignment such as hardware page tables.
pub struct EmulatedMemory {
    /// The underlying memory buffer.
    memory: Vec<EmulatedPage>,
    /// Next allocation offset (simple bump allocator).
    next_alloc: core::sync::atomic::AtomicUsize,
}

impl EmulatedMemory {
    /// Creates a new emulated memory region of at least `size` bytes, rounded up to whole
    /// pages.
    pub fn new(size: usize) -> Self {
        Self {
            memory: alloc::vec![EmulatedPage([0; PAGE_SIZE]); size.div_ceil(PAGE_SIZE)],
            next_alloc: core::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Allocates a block of memory from the emulated space.
    ///
    /// Returns the physical address of the allocated block, or None if
    /// there's not enough space.
    pub fn allocate(&self, size: usize, align: usize) -> Option<usize> {
        use core::sync::atomic::Ordering;

        loop {
            let current = self.next_alloc.load(Ordering::Relaxed);

            let aligned = (current + align - 1) & !(align - 1);
            let end = aligned + size;

            if end > self.size() {
                return None;
            }

            if self
                .next_alloc
                .compare_exchange(current, end, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Some(aligned);
            }
        }
    }

    /// Translates a physical address to a pointer into the buffer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.size(), "physical address out of bounds");
        // SAFETY: The offset was bounds-checked above.
        unsafe { (self.memory.as_ptr() as *mut u8).add(phys) }
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.memory.len() * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_interrupts_restores_enabled_state() {
        assert!(interrupts_enabled());
        let inside = without_interrupts(interrupts_enabled);
        assert!(!inside);
        assert!(interrupts_enabled());
    }

    #[test]
    fn without_interrupts_keeps_disabled_state() {
        set_interrupts_enabled(false);
        without_interrupts(|| ());
        assert!(!interrupts_enabled());
        set_interrupts_enabled(true);
    }

    #[test]
    fn nested_masking_restores_outer_state() {
        without_interrupts(|| {
            without_interrupts(|| ());
            assert!(!interrupts_enabled());
        });
        assert!(interrupts_enabled());
    }

    #[test]
    fn emulated_memory_respects_alignment() {
        let mem = EmulatedMemory::new(4 * PAGE_SIZE);
        assert_eq!(mem.allocate(10, 1), Some(0));
        assert_eq!(mem.allocate(PAGE_SIZE, PAGE_SIZE), Some(PAGE_SIZE));
        assert_eq!(mem.allocate(3 * PAGE_SIZE, PAGE_SIZE), None);
        assert_eq!(mem.size(), 4 * PAGE_SIZE);
    }

    #[test]
    fn emulated_memory_is_page_aligned() {
        let mem = EmulatedMemory::new(PAGE_SIZE + 1);
        assert_eq!(mem.size(), 2 * PAGE_SIZE);
        assert_eq!(mem.translate(0) as usize % PAGE_SIZE, 0);
    }

    #[test]
    fn validates_physical_width() {
        assert!(validate_physical(0xFFFF_FFFF));
        assert!(!validate_physical(0x1_0000_0000));
    }
}
