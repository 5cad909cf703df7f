//! Physical frames backing user pages.
//!
//! Frames come from an external allocator and are reached through the kernel's direct map
//! ([`AddressTranslator`]). The allocator hands out uninitialized memory; zero-filling is
//! done here.

use crate::{AddressTranslator, OutOfMemory, PhysicalAddress, layout::PAGE_SIZE};

/// Source of physical frames.
///
/// Implementations use interior mutability so that every page table can hold a cheap
/// handle to the same allocator.
pub trait FrameAllocator {
    /// Allocates one page-aligned frame, or returns None if physical memory is exhausted.
    fn allocate_frame(&self) -> Option<PhysicalAddress>;

    /// Returns a frame to the allocator.
    ///
    /// # Safety
    /// The frame must have come from [`FrameAllocator::allocate_frame`] on this allocator and
    /// must not be referenced by any page table or TLB entry afterwards.
    unsafe fn free_frame(&self, frame: PhysicalAddress);
}

impl<T: FrameAllocator + ?Sized> FrameAllocator for &T {
    fn allocate_frame(&self) -> Option<PhysicalAddress> {
        (**self).allocate_frame()
    }

    unsafe fn free_frame(&self, frame: PhysicalAddress) {
        // SAFETY: Forwarded contract.
        unsafe { (**self).free_frame(frame) }
    }
}

/// Returns the contents of a frame through the direct map.
///
/// # Safety
/// The frame must be allocated, and the caller must not create overlapping references to
/// the same frame while the returned one is alive.
pub unsafe fn frame_contents<'a>(frame: PhysicalAddress) -> &'a mut [u8; PAGE_SIZE] {
    let ptr = AddressTranslator::current().phys_to_ptr::<[u8; PAGE_SIZE]>(frame);
    // SAFETY: The direct map covers every allocated frame; exclusivity is the caller's.
    unsafe { &mut *ptr }
}

/// Allocates a frame and fills it with zeroes.
pub(crate) fn allocate_zeroed<A: FrameAllocator + ?Sized>(
    frames: &A,
) -> Result<PhysicalAddress, OutOfMemory> {
    let frame = frames.allocate_frame().ok_or(OutOfMemory)?;
    // SAFETY: The frame was just allocated, so nothing else refers to it.
    unsafe { frame_contents(frame) }.fill(0);
    Ok(frame)
}

/// Copies a whole page from `src` to `dst`.
///
/// # Safety
/// Both frames must be allocated and distinct.
pub(crate) unsafe fn copy_frame(src: PhysicalAddress, dst: PhysicalAddress) {
    debug_assert_ne!(src, dst, "cannot copy a frame onto itself");
    let translator = AddressTranslator::current();
    // SAFETY: Distinct allocated frames never overlap.
    unsafe {
        core::ptr::copy_nonoverlapping(
            translator.phys_to_ptr::<u8>(src),
            translator.phys_to_ptr::<u8>(dst),
            PAGE_SIZE,
        );
    }
}
