//! TLB control.
//!
//! TLB entries carry no address-space tag, so every switch between address spaces flushes
//! the whole TLB. Every hardware access happens with interrupts masked; the previous mask
//! state is restored afterwards.

use core::fmt;

use crate::{AddressSpace, FrameAllocator, FrameDescriptor, OutOfMemory, PageNumber, arch};

/// One translation as written into the TLB.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    page: PageNumber,
    descriptor: FrameDescriptor,
}

impl TlbEntry {
    /// Creates an entry translating `page` through `descriptor`.
    pub const fn new(page: PageNumber, descriptor: FrameDescriptor) -> Self {
        Self { page, descriptor }
    }

    /// Returns the virtual page this entry translates.
    pub const fn page(self) -> PageNumber {
        self.page
    }

    /// Returns the frame descriptor this entry installs.
    pub const fn descriptor(self) -> FrameDescriptor {
        self.descriptor
    }

    /// Returns the high word: the virtual page address.
    pub const fn entry_hi(self) -> usize {
        self.page.start().as_usize()
    }

    /// Returns the low word: the frame descriptor bits.
    pub const fn entry_lo(self) -> usize {
        self.descriptor.as_usize()
    }
}

impl fmt::Debug for TlbEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TlbEntry({:#010x} -> {:?})", self.entry_hi(), self.descriptor)
    }
}

/// Raw TLB primitives.
///
/// Implementations must not mask interrupts themselves; [`flush`] and [`install`] do that.
pub trait Tlb {
    /// Invalidates every entry.
    fn invalidate_all(&self);

    /// Invalidates the entry for `page`, if any.
    fn invalidate(&self, page: PageNumber);

    /// Writes `entry` into a slot chosen by the implementation.
    ///
    /// Fails only if the backend needs memory to hold the translation and none is left.
    fn write_random(&self, entry: TlbEntry) -> Result<(), OutOfMemory>;
}

impl<T: Tlb + ?Sized> Tlb for &T {
    fn invalidate_all(&self) {
        (**self).invalidate_all()
    }

    fn invalidate(&self, page: PageNumber) {
        (**self).invalidate(page)
    }

    fn write_random(&self, entry: TlbEntry) -> Result<(), OutOfMemory> {
        (**self).write_random(entry)
    }
}

/// Invalidates the whole TLB with interrupts masked.
pub fn flush<T: Tlb + ?Sized>(tlb: &T) {
    arch::without_interrupts(|| tlb.invalidate_all());
}

/// Installs a translation for `page` with interrupts masked.
///
/// Fails only if the TLB backend needs memory to hold the entry and none is left.
pub fn install<T: Tlb + ?Sized>(
    tlb: &T,
    page: PageNumber,
    descriptor: FrameDescriptor,
) -> Result<(), OutOfMemory> {
    let entry = TlbEntry::new(page, descriptor);

    #[cfg(feature = "detailed-logging")]
    log::trace!("tlb write: {:?}", entry);

    arch::without_interrupts(|| tlb.write_random(entry))
}

/// Makes `space` the address space the TLB translates for.
///
/// A kernel thread has no address space of its own; the previous translations are left in
/// place for it.
pub fn activate<A, T>(space: Option<&AddressSpace<A>>, tlb: &T)
where
    A: FrameAllocator,
    T: Tlb + ?Sized,
{
    if let Some(space) = space {
        space.activate(tlb);
    }
}

/// Handles a request from another processor to invalidate translations.
///
/// The manager only runs on a single processor, so a shootdown request means the kernel
/// is misconfigured.
pub fn shootdown(page: Option<PageNumber>) -> ! {
    match page {
        Some(page) => panic!("tlb shootdown requested for page {}", page),
        None => panic!("tlb shootdown requested"),
    }
}
