//! TLB primitives for x86_64.
//!
//! x86_64 refills its TLB by walking page tables, so a software-loaded TLB is modelled as
//! a bounded set of user translations kept in the hardware tables. Writing an entry maps
//! its page; evicting or invalidating the entry unmaps the page again, and the processor
//! TLB is flushed for every page that changed.

use ::x86_64::{
    PhysAddr, VirtAddr,
    instructions::tlb,
    structures::paging::{
        FrameAllocator as TableFrameAllocator, Mapper, Page, PageTableFlags, PhysFrame,
        Size4KiB, mapper::MapToError,
    },
};

use crate::{
    FrameAllocator, FrameDescriptor, OutOfMemory, PageNumber, PhysicalAddress, Tlb, TlbEntry,
};

/// Number of user translations kept in the hardware tables at once.
pub const TLB_ENTRIES: usize = 64;

/// Flags for intermediate tables. The leaf entry decides the effective permissions.
const TABLE_FLAGS: PageTableFlags = PageTableFlags::PRESENT
    .union(PageTableFlags::WRITABLE)
    .union(PageTableFlags::USER_ACCESSIBLE);

/// The processor's TLB, backed by the page tables it walks.
///
/// `M` edits the page tables of the running processor. Intermediate tables come from
/// `A` and stay allocated for the lifetime of the TLB, since the kernel half of the tables
/// is shared by every address space.
pub struct HardwareTlb<M, A> {
    mirror: spin::Mutex<Mirror<M, A>>,
}

impl<M: Mapper<Size4KiB>, A: FrameAllocator> HardwareTlb<M, A> {
    /// Creates a TLB that installs translations through `mapper`.
    ///
    /// # Safety
    /// `mapper` must edit the page tables loaded on this processor, and no other code may
    /// map pages in the user half of those tables.
    pub unsafe fn new(mapper: M, table_frames: A) -> Self {
        Self {
            mirror: spin::Mutex::new(Mirror::new(mapper, table_frames)),
        }
    }

    /// Returns the number of user translations currently mapped.
    pub fn valid_entries(&self) -> usize {
        self.mirror.lock().valid_entries()
    }
}

impl<M: Mapper<Size4KiB>, A: FrameAllocator> Tlb for HardwareTlb<M, A> {
    fn invalidate_all(&self) {
        self.mirror.lock().clear();
        tlb::flush_all();
    }

    fn invalidate(&self, page: PageNumber) {
        self.mirror.lock().remove(page);
        tlb::flush(virt(page));
    }

    fn write_random(&self, entry: TlbEntry) -> Result<(), OutOfMemory> {
        let mut mirror = self.mirror.lock();
        let (slot, evicted) = mirror.claim_slot(entry.page());
        if let Some(evicted) = evicted {
            tlb::flush(virt(evicted));
        }
        tlb::flush(virt(entry.page()));
        mirror.map(slot, entry)
    }
}

/// The user translations mirrored into the hardware tables.
struct Mirror<M, A> {
    mapper: M,
    table_frames: A,
    slots: [Option<PageNumber>; TLB_ENTRIES],
    /// xorshift32 state for slot selection.
    seed: u32,
}

impl<M: Mapper<Size4KiB>, A: FrameAllocator> Mirror<M, A> {
    fn new(mapper: M, table_frames: A) -> Self {
        Self {
            mapper,
            table_frames,
            slots: [None; TLB_ENTRIES],
            seed: 0x2545_F491,
        }
    }

    fn valid_entries(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    fn next_slot(&mut self) -> usize {
        let mut x = self.seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed = x;
        x as usize % TLB_ENTRIES
    }

    /// Frees a slot for `page`, unmapping whatever it held.
    ///
    /// Returns the slot and the page evicted from it, if that page differs from `page`.
    fn claim_slot(&mut self, page: PageNumber) -> (usize, Option<PageNumber>) {
        if let Some(index) = self.slots.iter().position(|slot| *slot == Some(page)) {
            self.slots[index] = None;
            self.unmap(page);
            return (index, None);
        }

        let index = self.next_slot();
        let evicted = self.slots[index].take();
        if let Some(evicted) = evicted {
            self.unmap(evicted);
        }
        (index, evicted)
    }

    /// Maps `entry` and records it in `slot`.
    fn map(&mut self, slot: usize, entry: TlbEntry) -> Result<(), OutOfMemory> {
        let Some(frame) = entry.descriptor().frame() else {
            return Ok(());
        };

        // SAFETY: The frame belongs to the running address space and the page lies in the
        // user half, which only this mirror maps.
        let result = unsafe {
            self.mapper.map_to_with_table_flags(
                page(entry.page()),
                phys_frame(frame),
                leaf_flags(entry.descriptor()),
                TABLE_FLAGS,
                &mut TableFrames(&self.table_frames),
            )
        };

        match result {
            Ok(flush) => {
                // The caller flushed the page before mapping it.
                flush.ignore();
                self.slots[slot] = Some(entry.page());
                Ok(())
            }
            Err(MapToError::FrameAllocationFailed) => {
                log::warn!("no frame left for a page table to hold {:?}", entry);
                Err(OutOfMemory)
            }
            Err(err) => panic!("cannot install {:?}: {:?}", entry, err),
        }
    }

    fn remove(&mut self, page: PageNumber) {
        if let Some(index) = self.slots.iter().position(|slot| *slot == Some(page)) {
            self.slots[index] = None;
            self.unmap(page);
        }
    }

    fn clear(&mut self) {
        for index in 0..TLB_ENTRIES {
            if let Some(page) = self.slots[index].take() {
                self.unmap(page);
            }
        }
    }

    fn unmap(&mut self, page_number: PageNumber) {
        if let Ok((_, flush)) = self.mapper.unmap(page(page_number)) {
            // Callers flush the processor TLB themselves.
            flush.ignore();
        }
    }
}

/// Hands out frames for intermediate page tables.
struct TableFrames<'a, A: ?Sized>(&'a A);

// SAFETY: A frame allocator only hands out unused, page-aligned frames.
unsafe impl<A: FrameAllocator + ?Sized> TableFrameAllocator<Size4KiB> for TableFrames<'_, A> {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        FrameAllocator::allocate_frame(self.0).map(phys_frame)
    }
}

fn leaf_flags(descriptor: FrameDescriptor) -> PageTableFlags {
    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
    if descriptor.is_dirty() {
        flags |= PageTableFlags::WRITABLE;
    }
    flags
}

fn virt(page: PageNumber) -> VirtAddr {
    VirtAddr::new(page.start().as_usize() as u64)
}

fn page(page: PageNumber) -> Page<Size4KiB> {
    Page::containing_address(virt(page))
}

fn phys_frame(frame: PhysicalAddress) -> PhysFrame<Size4KiB> {
    PhysFrame::containing_address(PhysAddr::new(frame.as_usize() as u64))
}
