//! Address space management.
//!
//! An address space is the unit of memory isolation: one page table, the regions the
//! process may fault into, and the loading override used while a program image is copied
//! in. It belongs to exactly one process. Every mutating operation takes `&mut self`, so
//! faults and lifecycle calls on one address space are serialized by the borrow checker
//! rather than by a lock.

use crate::{
    FrameAllocator, OutOfMemory, PageTable, Region, RegionPermissions, RegionTable, Tlb,
    VirtualAddress, config, tlb,
};

/// A user address space.
pub struct AddressSpace<A: FrameAllocator> {
    /// Frames mapped so far.
    page_table: PageTable<A>,
    /// Segments the process is allowed to fault into.
    regions: RegionTable,
    /// Forces write permission on installed pages while a program image is loaded.
    loading: bool,
}

impl<A: FrameAllocator> AddressSpace<A> {
    /// Creates an empty address space whose frames come from `frames`.
    pub fn new(frames: A) -> Result<Self, OutOfMemory> {
        let space = Self {
            page_table: PageTable::new(frames)?,
            regions: RegionTable::new(),
            loading: false,
        };
        log::debug!("address space created");
        Ok(space)
    }

    /// Returns the page table.
    pub fn page_table(&self) -> &PageTable<A> {
        &self.page_table
    }

    pub(crate) fn page_table_mut(&mut self) -> &mut PageTable<A> {
        &mut self.page_table
    }

    /// Returns the regions defined so far.
    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// Returns whether the loading override is in effect.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Declares a region of `size` bytes at `base`.
    ///
    /// `base` must be page-aligned and `size` a whole number of pages. Regions may overlap;
    /// the most recently defined one wins.
    pub fn define_region(
        &mut self,
        base: VirtualAddress,
        size: usize,
        permissions: RegionPermissions,
    ) -> Result<(), OutOfMemory> {
        self.regions.define(Region::new(base, size, permissions))?;
        log::debug!(
            "defined region {}..{:#x} {:?}",
            base,
            base.as_usize() + size,
            permissions
        );
        Ok(())
    }

    /// Declares a read-write stack of `pages` pages ending at `stack_top`.
    ///
    /// Returns the initial stack pointer, which is `stack_top` itself.
    ///
    /// # Panics
    ///
    /// Panics if the stack does not fit between address zero and `stack_top`.
    pub fn define_stack(
        &mut self,
        stack_top: VirtualAddress,
        pages: usize,
    ) -> Result<VirtualAddress, OutOfMemory> {
        let Some(base) = config::stack_base(stack_top, pages) else {
            panic!("stack of {} pages does not fit below {}", pages, stack_top);
        };
        self.define_region(base, stack_top - base, RegionPermissions::READ_WRITE)?;
        Ok(stack_top)
    }

    /// Declares the stack described by the boot configuration.
    pub fn define_user_stack(&mut self) -> Result<VirtualAddress, OutOfMemory> {
        let config = config::config();
        self.define_stack(config.stack_top, config.stack_pages)
    }

    /// Opens the load window: pages installed from now on are writable whatever their
    /// region says, so the loader can copy read-only segments in.
    pub fn prepare_load<T: Tlb + ?Sized>(&mut self, tlb: &T) {
        self.loading = true;
        log::debug!("load window opened");
        // Entries installed before the window would still be read-only.
        tlb::flush(tlb);
    }

    /// Closes the load window and restores normal permission enforcement.
    ///
    /// Descriptors stored while the window was open keep their own dirty bit; only the
    /// TLB entries are discarded.
    pub fn complete_load<T: Tlb + ?Sized>(&mut self, tlb: &T) {
        self.loading = false;
        log::debug!("load window closed");
        tlb::flush(tlb);
    }

    /// Switches the TLB over to this address space.
    ///
    /// TLB entries are not tagged with their address space, so this discards all of them,
    /// even when re-activating the same address space.
    pub fn activate<T: Tlb + ?Sized>(&self, tlb: &T) {
        tlb::flush(tlb);
    }

    /// Called when this address space stops running. Nothing needs undoing.
    pub fn deactivate<T: Tlb + ?Sized>(&self, _tlb: &T) {}

    /// Releases every frame, table and region owned by this address space.
    pub fn destroy(self) {
        log::debug!(
            "destroying address space: {} resident pages, {} regions",
            self.page_table.resident_pages(),
            self.regions.len()
        );
        drop(self);
    }
}

impl<A: FrameAllocator + Clone> AddressSpace<A> {
    /// Creates a copy of this address space for a child process.
    ///
    /// Every resident page is copied into a fresh frame, every region is defined again in
    /// the same order, and the loading override carries over. On failure nothing allocated
    /// for the copy is leaked.
    pub fn duplicate(&self) -> Result<Self, OutOfMemory> {
        let mut copy = Self {
            page_table: self.page_table.duplicate()?,
            regions: RegionTable::new(),
            loading: false,
        };

        // Oldest first, so lookups in the copy match the original.
        for region in self.regions.iter().rev() {
            copy.define_region(region.base(), region.size(), region.permissions())?;
        }
        copy.loading = self.loading;

        log::debug!(
            "address space duplicated: {} pages copied",
            copy.page_table.resident_pages()
        );
        Ok(copy)
    }
}
