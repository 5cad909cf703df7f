//! Demand-paging fault handler.
//!
//! Pages are populated lazily: the first access to a page inside a region allocates a
//! zero-filled frame, records it in the page table and installs it in the TLB. Later misses
//! on the same page only reinstall the stored descriptor.

use crate::{
    AddressSpace, Fault, FrameAllocator, FrameDescriptor, Tlb, VirtualAddress,
    frame::allocate_zeroed, tlb,
};

/// Kind of access that missed in the TLB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A load from an unmapped page.
    Read,
    /// A store to an unmapped page.
    Write,
    /// A store to a page whose TLB entry is not writable.
    ReadOnly,
}

impl TryFrom<u32> for FaultKind {
    type Error = Fault;

    /// Decodes the fault type reported by the trap dispatcher.
    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Read),
            1 => Ok(Self::Write),
            2 => Ok(Self::ReadOnly),
            _ => Err(Fault::InvalidArgument),
        }
    }
}

impl<A: FrameAllocator> AddressSpace<A> {
    /// Resolves a TLB miss at `address`.
    ///
    /// On success the faulting access can be restarted. Writes to read-only pages and
    /// accesses outside every region are access violations.
    ///
    /// # Panics
    ///
    /// Panics if no region has been defined; a running process always has at least one.
    pub fn handle_fault<T: Tlb + ?Sized>(
        &mut self,
        kind: FaultKind,
        address: VirtualAddress,
        tlb: &T,
    ) -> Result<(), Fault> {
        if kind == FaultKind::ReadOnly {
            log::debug!("write to read-only page at {}", address);
            return Err(Fault::AccessViolation);
        }

        assert!(
            !self.regions().is_empty(),
            "fault in an address space without regions"
        );

        let page = address.page_number();
        let loading = self.is_loading();

        if let Some(resident) = self.page_table().lookup(page) {
            log::trace!("{:?} fault at {}: reinstalling {:?}", kind, address, resident);
            tlb::install(tlb, page, resident.with_dirty(resident.is_dirty() || loading))?;
            return Ok(());
        }

        let Some(permissions) = self.regions().find_containing(address) else {
            log::debug!("{:?} fault at {} outside every region", kind, address);
            return Err(Fault::AccessViolation);
        };

        let frame = allocate_zeroed(self.page_table().allocator()).inspect_err(|_| {
            log::warn!("no frame left for fault at {}", address);
        })?;
        let descriptor = FrameDescriptor::new(frame, permissions.writeable);

        if let Err(err) = self.page_table_mut().insert(page, descriptor) {
            log::warn!("no heap left to map fault at {}", address);
            // SAFETY: The frame was allocated above and never became reachable.
            unsafe { self.page_table().allocator().free_frame(frame) };
            return Err(err.into());
        }

        log::trace!("{:?} fault at {}: mapped {:?}", kind, address, descriptor);
        // A failed install leaves the page resident; the retried access reinstalls it.
        tlb::install(tlb, page, descriptor.with_dirty(descriptor.is_dirty() || loading))?;
        Ok(())
    }
}

/// Resolves a TLB miss in the current address space.
///
/// `space` is None while a kernel thread with no address space of its own is running;
/// user-space faults are then access violations.
pub fn handle_fault<A, T>(
    space: Option<&mut AddressSpace<A>>,
    kind: FaultKind,
    address: VirtualAddress,
    tlb: &T,
) -> Result<(), Fault>
where
    A: FrameAllocator,
    T: Tlb + ?Sized,
{
    if kind == FaultKind::ReadOnly {
        return Err(Fault::AccessViolation);
    }

    match space {
        Some(space) => space.handle_fault(kind, address, tlb),
        None => {
            log::debug!("{:?} fault at {} with no address space", kind, address);
            Err(Fault::AccessViolation)
        }
    }
}

/// Entry point for the trap dispatcher, taking the fault type and address as reported by
/// the hardware.
pub fn vm_fault<A, T>(
    space: Option<&mut AddressSpace<A>>,
    raw_kind: u32,
    raw_address: usize,
    tlb: &T,
) -> Result<(), Fault>
where
    A: FrameAllocator,
    T: Tlb + ?Sized,
{
    let kind = FaultKind::try_from(raw_kind)?;
    let address = VirtualAddress::try_new(raw_address).ok_or(Fault::AccessViolation)?;
    handle_fault(space, kind, address, tlb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        OutOfMemory, PageNumber, RegionPermissions, TlbEntry,
        arch::software::{EmulatedFrames, machine},
        frame::frame_contents,
        layout::PAGE_SIZE,
    };

    fn addr(addr: usize) -> VirtualAddress {
        VirtualAddress::new(addr)
    }

    fn page(at: usize) -> PageNumber {
        addr(at).page_number()
    }

    fn space_with<'a>(
        frames: &'a EmulatedFrames,
        regions: &[(usize, usize, RegionPermissions)],
    ) -> AddressSpace<&'a EmulatedFrames> {
        let mut space = AddressSpace::new(frames).expect("heap has room");
        for &(base, size, permissions) in regions {
            space
                .define_region(addr(base), size, permissions)
                .expect("heap has room");
        }
        space
    }

    #[test]
    fn decodes_raw_fault_kinds() {
        assert_eq!(FaultKind::try_from(0), Ok(FaultKind::Read));
        assert_eq!(FaultKind::try_from(1), Ok(FaultKind::Write));
        assert_eq!(FaultKind::try_from(2), Ok(FaultKind::ReadOnly));
        assert_eq!(FaultKind::try_from(3), Err(Fault::InvalidArgument));
    }

    #[test]
    fn read_only_region_example() {
        let (frames, tlb) = machine(4);
        let mut space = space_with(&frames, &[(0x1000, 0x2000, RegionPermissions::READ_ONLY)]);

        space
            .handle_fault(FaultKind::Read, addr(0x1500), &tlb)
            .unwrap();
        assert_eq!(frames.allocated_frames(), 1);
        let stored = space.page_table().lookup(page(0x1500)).unwrap();
        assert!(stored.is_valid());
        assert!(!stored.is_dirty());
        assert_eq!(tlb.lookup(page(0x1500)), Some(stored));

        assert_eq!(
            space.handle_fault(FaultKind::Read, addr(0x5000), &tlb),
            Err(Fault::AccessViolation)
        );
        assert_eq!(frames.allocated_frames(), 1);
    }

    #[test]
    fn fresh_frame_is_zeroed_and_writable_in_writable_region() {
        let (frames, tlb) = machine(2);

        // Leave garbage behind in the frame the fault will get.
        let dirty = frames.allocate_frame().unwrap();
        unsafe {
            frame_contents(dirty).fill(0xAA);
            frames.free_frame(dirty);
        }

        let mut space = space_with(&frames, &[(0x1000, PAGE_SIZE, RegionPermissions::READ_WRITE)]);
        space
            .handle_fault(FaultKind::Write, addr(0x1ABC), &tlb)
            .unwrap();

        let stored = space.page_table().lookup(page(0x1000)).unwrap();
        assert!(stored.is_dirty());
        unsafe {
            assert!(frame_contents(stored.frame().unwrap()).iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn refault_reuses_frame() {
        let (frames, tlb) = machine(2);
        let mut space = space_with(&frames, &[(0x1000, PAGE_SIZE, RegionPermissions::READ_WRITE)]);

        space
            .handle_fault(FaultKind::Read, addr(0x1000), &tlb)
            .unwrap();
        let first = space.page_table().lookup(page(0x1000)).unwrap();

        space.activate(&tlb);
        space
            .handle_fault(FaultKind::Write, addr(0x1FFF), &tlb)
            .unwrap();
        let second = space.page_table().lookup(page(0x1000)).unwrap();

        assert_eq!(first, second);
        assert_eq!(frames.allocated_frames(), 1);
        assert_eq!(tlb.lookup(page(0x1000)), Some(first));
    }

    #[test]
    fn write_to_read_only_page_is_rejected() {
        let (frames, tlb) = machine(1);
        let mut space = space_with(&frames, &[(0x1000, PAGE_SIZE, RegionPermissions::READ_WRITE)]);

        assert_eq!(
            space.handle_fault(FaultKind::ReadOnly, addr(0x1000), &tlb),
            Err(Fault::AccessViolation)
        );
        assert_eq!(frames.allocated_frames(), 0);
        assert_eq!(tlb.writes(), 0);
    }

    #[test]
    fn most_recent_region_decides_permissions() {
        let (frames, tlb) = machine(2);
        let mut space = space_with(
            &frames,
            &[
                (0x1000, 4 * PAGE_SIZE, RegionPermissions::READ_ONLY),
                (0x2000, PAGE_SIZE, RegionPermissions::READ_WRITE),
            ],
        );

        space
            .handle_fault(FaultKind::Write, addr(0x2000), &tlb)
            .unwrap();
        space
            .handle_fault(FaultKind::Read, addr(0x3000), &tlb)
            .unwrap();

        assert!(space.page_table().lookup(page(0x2000)).unwrap().is_dirty());
        assert!(!space.page_table().lookup(page(0x3000)).unwrap().is_dirty());
    }

    #[test]
    fn load_window_forces_writable_entries() {
        let (frames, tlb) = machine(4);
        let mut space = space_with(&frames, &[(0x1000, 0x2000, RegionPermissions::READ_ONLY)]);

        space.prepare_load(&tlb);
        space
            .handle_fault(FaultKind::Write, addr(0x1000), &tlb)
            .unwrap();
        let stored = space.page_table().lookup(page(0x1000)).unwrap();
        assert!(!stored.is_dirty());
        assert!(tlb.lookup(page(0x1000)).unwrap().is_dirty());

        space.complete_load(&tlb);
        assert_eq!(tlb.valid_entries(), 0);

        space
            .handle_fault(FaultKind::Read, addr(0x2000), &tlb)
            .unwrap();
        assert!(!tlb.lookup(page(0x2000)).unwrap().is_dirty());

        // The page loaded earlier is read-only again once reinstalled.
        space
            .handle_fault(FaultKind::Read, addr(0x1000), &tlb)
            .unwrap();
        assert!(!tlb.lookup(page(0x1000)).unwrap().is_dirty());
    }

    #[test]
    fn load_window_applies_to_resident_pages() {
        let (frames, tlb) = machine(2);
        let mut space = space_with(&frames, &[(0x1000, PAGE_SIZE, RegionPermissions::READ_ONLY)]);

        space
            .handle_fault(FaultKind::Read, addr(0x1000), &tlb)
            .unwrap();
        assert!(!tlb.lookup(page(0x1000)).unwrap().is_dirty());

        space.prepare_load(&tlb);
        assert_eq!(tlb.lookup(page(0x1000)), None);

        space
            .handle_fault(FaultKind::Write, addr(0x1800), &tlb)
            .unwrap();
        assert!(tlb.lookup(page(0x1000)).unwrap().is_dirty());
        assert!(!space.page_table().lookup(page(0x1000)).unwrap().is_dirty());
        assert_eq!(frames.allocated_frames(), 1);
    }

    #[test]
    fn out_of_frames_is_distinct_from_violation() {
        let (frames, tlb) = machine(1);
        let mut space = space_with(
            &frames,
            &[(0x1000, 2 * PAGE_SIZE, RegionPermissions::READ_WRITE)],
        );

        space
            .handle_fault(FaultKind::Write, addr(0x1000), &tlb)
            .unwrap();
        let result = space.handle_fault(FaultKind::Write, addr(0x2000), &tlb);
        assert_eq!(result, Err(Fault::OutOfMemory));
        assert!(result.unwrap_err().is_recoverable());
        assert_eq!(space.page_table().lookup(page(0x2000)), None);
        assert_eq!(tlb.lookup(page(0x2000)), None);
    }

    /// A TLB backend that has no memory left for new translations.
    struct ExhaustedTlb;

    impl Tlb for ExhaustedTlb {
        fn invalidate_all(&self) {}

        fn invalidate(&self, _page: PageNumber) {}

        fn write_random(&self, _entry: TlbEntry) -> Result<(), OutOfMemory> {
            Err(OutOfMemory)
        }
    }

    #[test]
    fn failed_install_is_out_of_memory() {
        let (frames, _tlb) = machine(1);
        let mut space = space_with(&frames, &[(0x1000, PAGE_SIZE, RegionPermissions::READ_WRITE)]);

        assert_eq!(
            space.handle_fault(FaultKind::Write, addr(0x1000), &ExhaustedTlb),
            Err(Fault::OutOfMemory)
        );
        // The page stays resident, so a retry only has to reinstall it.
        assert!(space.page_table().lookup(page(0x1000)).is_some());
        assert_eq!(
            space.handle_fault(FaultKind::Write, addr(0x1000), &ExhaustedTlb),
            Err(Fault::OutOfMemory)
        );
        assert_eq!(frames.allocated_frames(), 1);
    }

    #[test]
    fn tlb_writes_are_masked() {
        let (frames, tlb) = machine(2);
        let mut space = space_with(
            &frames,
            &[(0x1000, 2 * PAGE_SIZE, RegionPermissions::READ_WRITE)],
        );

        space
            .handle_fault(FaultKind::Read, addr(0x1000), &tlb)
            .unwrap();
        space
            .handle_fault(FaultKind::Read, addr(0x1000), &tlb)
            .unwrap();
        space
            .handle_fault(FaultKind::Write, addr(0x2000), &tlb)
            .unwrap();

        assert_eq!(tlb.writes(), 3);
        assert_eq!(tlb.unmasked_writes(), 0);
    }

    #[test]
    #[should_panic(expected = "without regions")]
    fn fault_without_regions_is_fatal() {
        let (frames, tlb) = machine(1);
        let mut space = AddressSpace::new(&frames).unwrap();
        let _ = space.handle_fault(FaultKind::Read, addr(0x1000), &tlb);
    }

    #[test]
    fn no_address_space_is_a_violation() {
        let (_frames, tlb) = machine(1);
        assert_eq!(
            handle_fault::<&EmulatedFrames, _>(None, FaultKind::Read, addr(0x1000), &tlb),
            Err(Fault::AccessViolation)
        );
    }

    #[test]
    fn raw_entry_point_validates_inputs() {
        let (frames, tlb) = machine(2);
        let mut space = space_with(&frames, &[(0x1000, PAGE_SIZE, RegionPermissions::READ_WRITE)]);

        assert_eq!(
            vm_fault(Some(&mut space), 7, 0x1000, &tlb),
            Err(Fault::InvalidArgument)
        );
        assert_eq!(
            vm_fault(Some(&mut space), 0, 0x1_0000_1000, &tlb),
            Err(Fault::AccessViolation)
        );
        assert_eq!(vm_fault(Some(&mut space), 1, 0x1000, &tlb), Ok(()));
        assert_eq!(frames.allocated_frames(), 1);
        assert_eq!(
            vm_fault(Some(&mut space), 2, 0x1000, &tlb),
            Err(Fault::AccessViolation)
        );
    }

    #[test]
    fn kernel_thread_faults_with_bad_kind_report_invalid_argument() {
        let (_frames, tlb) = machine(1);
        assert_eq!(
            vm_fault::<&EmulatedFrames, _>(None, 9, 0x1000, &tlb),
            Err(Fault::InvalidArgument)
        );
    }
}
