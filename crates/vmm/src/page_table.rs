//! Software-managed two-level page table.
//!
//! The top-level directory has one slot per 2 MiB of user address space. A slot is either
//! absent or owns a second-level table of 512 frame descriptors. Second-level tables are
//! allocated the first time a page in their range is inserted.

use alloc::{boxed::Box, vec::Vec};

use crate::{
    FrameAllocator, FrameDescriptor, OutOfMemory, PageNumber,
    frame::{allocate_zeroed, copy_frame},
    layout::{SECOND_LEVEL_ENTRIES, TOP_LEVEL_ENTRIES},
};

/// A second-level table.
type SecondLevel = [FrameDescriptor; SECOND_LEVEL_ENTRIES];

/// Per-address-space page table.
///
/// The table owns every frame its descriptors reference and returns them to the frame
/// allocator when dropped.
pub struct PageTable<A: FrameAllocator> {
    /// Top-level directory, `TOP_LEVEL_ENTRIES` slots.
    directory: Box<[Option<Box<SecondLevel>>]>,
    /// Allocator that owns the frames referenced by this table.
    frames: A,
}

impl<A: FrameAllocator> PageTable<A> {
    /// Creates an empty page table whose frames come from `frames`.
    pub fn new(frames: A) -> Result<Self, OutOfMemory> {
        let mut directory = Vec::new();
        directory
            .try_reserve_exact(TOP_LEVEL_ENTRIES)
            .map_err(|_| OutOfMemory)?;
        directory.resize_with(TOP_LEVEL_ENTRIES, || None);

        Ok(Self {
            directory: directory.into_boxed_slice(),
            frames,
        })
    }

    /// Returns the frame allocator backing this table.
    pub fn allocator(&self) -> &A {
        &self.frames
    }

    /// Returns the descriptor mapping `page`, or None if the page is unmapped.
    pub fn lookup(&self, page: PageNumber) -> Option<FrameDescriptor> {
        let table = self.directory[page.top_index()].as_deref()?;
        let descriptor = table[page.second_index()];
        (!descriptor.is_empty()).then_some(descriptor)
    }

    /// Stores `descriptor` as the mapping for `page`.
    ///
    /// The table takes ownership of the frame the descriptor references. Fails only if a
    /// second-level table has to be allocated and the heap is exhausted.
    ///
    /// # Panics
    ///
    /// Panics if `page` is already mapped.
    pub fn insert(
        &mut self,
        page: PageNumber,
        descriptor: FrameDescriptor,
    ) -> Result<(), OutOfMemory> {
        let slot = &mut self.directory[page.top_index()];
        let table = match slot {
            Some(table) => table,
            empty @ None => empty.insert(
                Box::try_new([FrameDescriptor::EMPTY; SECOND_LEVEL_ENTRIES])
                    .map_err(|_| OutOfMemory)?,
            ),
        };

        let entry = &mut table[page.second_index()];
        assert!(entry.is_empty(), "page {} is already mapped", page);
        *entry = descriptor;
        Ok(())
    }

    /// Iterates over every mapping in ascending page order.
    pub fn mappings(&self) -> impl Iterator<Item = (PageNumber, FrameDescriptor)> + '_ {
        self.directory
            .iter()
            .enumerate()
            .filter_map(|(top, table)| table.as_deref().map(|table| (top, table)))
            .flat_map(|(top, table)| {
                table
                    .iter()
                    .enumerate()
                    .filter(|(_, descriptor)| !descriptor.is_empty())
                    .map(move |(second, &descriptor)| {
                        (PageNumber::from_indices(top, second), descriptor)
                    })
            })
    }

    /// Returns the number of mapped pages.
    pub fn resident_pages(&self) -> usize {
        self.mappings().count()
    }

    /// Returns the number of second-level tables allocated.
    pub fn second_level_tables(&self) -> usize {
        self.directory.iter().filter(|slot| slot.is_some()).count()
    }

    /// Releases every frame and table owned by this page table.
    pub fn destroy(self) {
        drop(self);
    }
}

impl<A: FrameAllocator + Clone> PageTable<A> {
    /// Creates a deep copy of this table.
    ///
    /// Every mapped page gets a fresh frame holding a copy of the original page, with the
    /// same dirty bit. If an allocation fails, everything allocated for the copy so far is
    /// released before the error is returned.
    pub fn duplicate(&self) -> Result<Self, OutOfMemory> {
        let mut copy = Self::new(self.frames.clone())?;

        for (page, descriptor) in self.mappings() {
            let Some(source) = descriptor.frame() else {
                continue;
            };

            let frame = allocate_zeroed(&copy.frames)?;
            // SAFETY: `source` is owned by this table and `frame` was just allocated.
            unsafe { copy_frame(source, frame) };

            let copied = FrameDescriptor::new(frame, descriptor.is_dirty());
            if let Err(err) = copy.insert(page, copied) {
                // SAFETY: The frame never made it into the copy.
                unsafe { copy.frames.free_frame(frame) };
                return Err(err);
            }
        }

        Ok(copy)
    }
}

impl<A: FrameAllocator> Drop for PageTable<A> {
    fn drop(&mut self) {
        for table in self.directory.iter().flatten() {
            for frame in table.iter().filter_map(|descriptor| descriptor.frame()) {
                // SAFETY: Every valid descriptor references a frame owned by this table, and
                // the table is going away.
                unsafe { self.frames.free_frame(frame) };
            }
        }
    }
}
