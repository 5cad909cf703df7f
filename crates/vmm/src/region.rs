//! Regions: the virtual segments an address space may fault into.

use alloc::vec::Vec;

use crate::{OutOfMemory, VirtualAddress, layout::PAGE_SIZE};

/// Access permissions declared for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionPermissions {
    pub readable: bool,
    pub writeable: bool,
    pub executable: bool,
}

impl RegionPermissions {
    /// Read-only data.
    pub const READ_ONLY: Self = Self::new(true, false, false);

    /// Read-write data, such as the stack or the heap.
    pub const READ_WRITE: Self = Self::new(true, true, false);

    /// Program text.
    pub const READ_EXECUTE: Self = Self::new(true, false, true);

    pub const fn new(readable: bool, writeable: bool, executable: bool) -> Self {
        Self {
            readable,
            writeable,
            executable,
        }
    }
}

/// A declared virtual segment `[base, base + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    base: VirtualAddress,
    /// Length in bytes, a whole number of pages.
    size: usize,
    permissions: RegionPermissions,
}

impl Region {
    /// Creates a region of `size` bytes starting at `base`.
    ///
    /// Callers must pass a page-aligned base and a size that is a whole number of pages;
    /// nothing is rounded here.
    pub fn new(base: VirtualAddress, size: usize, permissions: RegionPermissions) -> Self {
        debug_assert!(base.is_aligned(PAGE_SIZE), "region base must be page-aligned");
        debug_assert!(
            size % PAGE_SIZE == 0,
            "region size must be a whole number of pages"
        );
        debug_assert!(
            size == 0 || base.checked_add(size - 1).is_some(),
            "region must fit in the user address space"
        );

        Self {
            base,
            size,
            permissions,
        }
    }

    /// Returns the first address of the region.
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Returns the length of the region in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the declared permissions.
    pub const fn permissions(&self) -> RegionPermissions {
        self.permissions
    }

    /// Returns whether `addr` lies inside the region.
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

/// The regions of one address space.
///
/// Lookups are first-match, most recently defined region first. Overlapping regions are
/// not rejected.
#[derive(Debug, Default)]
pub struct RegionTable {
    /// Oldest first.
    regions: Vec<Region>,
}

impl RegionTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Adds `region` as the most recent region.
    pub fn define(&mut self, region: Region) -> Result<(), OutOfMemory> {
        self.regions.try_reserve(1).map_err(|_| OutOfMemory)?;
        self.regions.push(region);
        Ok(())
    }

    /// Returns the permissions of the most recent region containing `addr`.
    pub fn find_containing(&self, addr: VirtualAddress) -> Option<RegionPermissions> {
        self.iter()
            .find(|region| region.contains(addr))
            .map(Region::permissions)
    }

    /// Iterates over the regions, most recent first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Region> {
        self.regions.iter().rev()
    }

    /// Returns the number of regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns whether no region has been defined.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(base: usize, size: usize, permissions: RegionPermissions) -> Region {
        Region::new(VirtualAddress::new(base), size, permissions)
    }

    #[test]
    fn contains_is_half_open() {
        let r = region(0x1000, 0x2000, RegionPermissions::READ_ONLY);
        assert!(!r.contains(VirtualAddress::new(0x0FFF)));
        assert!(r.contains(VirtualAddress::new(0x1000)));
        assert!(r.contains(VirtualAddress::new(0x2FFF)));
        assert!(!r.contains(VirtualAddress::new(0x3000)));
    }

    #[test]
    fn empty_region_contains_nothing() {
        let r = region(0x1000, 0, RegionPermissions::READ_WRITE);
        assert!(!r.contains(VirtualAddress::new(0x1000)));
    }

    #[test]
    fn region_at_top_of_user_space() {
        let r = region(0xFFFF_F000, PAGE_SIZE, RegionPermissions::READ_WRITE);
        assert!(r.contains(VirtualAddress::new(0xFFFF_FFFF)));
    }

    #[test]
    #[should_panic(expected = "region base must be page-aligned")]
    fn rejects_unaligned_base() {
        region(0x1001, PAGE_SIZE, RegionPermissions::READ_ONLY);
    }

    #[test]
    #[should_panic(expected = "region size must be a whole number of pages")]
    fn rejects_partial_page_size() {
        region(0x1000, 100, RegionPermissions::READ_ONLY);
    }

    #[test]
    fn finds_nothing_in_empty_table() {
        let table = RegionTable::new();
        assert!(table.is_empty());
        assert_eq!(table.find_containing(VirtualAddress::new(0x1000)), None);
    }

    #[test]
    fn most_recent_region_wins() {
        let mut table = RegionTable::new();
        table
            .define(region(0x1000, 0x4000, RegionPermissions::READ_ONLY))
            .unwrap();
        table
            .define(region(0x2000, 0x1000, RegionPermissions::READ_WRITE))
            .unwrap();

        assert_eq!(
            table.find_containing(VirtualAddress::new(0x2800)),
            Some(RegionPermissions::READ_WRITE)
        );
        assert_eq!(
            table.find_containing(VirtualAddress::new(0x1800)),
            Some(RegionPermissions::READ_ONLY)
        );
        assert_eq!(table.find_containing(VirtualAddress::new(0x5000)), None);
    }

    #[test]
    fn iterates_most_recent_first() {
        let mut table = RegionTable::new();
        table
            .define(region(0x1000, PAGE_SIZE, RegionPermissions::READ_EXECUTE))
            .unwrap();
        table
            .define(region(0x8000, PAGE_SIZE, RegionPermissions::READ_WRITE))
            .unwrap();

        let bases: Vec<_> = table.iter().map(|r| r.base().as_usize()).collect();
        assert_eq!(bases, [0x8000, 0x1000]);
        assert_eq!(table.len(), 2);
    }
}
