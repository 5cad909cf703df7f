//! Error types returned by the virtual memory manager.

use core::fmt;

/// The frame allocator or the kernel heap could not satisfy an allocation.
///
/// This is recoverable: the caller may retry after memory has been reclaimed, or abort
/// the operation that needed the memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out of memory")
    }
}

impl core::error::Error for OutOfMemory {}

/// Outcome of a page fault that could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "unresolved faults must be delivered to the faulting context"]
pub enum Fault {
    /// Memory ran out while populating the page.
    OutOfMemory,
    /// The access is not permitted: the address lies outside every region, the page is
    /// read-only, or there is no address space to fault into.
    AccessViolation,
    /// The trap dispatcher passed a fault type this manager does not know.
    InvalidArgument,
}

impl Fault {
    /// Returns whether retrying the faulting access could succeed.
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::OutOfMemory)
    }
}

impl From<OutOfMemory> for Fault {
    fn from(_: OutOfMemory) -> Self {
        Self::OutOfMemory
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory while handling page fault"),
            Self::AccessViolation => write!(f, "access violation"),
            Self::InvalidArgument => write!(f, "invalid fault type"),
        }
    }
}

impl core::error::Error for Fault {}
