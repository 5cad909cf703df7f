#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]
#![feature(allocator_api)]

//! # Polaris Virtual Memory Manager (VMM)
//!
//! The Polaris Virtual Memory Manager gives every user process its own address space on a
//! machine with a software-managed TLB. It provides:
//!
//! - Region tables describing the segments a process may touch.
//! - A two-level page table from 4 KiB virtual pages to physical frames.
//! - Demand paging: frames are allocated and zero-filled on the first touch of a page.
//! - TLB control, including the flush on every address-space switch.
//! - Software emulation for testing in non-kernel environments.
//!
//! Physical frames come from a [`FrameAllocator`] supplied by the kernel, and TLB access
//! goes through a [`Tlb`] implementation.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod config;
mod descriptor;
mod error;
mod fault;
mod frame;
pub mod layout;
mod numbers;
mod page_table;
mod region;
pub mod tlb;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use config::{VmConfig, bootstrap, config};
pub use descriptor::FrameDescriptor;
pub use error::{Fault, OutOfMemory};
pub use fault::{FaultKind, handle_fault, vm_fault};
pub use frame::{FrameAllocator, frame_contents};
pub use numbers::PageNumber;
pub use page_table::PageTable;
pub use region::{Region, RegionPermissions, RegionTable};
pub use tlb::{Tlb, TlbEntry};

pub use layout::PAGE_SIZE;

#[cfg(target_arch = "x86_64")]
pub use arch::x86_64::HardwareTlb;

#[cfg(any(test, feature = "software-emulation"))]
pub use arch::software::{EmulatedFrames, EmulatedTlb, TLB_ENTRIES, machine};
