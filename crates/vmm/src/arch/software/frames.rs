//! Emulated physical frame pool.

use alloc::vec::Vec;

use crate::{AddressTranslator, FrameAllocator, PhysicalAddress, layout::PAGE_SIZE};

/// A fixed pool of frames carved out of emulated memory.
///
/// The pool keeps exact allocation accounting so tests can check that an address space
/// releases every frame it owns, and only those.
pub struct EmulatedFrames {
    base: PhysicalAddress,
    capacity: usize,
    state: spin::Mutex<PoolState>,
}

struct PoolState {
    /// Free frames; the lowest address is popped first.
    free: Vec<PhysicalAddress>,
    /// Allocation status, indexed by frame offset from `base`.
    allocated: Vec<bool>,
}

impl EmulatedFrames {
    /// Creates a pool of `count` frames from the current thread's emulated memory.
    ///
    /// # Panics
    /// Panics if the emulated memory cannot fit the pool.
    pub fn new(count: usize) -> Self {
        let translator = AddressTranslator::current();
        let base = translator
            .allocate(count * PAGE_SIZE, PAGE_SIZE)
            .expect("out of emulated memory");

        let free = (0..count).rev().map(|i| base + i * PAGE_SIZE).collect();
        Self {
            base,
            capacity: count,
            state: spin::Mutex::new(PoolState {
                free,
                allocated: alloc::vec![false; count],
            }),
        }
    }

    /// Returns the total number of frames in the pool.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of frames available for allocation.
    pub fn free_frames(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Returns the number of frames currently allocated.
    pub fn allocated_frames(&self) -> usize {
        self.capacity - self.free_frames()
    }

    /// Returns whether `frame` is currently allocated from this pool.
    pub fn is_allocated(&self, frame: PhysicalAddress) -> bool {
        self.index_of(frame)
            .is_some_and(|index| self.state.lock().allocated[index])
    }

    fn index_of(&self, frame: PhysicalAddress) -> Option<usize> {
        if frame < self.base || !frame.is_aligned(PAGE_SIZE) {
            return None;
        }
        let index = (frame - self.base) / PAGE_SIZE;
        (index < self.capacity).then_some(index)
    }
}

impl FrameAllocator for EmulatedFrames {
    fn allocate_frame(&self) -> Option<PhysicalAddress> {
        let mut state = self.state.lock();
        let frame = state.free.pop()?;
        let index = (frame - self.base) / PAGE_SIZE;
        state.allocated[index] = true;
        Some(frame)
    }

    unsafe fn free_frame(&self, frame: PhysicalAddress) {
        let Some(index) = self.index_of(frame) else {
            panic!("frame {} does not belong to this pool", frame);
        };

        let mut state = self.state.lock();
        if !state.allocated[index] {
            panic!("double free of frame {}", frame);
        }
        state.allocated[index] = false;
        state.free.push(frame);
    }
}
