//! Emulated software-loaded TLB.

use crate::{FrameDescriptor, OutOfMemory, PageNumber, Tlb, TlbEntry};

use super::interrupts_enabled;

/// Number of entries in the emulated TLB.
pub const TLB_ENTRIES: usize = 64;

/// A 64-entry, fully associative TLB with random replacement.
///
/// Besides translating, it counts how often it was touched with interrupts enabled, so
/// tests can check that every hardware access happened with interrupts masked.
pub struct EmulatedTlb {
    state: spin::Mutex<TlbState>,
}

struct TlbState {
    slots: [Option<TlbEntry>; TLB_ENTRIES],
    /// xorshift32 state for slot selection.
    seed: u32,
    flushes: usize,
    writes: usize,
    unmasked_writes: usize,
}

impl TlbState {
    fn record_access(&mut self) {
        if interrupts_enabled() {
            self.unmasked_writes += 1;
        }
    }

    fn next_slot(&mut self) -> usize {
        let mut x = self.seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed = x;
        x as usize % TLB_ENTRIES
    }
}

impl EmulatedTlb {
    /// Creates an empty TLB.
    pub fn new() -> Self {
        Self {
            state: spin::Mutex::new(TlbState {
                slots: [None; TLB_ENTRIES],
                seed: 0x2545_F491,
                flushes: 0,
                writes: 0,
                unmasked_writes: 0,
            }),
        }
    }

    /// Translates `page`, returning the installed descriptor if the TLB holds one.
    pub fn lookup(&self, page: PageNumber) -> Option<FrameDescriptor> {
        self.state
            .lock()
            .slots
            .iter()
            .flatten()
            .find(|entry| entry.page() == page)
            .map(|entry| entry.descriptor())
    }

    /// Returns the number of slots holding a translation.
    pub fn valid_entries(&self) -> usize {
        self.state.lock().slots.iter().flatten().count()
    }

    /// Returns how many times the whole TLB was invalidated.
    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }

    /// Returns how many entries were written.
    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    /// Returns how many hardware accesses happened with interrupts enabled.
    pub fn unmasked_writes(&self) -> usize {
        self.state.lock().unmasked_writes
    }
}

impl Default for EmulatedTlb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlb for EmulatedTlb {
    fn invalidate_all(&self) {
        let mut state = self.state.lock();
        state.record_access();
        state.flushes += 1;
        state.slots = [None; TLB_ENTRIES];
    }

    fn invalidate(&self, page: PageNumber) {
        let mut state = self.state.lock();
        state.record_access();
        for slot in state.slots.iter_mut() {
            if slot.is_some_and(|entry| entry.page() == page) {
                *slot = None;
            }
        }
    }

    fn write_random(&self, entry: TlbEntry) -> Result<(), OutOfMemory> {
        let mut state = self.state.lock();
        state.record_access();
        state.writes += 1;

        // Replace an existing translation for the page so the TLB never holds duplicates.
        let existing = state
            .slots
            .iter()
            .position(|slot| slot.is_some_and(|e| e.page() == entry.page()));
        let index = match existing {
            Some(index) => index,
            None => state.next_slot(),
        };
        state.slots[index] = Some(entry);
        Ok(())
    }
}
