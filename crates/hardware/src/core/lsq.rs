//! Load and store queues.
//!
//! Each queue is a slot arena: entries keep their index for their whole
//! lifetime, so the ROB and the queues can reference each other with plain
//! paired indices and no ownership cycle. A load resolves either by
//! store-to-load forwarding from an older store to the same address, or by
//! translating through the DTLB and reading the L1D.

use crate::core::instr::Progress;

/// One load- or store-queue entry.
#[derive(Clone, Debug, Default)]
pub struct LsqEntry {
    /// Owning instruction id.
    pub instr_id: u64,
    /// Virtual address of the operand.
    pub v_address: u64,
    /// Physical address once translated.
    pub p_address: u64,
    /// PC of the owning instruction.
    pub ip: u64,
    /// ROB slot of the owning instruction.
    pub rob_slot: usize,
    /// DTLB progress.
    pub translated: Progress,
    /// Data access progress (loads only).
    pub fetched: Progress,
    /// Issued to the memory scheduler.
    pub armed: bool,
    /// For loads: the store-queue slot and id expected to forward.
    pub producer: Option<(usize, u64)>,
    /// Cycle the entry's pending action completes.
    pub event_cycle: u64,
}

/// A fixed-size arena of queue slots.
pub struct SlotArena {
    slots: Vec<Option<LsqEntry>>,
    occupancy: usize,
}

impl SlotArena {
    /// Creates an arena with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            occupancy: 0,
        }
    }

    /// Capacity in slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slots.
    #[inline]
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    /// Free slots.
    #[inline]
    pub fn free(&self) -> usize {
        self.slots.len() - self.occupancy
    }

    /// Allocates a slot. Returns its index, or `None` when full.
    pub fn alloc(&mut self, entry: LsqEntry) -> Option<usize> {
        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some(entry);
        self.occupancy += 1;
        Some(slot)
    }

    /// Releases a slot.
    pub fn release(&mut self, slot: usize) -> Option<LsqEntry> {
        let entry = self.slots[slot].take();
        if entry.is_some() {
            self.occupancy -= 1;
        }
        entry
    }

    /// Entry in `slot`, if occupied.
    #[inline]
    pub fn get(&self, slot: usize) -> Option<&LsqEntry> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Entry in `slot` mutably, if occupied.
    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut LsqEntry> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Iterates occupied slots as `(slot, entry)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &LsqEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|e| (slot, e)))
    }

    /// Iterates occupied slots mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut LsqEntry)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_mut().map(|e| (slot, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_release_occupancy() {
        let mut arena = SlotArena::new(2);
        let a = arena.alloc(LsqEntry::default()).unwrap();
        let b = arena.alloc(LsqEntry::default()).unwrap();
        assert_ne!(a, b);
        assert!(arena.alloc(LsqEntry::default()).is_none());
        assert_eq!(arena.occupancy(), 2);

        arena.release(a);
        assert_eq!(arena.free(), 1);
        // The freed slot is reusable.
        assert_eq!(arena.alloc(LsqEntry::default()), Some(a));
    }
}
