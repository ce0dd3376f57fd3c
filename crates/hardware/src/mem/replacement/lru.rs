//! Least Recently Used replacement.
//!
//! Keeps a monotonic access stamp per block and evicts the smallest stamp
//! in the set. A private counter breaks same-cycle ties deterministically.

use super::{ReplacementAccess, ReplacementPolicy};
use crate::mem::SimObservation;
use crate::mem::cache::Block;

/// LRU policy state.
pub struct LruPolicy {
    stamps: Vec<u64>,
    ways: usize,
    tick: u64,
}

impl LruPolicy {
    /// Creates LRU state for the given geometry.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            stamps: vec![0; sets * ways],
            ways,
            tick: 0,
        }
    }
}

impl ReplacementPolicy for LruPolicy {
    fn find_victim(&mut self, set: usize, blocks: &[Block], _access: &ReplacementAccess) -> usize {
        debug_assert_eq!(blocks.len(), self.ways);
        let base = set * self.ways;
        let stamps = &self.stamps[base..base + self.ways];
        let victim = stamps
            .iter()
            .enumerate()
            .min_by_key(|&(_, stamp)| stamp)
            .map_or(0, |(way, _)| way);
        assert!(victim < self.ways, "LRU pointer out of range");
        victim
    }

    fn update_state(
        &mut self,
        set: usize,
        way: usize,
        _access: &ReplacementAccess,
        _victim_addr: u64,
        _hit: bool,
        _obs: &SimObservation,
    ) {
        self.tick += 1;
        self.stamps[set * self.ways + way] = self.tick;
    }
}
