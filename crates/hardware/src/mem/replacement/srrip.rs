//! Static Re-Reference Interval Prediction (SRRIP).
//!
//! Two-bit re-reference prediction values per block. New blocks insert at a
//! long interval, hits promote to immediate re-reference, and the victim is
//! the first block already at the distant interval (aging the whole set
//! until one exists).

use super::{ReplacementAccess, ReplacementPolicy};
use crate::mem::SimObservation;
use crate::mem::cache::Block;

/// Maximum (distant) re-reference prediction value.
pub const MAX_RRPV: u8 = 3;

/// SRRIP policy state.
pub struct SrripPolicy {
    rrpv: Vec<u8>,
    ways: usize,
}

impl SrripPolicy {
    /// Creates SRRIP state for the given geometry.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            rrpv: vec![MAX_RRPV; sets * ways],
            ways,
        }
    }
}

impl ReplacementPolicy for SrripPolicy {
    fn find_victim(&mut self, set: usize, _blocks: &[Block], _access: &ReplacementAccess) -> usize {
        let base = set * self.ways;
        loop {
            let row = &mut self.rrpv[base..base + self.ways];
            if let Some(way) = row.iter().position(|&v| v >= MAX_RRPV) {
                return way;
            }
            for v in row {
                *v += 1;
            }
        }
    }

    fn update_state(
        &mut self,
        set: usize,
        way: usize,
        _access: &ReplacementAccess,
        _victim_addr: u64,
        hit: bool,
        _obs: &SimObservation,
    ) {
        let slot = set * self.ways + way;
        self.rrpv[slot] = if hit { 0 } else { MAX_RRPV - 1 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RequestType;

    fn access() -> ReplacementAccess {
        ReplacementAccess {
            cycle: 0,
            cpu: 0,
            instr_id: 0,
            ip: 0,
            addr: 0,
            kind: RequestType::Load,
        }
    }

    #[test]
    fn test_hit_block_survives_fill_block() {
        let mut policy = SrripPolicy::new(1, 2);
        let blocks = vec![Block::default(); 2];
        let obs = SimObservation::default();
        policy.update_state(0, 0, &access(), 0, false, &obs); // fill: rrpv 2
        policy.update_state(0, 1, &access(), 0, false, &obs); // fill: rrpv 2
        policy.update_state(0, 0, &access(), 0, true, &obs); // hit: rrpv 0
        // Way 1 reaches the distant interval first.
        assert_eq!(policy.find_victim(0, &blocks, &access()), 1);
    }
}
