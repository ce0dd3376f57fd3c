//! Recency/reuse learned ranking (RLR).
//!
//! Ranks blocks by a weighted score of three features: age since last
//! touch, whether the block has been reused since fill, and whether it was
//! brought in by a prefetch. The age scale adapts to the set's observed
//! reuse distance, so the policy behaves like LRU under tight reuse and
//! like a scan-resistant filter under streaming.

use super::{ReplacementAccess, ReplacementPolicy};
use crate::channel::RequestType;
use crate::mem::SimObservation;
use crate::mem::cache::Block;

const W_RECENCY: i64 = 1;
const W_REUSE: i64 = 8;
const W_DEMAND: i64 = 4;

/// RLR policy state.
pub struct RlrPolicy {
    last_touch: Vec<u64>,
    reused: Vec<bool>,
    demand: Vec<bool>,
    reuse_scale: Vec<u64>,
    ways: usize,
}

impl RlrPolicy {
    /// Creates RLR state for the given geometry.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            last_touch: vec![0; sets * ways],
            reused: vec![false; sets * ways],
            demand: vec![true; sets * ways],
            reuse_scale: vec![1; sets],
            ways,
        }
    }

    fn score(&self, slot: usize, set: usize, now: u64) -> i64 {
        let age = now.saturating_sub(self.last_touch[slot]);
        let buckets = (age / self.reuse_scale[set].max(1)).min(63) as i64;
        W_REUSE * i64::from(self.reused[slot]) + W_DEMAND * i64::from(self.demand[slot])
            - W_RECENCY * buckets
    }
}

impl ReplacementPolicy for RlrPolicy {
    fn find_victim(&mut self, set: usize, blocks: &[Block], access: &ReplacementAccess) -> usize {
        debug_assert_eq!(blocks.len(), self.ways);
        let base = set * self.ways;
        (0..self.ways)
            .min_by_key(|&way| self.score(base + way, set, access.cycle))
            .map_or(0, |way| way)
    }

    fn update_state(
        &mut self,
        set: usize,
        way: usize,
        access: &ReplacementAccess,
        _victim_addr: u64,
        hit: bool,
        _obs: &SimObservation,
    ) {
        let slot = set * self.ways + way;
        if hit {
            // Exponentially track the set's observed reuse distance.
            let distance = access.cycle.saturating_sub(self.last_touch[slot]).max(1);
            self.reuse_scale[set] = (3 * self.reuse_scale[set] + distance) / 4;
            self.reused[slot] = true;
        } else {
            self.reused[slot] = false;
            self.demand[slot] = access.kind != RequestType::Prefetch;
        }
        self.last_touch[slot] = access.cycle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(cycle: u64, kind: RequestType) -> ReplacementAccess {
        ReplacementAccess {
            cycle,
            cpu: 0,
            instr_id: 0,
            ip: 0,
            addr: 0,
            kind,
        }
    }

    #[test]
    fn test_prefers_evicting_unreused_prefetch() {
        let mut policy = RlrPolicy::new(1, 3);
        let blocks = vec![Block::default(); 3];
        let obs = SimObservation::default();
        policy.update_state(0, 0, &access(10, RequestType::Load), 0, false, &obs);
        policy.update_state(0, 0, &access(11, RequestType::Load), 0, true, &obs);
        policy.update_state(0, 1, &access(12, RequestType::Prefetch), 0, false, &obs);
        policy.update_state(0, 2, &access(13, RequestType::Load), 0, false, &obs);
        assert_eq!(policy.find_victim(0, &blocks, &access(14, RequestType::Load)), 1);
    }

    #[test]
    fn test_old_blocks_lose_to_fresh_ones() {
        let mut policy = RlrPolicy::new(1, 2);
        let blocks = vec![Block::default(); 2];
        let obs = SimObservation::default();
        policy.update_state(0, 0, &access(0, RequestType::Load), 0, false, &obs);
        policy.update_state(0, 1, &access(1000, RequestType::Load), 0, false, &obs);
        assert_eq!(
            policy.find_victim(0, &blocks, &access(2000, RequestType::Load)),
            0
        );
    }
}
