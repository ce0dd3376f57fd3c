//! Signature-based Hit Predictor (SHiP) over an RRIP base.
//!
//! Each block remembers the signature of the PC that filled it and whether
//! it was re-referenced before eviction. A table of saturating counters per
//! signature learns which fill PCs produce dead-on-arrival blocks; fills
//! from such PCs insert at the distant re-reference interval.

use super::srrip::MAX_RRPV;
use super::{ReplacementAccess, ReplacementPolicy};
use crate::mem::SimObservation;
use crate::mem::cache::Block;

const SHCT_BITS: usize = 14;
const SHCT_SIZE: usize = 1 << SHCT_BITS;
const SHCT_MAX: u8 = 7;

/// SHiP policy state.
pub struct ShipPolicy {
    rrpv: Vec<u8>,
    signature: Vec<u16>,
    outcome: Vec<bool>,
    shct: Vec<u8>,
    ways: usize,
}

impl ShipPolicy {
    /// Creates SHiP state for the given geometry.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            rrpv: vec![MAX_RRPV; sets * ways],
            signature: vec![0; sets * ways],
            outcome: vec![false; sets * ways],
            shct: vec![1; SHCT_SIZE],
            ways,
        }
    }

    fn sig(ip: u64) -> u16 {
        (((ip >> 2) ^ (ip >> (2 + SHCT_BITS))) & (SHCT_SIZE as u64 - 1)) as u16
    }
}

impl ReplacementPolicy for ShipPolicy {
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
        access: &ReplacementAccess,
        _victim_addr: u64,
        hit: bool,
        _obs: &SimObservation,
    ) {
        let slot = set * self.ways + way;
        if hit {
            self.rrpv[slot] = 0;
            if !self.outcome[slot] {
                self.outcome[slot] = true;
                let sig = self.signature[slot] as usize;
                self.shct[sig] = (self.shct[sig] + 1).min(SHCT_MAX);
            }
            return;
        }

        // Fill: train down on the evicted block if it was never reused.
        if !self.outcome[slot] {
            let old_sig = self.signature[slot] as usize;
            self.shct[old_sig] = self.shct[old_sig].saturating_sub(1);
        }

        let sig = Self::sig(access.ip);
        self.signature[slot] = sig;
        self.outcome[slot] = false;
        self.rrpv[slot] = if self.shct[sig as usize] == 0 {
            MAX_RRPV
        } else {
            MAX_RRPV - 1
        };
    }
}
