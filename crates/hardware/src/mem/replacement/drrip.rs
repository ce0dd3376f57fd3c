//! Dynamic Re-Reference Interval Prediction (DRRIP).
//!
//! Set dueling between SRRIP insertion and bimodal RRIP insertion. A few
//! leader sets are dedicated to each insertion policy; a saturating policy
//! selector counts which leader group misses less and follower sets insert
//! with the winner. BRRIP inserts at the distant interval except for one in
//! every 32 fills.

use super::srrip::MAX_RRPV;
use super::{ReplacementAccess, ReplacementPolicy};
use crate::mem::SimObservation;
use crate::mem::cache::Block;

const PSEL_MAX: u32 = 1023;
const PSEL_INIT: u32 = PSEL_MAX / 2;
const LEADER_PERIOD: usize = 32;
const BRRIP_LONG_PERIOD: u32 = 32;

#[derive(Clone, Copy, PartialEq)]
enum SetRole {
    SrripLeader,
    BrripLeader,
    Follower,
}

/// DRRIP policy state.
pub struct DrripPolicy {
    rrpv: Vec<u8>,
    ways: usize,
    psel: u32,
    brrip_fills: u32,
}

impl DrripPolicy {
    /// Creates DRRIP state for the given geometry.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            rrpv: vec![MAX_RRPV; sets * ways],
            ways,
            psel: PSEL_INIT,
            brrip_fills: 0,
        }
    }

    fn role(set: usize) -> SetRole {
        match set % LEADER_PERIOD {
            0 => SetRole::SrripLeader,
            1 => SetRole::BrripLeader,
            _ => SetRole::Follower,
        }
    }

    fn insert_brrip(&mut self) -> u8 {
        self.brrip_fills = (self.brrip_fills + 1) % BRRIP_LONG_PERIOD;
        if self.brrip_fills == 0 {
            MAX_RRPV - 1
        } else {
            MAX_RRPV
        }
    }
}

impl ReplacementPolicy for DrripPolicy {
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
        if hit {
            self.rrpv[slot] = 0;
            return;
        }

        // A miss in a leader set trains the selector toward the other group.
        match Self::role(set) {
            SetRole::SrripLeader => self.psel = self.psel.saturating_sub(1),
            SetRole::BrripLeader => self.psel = (self.psel + 1).min(PSEL_MAX),
            SetRole::Follower => {}
        }

        let use_srrip = match Self::role(set) {
            SetRole::SrripLeader => true,
            SetRole::BrripLeader => false,
            SetRole::Follower => self.psel >= PSEL_INIT,
        };
        self.rrpv[slot] = if use_srrip {
            MAX_RRPV - 1
        } else {
            self.insert_brrip()
        };
    }
}
