//! Multi-armed-bandit replacement orchestrator.
//!
//! Wraps one instance of every base policy. Victim selection is routed to
//! the currently selected arm while access outcomes are broadcast to all
//! arms so each arm's metadata stays warm. At a fixed cycle period the
//! observed core IPC is fed to a discounted UCB bandit as the reward and
//! the selected arm may switch.

use tracing::debug;

use super::{
    DrripPolicy, LruPolicy, ReplacementAccess, ReplacementPolicy, RlrPolicy, ShipPolicy,
    SrripPolicy,
};
use crate::config::BANDIT_UPDATE_PERIOD;
use crate::mem::SimObservation;
use crate::mem::cache::Block;

/// UCB exploration constant.
const UCB_C: f64 = 0.04;
/// Reward discount factor.
const GAMMA: f64 = 0.975;

/// Discounted upper-confidence-bound arm selection.
struct UcbBandit {
    value: Vec<f64>,
    plays: Vec<u64>,
    total_plays: u64,
}

impl UcbBandit {
    fn new(arms: usize) -> Self {
        Self {
            value: vec![0.0; arms],
            plays: vec![0; arms],
            total_plays: 0,
        }
    }

    /// Folds a reward into the arm's discounted running value.
    fn update(&mut self, arm: usize, reward: f64) {
        self.plays[arm] += 1;
        self.total_plays += 1;
        self.value[arm] = GAMMA * self.value[arm] + (1.0 - GAMMA) * reward;
    }

    /// Picks the arm with the best optimism bonus; unplayed arms first.
    fn next_arm(&self) -> usize {
        if let Some(arm) = self.plays.iter().position(|&p| p == 0) {
            return arm;
        }
        let ln_t = (self.total_plays.max(1) as f64).ln();
        (0..self.value.len())
            .map(|arm| {
                let bonus = UCB_C * (2.0 * ln_t / self.plays[arm] as f64).sqrt();
                (arm, self.value[arm] + bonus)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(0, |(arm, _)| arm)
    }
}

/// The orchestrator: a bandit over the five base policies.
pub struct BanditPolicy {
    arms: Vec<Box<dyn ReplacementPolicy>>,
    bandit: UcbBandit,
    current: usize,
    next_update_cycle: u64,
    update_period: u64,
}

impl BanditPolicy {
    /// Creates the orchestrator with every base policy as an arm.
    pub fn new(sets: usize, ways: usize) -> Self {
        let arms: Vec<Box<dyn ReplacementPolicy>> = vec![
            Box::new(LruPolicy::new(sets, ways)),
            Box::new(DrripPolicy::new(sets, ways)),
            Box::new(ShipPolicy::new(sets, ways)),
            Box::new(SrripPolicy::new(sets, ways)),
            Box::new(RlrPolicy::new(sets, ways)),
        ];
        let bandit = UcbBandit::new(arms.len());
        Self {
            arms,
            bandit,
            current: 0,
            next_update_cycle: 0,
            update_period: BANDIT_UPDATE_PERIOD,
        }
    }

    /// Currently selected arm index.
    pub fn current_arm(&self) -> usize {
        self.current
    }
}

impl ReplacementPolicy for BanditPolicy {
    fn find_victim(&mut self, set: usize, blocks: &[Block], access: &ReplacementAccess) -> usize {
        self.arms[self.current].find_victim(set, blocks, access)
    }

    fn update_state(
        &mut self,
        set: usize,
        way: usize,
        access: &ReplacementAccess,
        victim_addr: u64,
        hit: bool,
        obs: &SimObservation,
    ) {
        if access.cycle >= self.next_update_cycle {
            self.bandit.update(self.current, obs.ipc(access.cpu));
            let chosen = self.bandit.next_arm();
            if chosen != self.current {
                debug!(from = self.current, to = chosen, "bandit switched arm");
            }
            self.current = chosen;
            self.next_update_cycle += self.update_period;
        }

        for arm in &mut self.arms {
            arm.update_state(set, way, access, victim_addr, hit, obs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RequestType;

    fn access(cycle: u64) -> ReplacementAccess {
        ReplacementAccess {
            cycle,
            cpu: 0,
            instr_id: 0,
            ip: 0x40,
            addr: 0x1000,
            kind: RequestType::Load,
        }
    }

    #[test]
    fn test_unplayed_arms_explored_first() {
        let mut bandit = UcbBandit::new(3);
        assert_eq!(bandit.next_arm(), 0);
        bandit.update(0, 1.0);
        assert_eq!(bandit.next_arm(), 1);
        bandit.update(1, 0.1);
        assert_eq!(bandit.next_arm(), 2);
    }

    #[test]
    fn test_best_arm_wins_after_exploration() {
        let mut bandit = UcbBandit::new(2);
        for _ in 0..50 {
            bandit.update(0, 2.0);
            bandit.update(1, 0.5);
        }
        assert_eq!(bandit.next_arm(), 0);
    }

    #[test]
    fn test_update_broadcasts_and_routes() {
        let mut policy = BanditPolicy::new(4, 4);
        let blocks = vec![Block::default(); 4];
        let obs = SimObservation { ipc: vec![1.5] };
        // First update crosses the cycle-0 threshold and selects an arm.
        policy.update_state(0, 0, &access(0), 0, false, &obs);
        let way = policy.find_victim(0, &blocks, &access(1));
        assert!(way < 4);
    }
}
