//! Cache replacement policies.
//!
//! Every policy implements [`ReplacementPolicy`]: pick a victim way for a
//! fill and observe every access outcome to keep its metadata warm. The
//! cache owns the boxed policy and is the only caller of either hook.
//!
//! # Policies
//!
//! - `Lru`: least recently used.
//! - `Srrip`: static re-reference interval prediction.
//! - `Drrip`: set-dueling dynamic RRIP.
//! - `Ship`: signature-based hit prediction over an RRIP base.
//! - `Rlr`: recency/reuse learned ranking.
//! - `Bandit`: UCB multi-armed bandit that routes between all of the above.

/// UCB bandit orchestrator.
pub mod bandit;

/// Set-dueling dynamic RRIP.
pub mod drrip;

/// Least recently used.
pub mod lru;

/// Recency/reuse learned ranking.
pub mod rlr;

/// Signature-based hit prediction.
pub mod ship;

/// Static RRIP.
pub mod srrip;

pub use bandit::BanditPolicy;
pub use drrip::DrripPolicy;
pub use lru::LruPolicy;
pub use rlr::RlrPolicy;
pub use ship::ShipPolicy;
pub use srrip::SrripPolicy;

use crate::channel::RequestType;
use crate::config::ReplacementPolicy as PolicyId;
use crate::mem::SimObservation;
use crate::mem::cache::Block;

/// The access being serviced when a replacement hook runs.
#[derive(Clone, Copy, Debug)]
pub struct ReplacementAccess {
    /// Cycle of the triggering cache.
    pub cycle: u64,
    /// CPU that issued the access.
    pub cpu: u32,
    /// Issuing instruction id.
    pub instr_id: u64,
    /// Program counter of the access.
    pub ip: u64,
    /// Full physical address.
    pub addr: u64,
    /// Request class.
    pub kind: RequestType,
}

/// Victim selection and metadata maintenance for one cache.
pub trait ReplacementPolicy {
    /// Chooses the way to evict from `set`. Every way in `blocks` is valid;
    /// the cache fills invalid ways itself before asking.
    fn find_victim(&mut self, set: usize, blocks: &[Block], access: &ReplacementAccess) -> usize;

    /// Observes an access outcome: a hit on `way`, or a fill into `way`
    /// that evicted `victim_addr`.
    fn update_state(
        &mut self,
        set: usize,
        way: usize,
        access: &ReplacementAccess,
        victim_addr: u64,
        hit: bool,
        obs: &SimObservation,
    );
}

/// Instantiates the configured policy for a cache of the given geometry.
pub fn build_policy(id: PolicyId, sets: usize, ways: usize) -> Box<dyn ReplacementPolicy> {
    match id {
        PolicyId::Lru => Box::new(LruPolicy::new(sets, ways)),
        PolicyId::Srrip => Box::new(SrripPolicy::new(sets, ways)),
        PolicyId::Drrip => Box::new(DrripPolicy::new(sets, ways)),
        PolicyId::Ship => Box::new(ShipPolicy::new(sets, ways)),
        PolicyId::Rlr => Box::new(RlrPolicy::new(sets, ways)),
        PolicyId::Bandit => Box::new(BanditPolicy::new(sets, ways)),
    }
}
