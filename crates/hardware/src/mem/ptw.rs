//! Page-table walker.
//!
//! Translation requests that miss the whole TLB hierarchy land here. The
//! walker models a synthetic multi-level page table: each level holds a
//! small direct-mapped walk cache of recently used intermediate entries,
//! and every level that misses its cache charges the per-level latency.
//! Physical pages are assigned to new virtual pages in ascending order by
//! the embedded [`VirtualMemory`] allocator, so translations are
//! deterministic across runs.

use std::collections::HashMap;
use std::collections::VecDeque;

use tracing::error;

use crate::channel::{ChannelId, Fabric, Packet, RequestType};
use crate::common::{LOG2_PAGE_SIZE, page_number, splice_page};
use crate::config::PtwConfig;
use crate::sim::clock::ClockDomain;

/// Bits of virtual page number consumed per walk level.
const LEVEL_BITS: u32 = 9;

/// Deterministic virtual-to-physical page assignment.
#[derive(Default)]
pub struct VirtualMemory {
    map: HashMap<u64, u64>,
    next_ppn: u64,
}

impl VirtualMemory {
    /// Creates an allocator whose first assigned physical page is 1.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            next_ppn: 1,
        }
    }

    /// Physical page number for a virtual page, allocating on first use.
    pub fn translate(&mut self, vpn: u64) -> u64 {
        if let Some(&ppn) = self.map.get(&vpn) {
            return ppn;
        }
        let ppn = self.next_ppn;
        self.next_ppn += 1;
        self.map.insert(vpn, ppn);
        ppn
    }
}

struct WalkCache {
    tags: Vec<Option<u64>>,
    mask: u64,
}

impl WalkCache {
    fn new(size: usize) -> Self {
        let size = size.next_power_of_two().max(1);
        Self {
            tags: vec![None; size],
            mask: size as u64 - 1,
        }
    }

    fn contains(&self, prefix: u64) -> bool {
        self.tags[(prefix & self.mask) as usize] == Some(prefix)
    }

    fn insert(&mut self, prefix: u64) {
        let idx = (prefix & self.mask) as usize;
        self.tags[idx] = Some(prefix);
    }
}

struct InflightWalk {
    packet: Packet,
    ready_cycle: u64,
    fill_level: u32,
}

/// The walker component.
pub struct Ptw {
    /// Display name for deadlock dumps.
    pub name: String,
    /// Component clock.
    pub clock: ClockDomain,
    upper: Vec<ChannelId>,
    levels: usize,
    level_latency: u64,
    walk_caches: Vec<WalkCache>,
    vmem: VirtualMemory,
    inflight: VecDeque<InflightWalk>,
}

impl Ptw {
    /// Builds a walker fed by the given upstream channels.
    pub fn new(name: &str, config: &PtwConfig, upper: Vec<ChannelId>) -> Self {
        let levels = config.levels.max(1);
        Self {
            name: name.to_string(),
            clock: ClockDomain::new(1.0),
            upper,
            levels,
            level_latency: config.level_latency,
            walk_caches: (0..levels).map(|_| WalkCache::new(config.cache_size)).collect(),
            vmem: VirtualMemory::new(),
            inflight: VecDeque::new(),
        }
    }

    /// One global tick.
    pub fn tick(&mut self, fabric: &mut Fabric) {
        if !self.clock.tick() {
            return;
        }
        self.operate(fabric);
        self.clock.advance();
    }

    fn operate(&mut self, fabric: &mut Fabric) {
        let now = self.clock.current_cycle;

        // Finished walks respond upstream.
        while self
            .inflight
            .front()
            .is_some_and(|walk| walk.ready_cycle <= now)
        {
            let walk = match self.inflight.pop_front() {
                Some(walk) => walk,
                None => break,
            };
            let vpn = page_number(walk.packet.v_address);
            let ppn = self.vmem.translate(vpn);
            let mut response = walk.packet;
            response.address = splice_page(ppn << LOG2_PAGE_SIZE, response.v_address);
            response.data = ppn << LOG2_PAGE_SIZE;
            response.is_translated = true;
            response.pf_metadata = walk.fill_level;
            let listeners = std::mem::take(&mut response.to_return);
            fabric.respond(&listeners, &response, now);
        }

        // Accept new translation requests.
        for i in 0..self.upper.len() {
            let upper = self.upper[i];
            while let Some(pkt) = fabric.get_mut(upper).rq.pop_front() {
                debug_assert!(
                    pkt.kind == RequestType::Translation,
                    "{}: non-translation request",
                    self.name
                );
                let (latency, fill_level) = self.walk_latency(page_number(pkt.v_address));
                self.inflight.push_back(InflightWalk {
                    packet: pkt,
                    ready_cycle: now + latency,
                    fill_level,
                });
            }
        }
    }

    /// Walks the levels, charging latency for every walk-cache miss.
    /// Returns the total latency and the deepest level that hit.
    fn walk_latency(&mut self, vpn: u64) -> (u64, u32) {
        let mut latency = 0;
        let mut fill_level = 0;
        for level in 0..self.levels {
            // Level 0 is the root: the widest prefix of the page number.
            let prefix_bits = LEVEL_BITS * (self.levels - 1 - level) as u32;
            let prefix = (vpn >> prefix_bits) | ((level as u64) << 58);
            if self.walk_caches[level].contains(prefix) {
                fill_level = level as u32;
            } else {
                latency += self.level_latency;
                self.walk_caches[level].insert(prefix);
            }
        }
        (latency.max(1), fill_level)
    }

    /// True while no walk has been stuck longer than `window`.
    pub fn healthy(&self, window: u64) -> bool {
        self.inflight
            .front()
            .is_none_or(|walk| self.clock.current_cycle.saturating_sub(walk.ready_cycle) < window)
    }

    /// Dumps the stuck state for the deadlock report.
    pub fn print_deadlock(&self) {
        error!(
            ptw = %self.name,
            cycle = self.clock.current_cycle,
            inflight = self.inflight.len(),
            "deadlocked walker state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::LOG2_BLOCK_SIZE;

    #[test]
    fn test_vmem_is_deterministic_and_stable() {
        let mut vmem = VirtualMemory::new();
        let a = vmem.translate(0x100);
        let b = vmem.translate(0x200);
        assert_ne!(a, b);
        assert_eq!(vmem.translate(0x100), a);
    }

    #[test]
    fn test_cold_walk_slower_than_warm_walk() {
        let mut fabric = Fabric::new();
        let link = fabric.add_channel(8, 8, 8, LOG2_BLOCK_SIZE, false);
        let mut ptw = Ptw::new(
            "PTW",
            &PtwConfig {
                levels: 4,
                cache_size: 16,
                level_latency: 10,
            },
            vec![link],
        );
        let (cold, _) = ptw.walk_latency(0xabcd);
        let (warm, level) = ptw.walk_latency(0xabcd);
        assert_eq!(cold, 40);
        assert_eq!(warm, 1);
        assert_eq!(level as usize, 3);
    }

    #[test]
    fn test_translation_request_round_trip() {
        let mut fabric = Fabric::new();
        let link = fabric.add_channel(8, 8, 8, LOG2_BLOCK_SIZE, false);
        let mut ptw = Ptw::new("PTW", &PtwConfig::default(), vec![link]);

        let pkt = Packet {
            address: 0xdeadbeef,
            v_address: 0xdeadbeef,
            kind: RequestType::Translation,
            to_return: vec![link],
            ..Packet::default()
        };
        fabric.get_mut(link).add_rq(pkt);

        for _ in 0..100 {
            ptw.tick(&mut fabric);
        }

        let response = fabric.get_mut(link).returned.pop_front().unwrap();
        assert!(response.is_translated);
        assert_eq!(response.v_address, 0xdeadbeef);
        // Offset preserved, page replaced by the allocator's assignment.
        assert_eq!(response.address & 0xfff, 0xeef);
        assert_ne!(response.address, 0xdeadbeef);
        assert_eq!(response.address & !0xfff, response.data);
    }
}
