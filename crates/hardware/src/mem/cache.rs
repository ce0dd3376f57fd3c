//! Generic set-associative cache with MSHRs and bounded per-cycle bandwidth.
//!
//! One component models every level of the hierarchy: L1I/L1D/L2/LLC and,
//! with page-granular offset bits and virtual tagging, the TLBs. Per cycle,
//! in order:
//! 1. Complete fills: responses from the lower level and pending direct
//!    fills, limited by the fill bandwidth.
//! 2. Drain translator responses and re-arm detoured requests.
//! 3. Tag-check up to `max_tag_check` ready queue entries (retried
//!    translations first, then WQ, RQ, PQ).
//! 4. Admit new requests from the upstream channels into the internal
//!    queues; admission stamps the tag-check readiness with the hit
//!    latency.
//! 5. Run the prefetcher's cycle hook.
//!
//! Write-queue semantics follow the queue's contract: full-line writebacks
//! (`wq_match_offset == false`) allocate directly with zero lower-level
//! traffic, partial stores convert misses into RFOs sent below.

use std::collections::VecDeque;

use tracing::error;

use crate::channel::{ChannelId, Fabric, Packet, RequestType};
use crate::common::error::ConfigError;
use crate::common::{page_number, splice_page};
use crate::config::{ActivateClass, CacheLevelConfig};
use crate::mem::SimObservation;
use crate::mem::prefetch::{DataPrefetcher, PrefetchSink, build_prefetcher};
use crate::mem::replacement::{ReplacementAccess, ReplacementPolicy, build_policy};
use crate::sim::clock::ClockDomain;
use crate::stats::{CacheStats, class_index};

/// One cache block.
#[derive(Clone, Debug, Default)]
pub struct Block {
    /// Block holds data.
    pub valid: bool,
    /// Block was modified and must be written back on eviction.
    pub dirty: bool,
    /// Block was installed by a prefetch and not yet demanded.
    pub prefetch: bool,
    /// Physical address of the block.
    pub address: u64,
    /// Virtual address of the block.
    pub v_address: u64,
    /// PC of the access that filled the block.
    pub ip: u64,
    /// Payload slot (translated page base for TLB levels).
    pub data: u64,
    /// Cycle of the last touch.
    pub last_access: u64,
}

/// An outstanding miss.
struct MshrEntry {
    packet: Packet,
}

enum TagCheckOutcome {
    Done,
    Blocked(Packet),
}

#[derive(Clone, Copy)]
enum QueueKind {
    Wq,
    Rq,
    Pq,
}

/// The prefetcher's window into its cache.
struct QueueSink<'a> {
    pq: &'a mut VecDeque<Packet>,
    pq_size: usize,
    stats: &'a mut CacheStats,
    cycle: u64,
    ready_cycle: u64,
}

impl PrefetchSink for QueueSink<'_> {
    fn pq_free(&self) -> usize {
        self.pq_size.saturating_sub(self.pq.len())
    }

    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn prefetch_line(
        &mut self,
        ip: u64,
        _base_addr: u64,
        pf_addr: u64,
        fill_this_level: bool,
        metadata: u32,
    ) -> bool {
        self.stats.pf_requested += 1;
        if self.pq.len() >= self.pq_size {
            return false;
        }
        self.pq.push_back(Packet {
            address: pf_addr,
            v_address: pf_addr,
            is_translated: true,
            kind: RequestType::Prefetch,
            ip,
            fill_this_level,
            prefetch_from_this: true,
            pf_metadata: metadata,
            issue_cycle: self.cycle,
            event_cycle: self.ready_cycle,
            ..Packet::default()
        });
        self.stats.pf_issued += 1;
        true
    }
}

/// A set-associative cache level.
pub struct Cache {
    /// Display name for reports and deadlock dumps.
    pub name: String,
    /// Component clock.
    pub clock: ClockDomain,

    sets: usize,
    ways: usize,
    offset_bits: u32,
    virtual_tag: bool,
    wq_match_offset: bool,
    hit_latency: u64,
    fill_latency: u64,
    max_tag_check: usize,
    fill_bandwidth: usize,
    mshr_size: usize,
    rq_size: usize,
    wq_size: usize,
    pq_size: usize,
    activate_mask: [bool; crate::stats::NUM_ACCESS_CLASSES],

    blocks: Vec<Block>,
    rq: VecDeque<Packet>,
    wq: VecDeque<Packet>,
    pq: VecDeque<Packet>,
    retry: VecDeque<(Packet, QueueKind)>,
    translation_stash: Vec<(Packet, QueueKind)>,
    mshr: Vec<MshrEntry>,
    pending_fill: VecDeque<Packet>,
    fill_budget: usize,

    upper: Vec<ChannelId>,
    lower: ChannelId,
    translator: Option<ChannelId>,

    replacement: Box<dyn ReplacementPolicy>,
    prefetcher: Box<dyn DataPrefetcher>,

    /// Counters for the current phase.
    pub stats: CacheStats,
    last_progress_cycle: u64,
}

impl Cache {
    /// Builds a cache level.
    ///
    /// # Errors
    ///
    /// Fails on zero sizes, a non-power-of-two set count, or a missing
    /// lower level.
    pub fn new(
        name: &str,
        config: &CacheLevelConfig,
        upper: Vec<ChannelId>,
        translator: Option<ChannelId>,
        lower: Option<ChannelId>,
    ) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("sets", config.sets),
            ("ways", config.ways),
            ("rq_size", config.rq_size),
            ("mshr_size", config.mshr_size),
            ("max_tag_check", config.max_tag_check),
            ("fill_bandwidth", config.fill_bandwidth),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroSize {
                    component: name.to_string(),
                    field,
                });
            }
        }
        if !config.sets.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                component: name.to_string(),
                field: "sets",
                value: config.sets,
            });
        }
        let lower = lower.ok_or_else(|| ConfigError::MissingLowerLevel {
            component: name.to_string(),
        })?;

        let mut activate_mask = [false; crate::stats::NUM_ACCESS_CLASSES];
        for class in &config.prefetch_activate {
            let kind = match class {
                ActivateClass::Load => RequestType::Load,
                ActivateClass::Rfo => RequestType::Rfo,
                ActivateClass::Prefetch => RequestType::Prefetch,
                ActivateClass::Write => RequestType::Write,
                ActivateClass::Translation => RequestType::Translation,
            };
            activate_mask[class_index(kind)] = true;
        }

        Ok(Self {
            name: name.to_string(),
            clock: ClockDomain::new(config.frequency_scale),
            sets: config.sets,
            ways: config.ways,
            offset_bits: config.offset_bits,
            virtual_tag: config.virtual_tag,
            wq_match_offset: config.wq_match_offset,
            hit_latency: config.hit_latency,
            fill_latency: config.fill_latency,
            max_tag_check: config.max_tag_check,
            fill_bandwidth: config.fill_bandwidth,
            mshr_size: config.mshr_size,
            rq_size: config.rq_size,
            wq_size: config.wq_size,
            pq_size: config.pq_size,
            activate_mask,
            blocks: vec![Block::default(); config.sets * config.ways],
            rq: VecDeque::new(),
            wq: VecDeque::new(),
            pq: VecDeque::new(),
            retry: VecDeque::new(),
            translation_stash: Vec::new(),
            mshr: Vec::new(),
            pending_fill: VecDeque::new(),
            fill_budget: 0,
            upper,
            lower,
            translator,
            replacement: build_policy(config.replacement, config.sets, config.ways),
            prefetcher: build_prefetcher(config.prefetcher),
            stats: CacheStats::default(),
            last_progress_cycle: 0,
        })
    }

    /// Runs the prefetcher's one-time hook.
    pub fn initialize(&mut self) {
        self.prefetcher.initialize();
    }

    /// Resets the phase counters.
    pub fn begin_phase(&mut self) {
        self.stats = CacheStats::default();
    }

    /// Returns the phase counters.
    pub fn end_phase(&mut self) -> CacheStats {
        self.stats.clone()
    }

    /// Runs the prefetcher's end-of-run hook.
    pub fn finalize(&mut self) {
        self.prefetcher.final_stats();
    }

    /// MSHR occupancy, for tests and deadlock reporting.
    pub fn mshr_occupancy(&self) -> usize {
        self.mshr.len()
    }

    fn tag_source(&self, pkt: &Packet) -> u64 {
        if self.virtual_tag {
            pkt.v_address
        } else {
            pkt.address
        }
    }

    fn block_tag(&self, block: &Block) -> u64 {
        if self.virtual_tag {
            block.v_address
        } else {
            block.address
        }
    }

    fn set_of(&self, addr: u64) -> usize {
        ((addr >> self.offset_bits) as usize) & (self.sets - 1)
    }

    fn match_block(&self, addr: u64, set: usize) -> Option<usize> {
        let base = set * self.ways;
        (0..self.ways).find(|&way| {
            let block = &self.blocks[base + way];
            block.valid && self.block_tag(block) >> self.offset_bits == addr >> self.offset_bits
        })
    }

    fn mshr_find(&self, addr: u64) -> Option<usize> {
        self.mshr
            .iter()
            .position(|e| e.packet.address >> self.offset_bits == addr >> self.offset_bits)
    }

    fn access_of(&self, pkt: &Packet) -> ReplacementAccess {
        ReplacementAccess {
            cycle: self.clock.current_cycle,
            cpu: pkt.cpu,
            instr_id: pkt.instr_id,
            ip: pkt.ip,
            addr: pkt.address,
            kind: pkt.kind,
        }
    }

    fn tag_ready_cycle(&self) -> u64 {
        if self.clock.warmup {
            self.clock.current_cycle
        } else {
            self.clock.current_cycle + self.hit_latency
        }
    }

    /// One global tick.
    pub fn tick(&mut self, fabric: &mut Fabric, obs: &SimObservation) {
        if !self.clock.tick() {
            return;
        }
        self.operate(fabric, obs);
        self.clock.advance();
    }

    fn operate(&mut self, fabric: &mut Fabric, obs: &SimObservation) {
        self.fill_budget = self.fill_bandwidth;
        self.handle_fills(fabric, obs);
        self.handle_translation_returns(fabric);
        self.handle_tag_checks(fabric, obs);
        self.admit_upstream(fabric);
        self.cycle_prefetcher();
    }

    /// Step 1: complete fills, bounded by the fill bandwidth.
    fn handle_fills(&mut self, fabric: &mut Fabric, obs: &SimObservation) {
        while self.fill_budget > 0 {
            let now = self.clock.current_cycle;
            let arrived = fabric
                .get(self.lower)
                .returned
                .front()
                .is_some_and(|p| p.return_cycle <= now);
            if !arrived {
                break;
            }
            let Some(response) = fabric.get_mut(self.lower).returned.pop_front() else {
                break;
            };
            // Translation responses come back with a physical address; the
            // outstanding entry is keyed by the virtual page it asked about.
            let found = if response.kind == RequestType::Translation {
                self.mshr.iter().position(|e| {
                    page_number(e.packet.v_address) == page_number(response.v_address)
                })
            } else {
                self.mshr_find(response.address)
            };
            let Some(index) = found else {
                // A coalesced duplicate already filled this block.
                continue;
            };
            let mut pkt = self.mshr.swap_remove(index).packet;
            pkt.address = response.address;
            pkt.data = response.data;
            if pkt.kind == RequestType::Translation {
                pkt.is_translated = true;
            }
            if !self.fill_block(fabric, obs, pkt) {
                break;
            }
            self.last_progress_cycle = self.clock.current_cycle;
        }

        while self.fill_budget > 0 {
            let Some(pkt) = self.pending_fill.pop_front() else {
                break;
            };
            if !self.fill_block(fabric, obs, pkt) {
                break;
            }
        }
    }

    /// Installs one block, evicting as needed, and notifies the listeners.
    /// Returns false when the fill stalled on a full lower write queue.
    fn fill_block(&mut self, fabric: &mut Fabric, obs: &SimObservation, pkt: Packet) -> bool {
        let now = self.clock.current_cycle;
        let set = self.set_of(self.tag_source(&pkt));
        let base = set * self.ways;

        let way = (0..self.ways)
            .find(|&w| !self.blocks[base + w].valid)
            .unwrap_or_else(|| {
                let access = self.access_of(&pkt);
                let way = self
                    .replacement
                    .find_victim(set, &self.blocks[base..base + self.ways], &access);
                assert!(way < self.ways, "{}: victim way out of range", self.name);
                way
            });

        let victim = self.blocks[base + way].clone();
        if victim.valid && victim.dirty {
            let wb = Packet {
                address: victim.address,
                v_address: victim.v_address,
                is_translated: true,
                kind: RequestType::Writeback,
                ip: victim.ip,
                issue_cycle: now,
                ..Packet::default()
            };
            if !fabric.get_mut(self.lower).add_wq(wb).is_accepted() {
                self.pending_fill.push_front(pkt);
                return false;
            }
            self.stats.writebacks_sent += 1;
        }

        let evicted_addr = if victim.valid { victim.address } else { 0 };
        let prefetch_fill = pkt.kind == RequestType::Prefetch;
        if prefetch_fill {
            self.stats.pf_fill += 1;
        }

        let ready_cycle = self.tag_ready_cycle();
        let mut sink = QueueSink {
            pq: &mut self.pq,
            pq_size: self.pq_size,
            stats: &mut self.stats,
            cycle: now,
            ready_cycle,
        };
        let metadata = self.prefetcher.cache_fill(
            pkt.address,
            set,
            way,
            prefetch_fill,
            evicted_addr,
            pkt.pf_metadata,
            &mut sink,
        );

        self.blocks[base + way] = Block {
            valid: true,
            dirty: matches!(
                pkt.kind,
                RequestType::Write | RequestType::Writeback | RequestType::Rfo
            ),
            prefetch: prefetch_fill,
            address: pkt.address,
            v_address: pkt.v_address,
            ip: pkt.ip,
            data: pkt.data,
            last_access: now,
        };

        let access = self.access_of(&pkt);
        self.replacement
            .update_state(set, way, &access, evicted_addr, false, obs);

        let mut response = pkt.clone();
        response.pf_metadata = metadata;
        fabric.respond(&pkt.to_return, &response, now + self.fill_latency);

        self.fill_budget -= 1;
        true
    }

    /// Step 2: drain translator responses; every stashed request on the
    /// translated page re-enters tag lookup this cycle.
    fn handle_translation_returns(&mut self, fabric: &mut Fabric) {
        let Some(translator) = self.translator else {
            return;
        };
        let now = self.clock.current_cycle;
        while fabric
            .get(translator)
            .returned
            .front()
            .is_some_and(|p| p.return_cycle <= now)
        {
            let Some(response) = fabric.get_mut(translator).returned.pop_front() else {
                break;
            };
            let page = page_number(response.v_address);
            let mut stashed = Vec::new();
            self.translation_stash.retain(|(entry, kind)| {
                if page_number(entry.v_address) == page {
                    stashed.push((entry.clone(), *kind));
                    false
                } else {
                    true
                }
            });
            for (mut entry, kind) in stashed {
                entry.address = splice_page(response.address, entry.v_address);
                entry.is_translated = true;
                self.retry.push_back((entry, kind));
            }
        }
    }

    /// Step 3: up to `max_tag_check` lookups against ready queue heads.
    fn handle_tag_checks(&mut self, fabric: &mut Fabric, obs: &SimObservation) {
        let mut budget = self.max_tag_check;

        while budget > 0 {
            let Some((pkt, kind)) = self.retry.pop_front() else {
                break;
            };
            budget -= 1;
            if let TagCheckOutcome::Blocked(pkt) = self.tag_check(fabric, obs, pkt, kind) {
                self.retry.push_front((pkt, kind));
                break;
            }
        }

        for kind in [QueueKind::Wq, QueueKind::Rq, QueueKind::Pq] {
            while budget > 0 {
                let now = self.clock.current_cycle;
                let queue = match kind {
                    QueueKind::Wq => &mut self.wq,
                    QueueKind::Rq => &mut self.rq,
                    QueueKind::Pq => &mut self.pq,
                };
                let ready = queue.front().is_some_and(|p| p.event_cycle <= now);
                if !ready {
                    break;
                }
                let pkt = match queue.pop_front() {
                    Some(pkt) => pkt,
                    None => break,
                };
                budget -= 1;
                let outcome = match kind {
                    QueueKind::Wq => self.tag_check(fabric, obs, pkt, QueueKind::Wq),
                    QueueKind::Rq => self.tag_check(fabric, obs, pkt, QueueKind::Rq),
                    QueueKind::Pq => self.tag_check(fabric, obs, pkt, QueueKind::Pq),
                };
                if let TagCheckOutcome::Blocked(pkt) = outcome {
                    let queue = match kind {
                        QueueKind::Wq => &mut self.wq,
                        QueueKind::Rq => &mut self.rq,
                        QueueKind::Pq => &mut self.pq,
                    };
                    queue.push_front(pkt);
                    budget = 0;
                }
            }
        }
    }

    fn tag_check(
        &mut self,
        fabric: &mut Fabric,
        obs: &SimObservation,
        mut pkt: Packet,
        source: QueueKind,
    ) -> TagCheckOutcome {
        let now = self.clock.current_cycle;

        // Untranslated requests detour through the translator side channel.
        if !pkt.is_translated {
            if let Some(translator) = self.translator {
                let request = Packet {
                    address: pkt.v_address,
                    v_address: pkt.v_address,
                    is_translated: false,
                    kind: RequestType::Translation,
                    cpu: pkt.cpu,
                    instr_id: pkt.instr_id,
                    ip: pkt.ip,
                    to_return: vec![translator],
                    issue_cycle: now,
                    ..Packet::default()
                };
                if !fabric.get_mut(translator).add_rq(request).is_accepted() {
                    return TagCheckOutcome::Blocked(pkt);
                }
                self.translation_stash.push((pkt, source));
                return TagCheckOutcome::Done;
            }
        }

        let class = class_index(pkt.kind);
        let set = self.set_of(self.tag_source(&pkt));

        if let Some(way) = self.match_block(self.tag_source(&pkt), set) {
            self.stats.hits[class] += 1;
            self.last_progress_cycle = now;
            let base = set * self.ways;

            let mut useful_prefetch = false;
            if self.blocks[base + way].prefetch && pkt.kind != RequestType::Prefetch {
                self.blocks[base + way].prefetch = false;
                self.stats.pf_useful += 1;
                useful_prefetch = true;
            }

            if self.activate_mask[class] && !pkt.prefetch_from_this {
                let ready_cycle = self.tag_ready_cycle();
                let mut sink = QueueSink {
                    pq: &mut self.pq,
                    pq_size: self.pq_size,
                    stats: &mut self.stats,
                    cycle: now,
                    ready_cycle,
                };
                pkt.pf_metadata = self.prefetcher.cache_operate(
                    pkt.address,
                    pkt.ip,
                    true,
                    useful_prefetch,
                    pkt.kind,
                    pkt.pf_metadata,
                    &mut sink,
                );
            }

            if matches!(pkt.kind, RequestType::Write | RequestType::Writeback) {
                self.blocks[base + way].dirty = true;
            }
            self.blocks[base + way].last_access = now;

            let access = self.access_of(&pkt);
            self.replacement.update_state(set, way, &access, 0, true, obs);

            let mut response = pkt.clone();
            if pkt.kind == RequestType::Translation {
                response.data = self.blocks[base + way].data;
                response.address = splice_page(self.blocks[base + way].data, pkt.v_address);
                response.is_translated = true;
            }
            fabric.respond(&pkt.to_return, &response, now);
            return TagCheckOutcome::Done;
        }

        // Miss.
        self.stats.misses[class] += 1;

        if self.activate_mask[class] && !pkt.prefetch_from_this {
            let ready_cycle = self.tag_ready_cycle();
            let mut sink = QueueSink {
                pq: &mut self.pq,
                pq_size: self.pq_size,
                stats: &mut self.stats,
                cycle: now,
                ready_cycle,
            };
            pkt.pf_metadata = self.prefetcher.cache_operate(
                pkt.address,
                pkt.ip,
                false,
                false,
                pkt.kind,
                pkt.pf_metadata,
                &mut sink,
            );
        }

        let is_write_queue = matches!(source, QueueKind::Wq);
        if is_write_queue && !self.wq_match_offset {
            // Full-line writeback: allocate directly, nothing goes below.
            if self.fill_budget > 0 {
                if !self.fill_block(fabric, obs, pkt) {
                    return TagCheckOutcome::Done; // parked in pending_fill
                }
            } else {
                self.pending_fill.push_back(pkt);
            }
            return TagCheckOutcome::Done;
        }
        if is_write_queue {
            // Partial store: fetch ownership of the line first.
            pkt.kind = RequestType::Rfo;
        }

        match self.mshr_find(pkt.address) {
            Some(index) => {
                let entry = &mut self.mshr[index].packet;
                for ret in &pkt.to_return {
                    if !entry.to_return.contains(ret) {
                        entry.to_return.push(*ret);
                    }
                }
                entry.instr_id = entry.instr_id.min(pkt.instr_id);
                self.stats.mshr_merges += 1;
                TagCheckOutcome::Done
            }
            None => {
                if self.mshr.len() >= self.mshr_size {
                    return TagCheckOutcome::Blocked(pkt);
                }
                let mut downstream = pkt.clone();
                downstream.to_return = vec![self.lower];
                downstream.issue_cycle = now;
                downstream.event_cycle = 0;
                // The lower level sees this as an ordinary upstream prefetch.
                downstream.prefetch_from_this = false;
                let channel = fabric.get_mut(self.lower);
                let accepted = if pkt.kind == RequestType::Prefetch {
                    channel.add_pq(downstream)
                } else {
                    channel.add_rq(downstream)
                };
                if !accepted.is_accepted() {
                    return TagCheckOutcome::Blocked(pkt);
                }
                let mut entry = pkt;
                entry.event_cycle = now;
                self.mshr.push(MshrEntry { packet: entry });
                assert!(
                    self.mshr.len() <= self.mshr_size,
                    "{}: MSHR overflow",
                    self.name
                );
                TagCheckOutcome::Done
            }
        }
    }

    /// Step 4: admit from the upstream channels into the internal queues.
    fn admit_upstream(&mut self, fabric: &mut Fabric) {
        let ready = self.tag_ready_cycle();
        for &upper in &self.upper {
            let channel = fabric.get_mut(upper);
            while self.wq.len() < self.wq_size {
                let Some(mut pkt) = channel.wq.pop_front() else {
                    break;
                };
                pkt.event_cycle = ready;
                self.wq.push_back(pkt);
            }
            while self.rq.len() < self.rq_size {
                let Some(mut pkt) = channel.rq.pop_front() else {
                    break;
                };
                pkt.event_cycle = ready;
                self.rq.push_back(pkt);
            }
            while self.pq.len() < self.pq_size {
                let Some(mut pkt) = channel.pq.pop_front() else {
                    break;
                };
                pkt.event_cycle = ready;
                self.pq.push_back(pkt);
            }
        }
    }

    /// Step 5: the prefetcher's per-cycle hook.
    fn cycle_prefetcher(&mut self) {
        let ready_cycle = self.tag_ready_cycle();
        let mut sink = QueueSink {
            pq: &mut self.pq,
            pq_size: self.pq_size,
            stats: &mut self.stats,
            cycle: self.clock.current_cycle,
            ready_cycle,
        };
        self.prefetcher.cycle_operate(&mut sink);
    }

    /// True if the oldest outstanding miss has advanced within `window`.
    pub fn healthy(&self, window: u64) -> bool {
        self.mshr
            .iter()
            .all(|e| self.clock.current_cycle.saturating_sub(e.packet.event_cycle) < window)
            || self.last_progress_cycle + window > self.clock.current_cycle
    }

    /// Dumps the stuck state for the deadlock report.
    pub fn print_deadlock(&self) {
        error!(
            cache = %self.name,
            cycle = self.clock.current_cycle,
            mshr = self.mshr.len(),
            rq = self.rq.len(),
            wq = self.wq.len(),
            pq = self.pq.len(),
            stash = self.translation_stash.len(),
            "deadlocked cache state"
        );
        for entry in &self.mshr {
            error!(
                cache = %self.name,
                address = format_args!("{:#x}", entry.packet.address),
                kind = ?entry.packet.kind,
                since = entry.packet.event_cycle,
                "outstanding MSHR entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::LOG2_BLOCK_SIZE;
    use crate::config::CacheLevelConfig;

    fn test_config() -> CacheLevelConfig {
        CacheLevelConfig {
            sets: 1,
            ways: 8,
            rq_size: 32,
            wq_size: 32,
            pq_size: 16,
            mshr_size: 8,
            hit_latency: 4,
            fill_latency: 1,
            max_tag_check: 10,
            fill_bandwidth: 2,
            ..CacheLevelConfig::default_l2()
        }
    }

    struct Rig {
        fabric: Fabric,
        cache: Cache,
        upper: ChannelId,
        lower: ChannelId,
        obs: SimObservation,
    }

    impl Rig {
        fn new(config: &CacheLevelConfig) -> Self {
            let mut fabric = Fabric::new();
            let upper = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
            let lower = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
            let mut cache = Cache::new("uut", config, vec![upper], None, Some(lower))
                .unwrap();
            cache.clock.warmup = false;
            Self {
                fabric,
                cache,
                upper,
                lower,
                obs: SimObservation::default(),
            }
        }

        fn tick(&mut self) {
            self.cache.tick(&mut self.fabric, &self.obs);
        }
    }

    fn load(addr: u64, ret: ChannelId) -> Packet {
        Packet {
            address: addr,
            v_address: addr,
            is_translated: true,
            kind: RequestType::Load,
            to_return: vec![ret],
            ..Packet::default()
        }
    }

    #[test]
    fn test_miss_goes_downstream_once_and_merges() {
        let mut rig = Rig::new(&test_config());
        let upper = rig.upper;
        // Two loads to the same block, issued on consecutive cycles.
        assert!(rig.fabric.get_mut(upper).add_rq(load(0x1000, upper)).is_accepted());
        rig.tick();
        assert!(rig.fabric.get_mut(upper).add_rq(load(0x1008, upper)).is_accepted());
        for _ in 0..10 {
            rig.tick();
        }
        // One downstream packet, one MSHR entry, one merge.
        assert_eq!(rig.fabric.get(rig.lower).rq.occupancy(), 1);
        assert_eq!(rig.cache.mshr_occupancy(), 1);
        assert_eq!(rig.cache.stats.mshr_merges, 1);
    }

    #[test]
    fn test_hit_responds_after_hit_latency() {
        let mut rig = Rig::new(&test_config());
        let upper = rig.upper;
        // Warm the block by filling through the lower level.
        rig.fabric.get_mut(upper).add_rq(load(0x2000, upper));
        for _ in 0..8 {
            rig.tick();
        }
        let lower = rig.lower;
        let request = rig.fabric.get_mut(lower).rq.pop_front().unwrap();
        let mut response = request.clone();
        response.to_return.clear();
        rig.fabric.get_mut(lower).returned.push_back(response);
        for _ in 0..4 {
            rig.tick();
        }
        // Drain the fill response.
        let fill_response = rig.fabric.get_mut(upper).returned.pop_front().unwrap();
        assert_eq!(fill_response.address, 0x2000);

        // Now a hit: issued at cache cycle `start`, served at start + hit.
        let start = rig.cache.clock.current_cycle;
        rig.fabric.get_mut(upper).add_rq(load(0x2000, upper));
        for _ in 0..8 {
            rig.tick();
        }
        let hit_response = rig.fabric.get_mut(upper).returned.pop_front().unwrap();
        assert_eq!(hit_response.return_cycle, start + 4);
        assert_eq!(rig.cache.stats.hits[0], 1);
    }

    #[test]
    fn test_mshr_bounded() {
        let mut config = test_config();
        config.mshr_size = 2;
        config.sets = 4;
        let mut rig = Rig::new(&config);
        let upper = rig.upper;
        for i in 0..6u64 {
            rig.fabric
                .get_mut(upper)
                .add_rq(load(0x4000 + i * 64, upper));
        }
        for _ in 0..20 {
            rig.tick();
        }
        assert_eq!(rig.cache.mshr_occupancy(), 2);
        assert_eq!(rig.fabric.get(rig.lower).rq.occupancy(), 2);
    }
}
