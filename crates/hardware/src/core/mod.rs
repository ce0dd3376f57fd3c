//! The out-of-order pipeline.
//!
//! Per cycle the stages run back-to-front, so an item moves through at most
//! one stage per cycle and the stage buffers behave like pipeline
//! registers:
//! retire → complete → execute → schedule → dispatch → decode → promote →
//! fetch → translate-fetch → DIB check → trace ingestion.
//!
//! A mispredicted branch is discovered at ingestion (the trace carries the
//! ground truth) and stalls further ingestion; the penalty is modeled as a
//! fetch bubble that ends `mispredict_penalty` cycles after the branch
//! retires. Instructions already in flight behind the branch drain
//! normally.

/// Branch predictors and the BTB.
pub mod bru;

/// Decoded instruction buffer.
pub mod dib;

/// Instruction model and branch classification.
pub mod instr;

/// Load and store queues.
pub mod lsq;

use std::collections::VecDeque;

use tracing::error;

use crate::channel::delay::DelayQueue;
use crate::channel::ring::RingBuffer;
use crate::channel::{ChannelId, Fabric, Packet, RequestType};
use crate::common::{BLOCK_SIZE, block_number, page_number, splice_page};
use crate::config::{CoreConfig, InstructionPrefetcher};
use crate::core::bru::BranchUnit;
use crate::core::dib::Dib;
use crate::core::instr::{Instruction, Progress};
use crate::core::lsq::{LsqEntry, SlotArena};
use crate::sim::clock::ClockDomain;
use crate::sim::trace::TraceSource;
use crate::stats::CoreStats;

/// The four channels a core produces requests on.
#[derive(Clone, Copy, Debug)]
pub struct CoreBuses {
    /// Instruction TLB link.
    pub itlb: ChannelId,
    /// Data TLB link.
    pub dtlb: ChannelId,
    /// L1 instruction cache link.
    pub l1i: ChannelId,
    /// L1 data cache link.
    pub l1d: ChannelId,
}

/// One out-of-order core.
pub struct Core {
    /// CPU id.
    pub cpu: u32,
    /// Display name for reports.
    pub name: String,
    /// Component clock.
    pub clock: ClockDomain,

    config: CoreConfig,
    buses: CoreBuses,

    ifetch_buffer: RingBuffer<Instruction>,
    decode_buffer: DelayQueue<Instruction>,
    dispatch_buffer: DelayQueue<Instruction>,
    rob: RingBuffer<Instruction>,
    lq: SlotArena,
    sq: SlotArena,

    ready_to_execute: VecDeque<usize>,
    rtl0: VecDeque<usize>,
    rtl1: VecDeque<usize>,
    rts0: VecDeque<usize>,

    dib: Dib,
    branch_unit: BranchUnit,
    code_prefetch: bool,

    instr_unique_id: u64,
    last_retired_id: u64,
    /// Instructions retired since construction.
    pub num_retired: u64,
    fetch_stall: bool,
    fetch_resume_cycle: u64,
    /// The trace source ran dry and cannot replay.
    pub trace_exhausted: bool,
    replay_trace: bool,

    /// Counters for the current phase.
    pub stats: CoreStats,
    last_retire_cycle: u64,
}

impl Core {
    /// Builds a core with the given id, pipeline configuration, and buses.
    pub fn new(cpu: u32, config: &CoreConfig, buses: CoreBuses, replay_trace: bool) -> Self {
        Self {
            cpu,
            name: format!("cpu{cpu}"),
            clock: ClockDomain::new(config.frequency_scale),
            buses,
            ifetch_buffer: RingBuffer::new(config.ifetch_buffer_size),
            decode_buffer: DelayQueue::new(config.decode_buffer_size, config.decode_latency),
            dispatch_buffer: DelayQueue::new(config.dispatch_buffer_size, config.dispatch_latency),
            rob: RingBuffer::new(config.rob_size),
            lq: SlotArena::new(config.lq_size),
            sq: SlotArena::new(config.sq_size),
            ready_to_execute: VecDeque::new(),
            rtl0: VecDeque::new(),
            rtl1: VecDeque::new(),
            rts0: VecDeque::new(),
            dib: Dib::new(config.dib_sets, config.dib_ways, config.dib_window),
            branch_unit: BranchUnit::new(config),
            code_prefetch: config.instruction_prefetcher == InstructionPrefetcher::NextLine,
            instr_unique_id: 0,
            last_retired_id: 0,
            num_retired: 0,
            fetch_stall: false,
            fetch_resume_cycle: 0,
            trace_exhausted: false,
            replay_trace,
            config: config.clone(),
            stats: CoreStats::default(),
            last_retire_cycle: 0,
        }
    }

    /// Resets the phase counters.
    pub fn begin_phase(&mut self) {
        self.stats = CoreStats::default();
    }

    /// Returns the phase counters.
    pub fn end_phase(&mut self) -> CoreStats {
        self.stats.clone()
    }

    /// ROB occupancy, for reports and tests.
    pub fn rob_occupancy(&self) -> usize {
        self.rob.occupancy()
    }

    /// One global tick.
    pub fn tick(&mut self, fabric: &mut Fabric, trace: &mut dyn TraceSource) {
        if !self.clock.tick() {
            return;
        }
        self.operate(fabric, trace);
        self.clock.advance();
    }

    fn operate(&mut self, fabric: &mut Fabric, trace: &mut dyn TraceSource) {
        self.stats.cycles += 1;
        self.handle_memory_returns(fabric);
        self.retire_rob(fabric);
        self.complete_inflight_instructions();
        self.execute_memory_instructions(fabric);
        self.execute_instructions();
        self.schedule_memory_instructions();
        self.schedule_instructions();
        self.dispatch_instructions();
        self.decode_instructions();
        self.promote_to_decode();
        self.fetch_instructions(fabric);
        self.translate_fetch(fabric);
        self.check_dib();
        self.init_instructions(trace);
    }

    // ── responses ──

    fn drain_ready(fabric: &mut Fabric, bus: ChannelId, now: u64) -> Vec<Packet> {
        let mut drained = Vec::new();
        let channel = fabric.get_mut(bus);
        while channel
            .returned
            .front()
            .is_some_and(|p| p.return_cycle <= now)
        {
            if let Some(pkt) = channel.returned.pop_front() {
                drained.push(pkt);
            }
        }
        drained
    }

    fn handle_memory_returns(&mut self, fabric: &mut Fabric) {
        let now = self.clock.current_cycle;

        for response in Self::drain_ready(fabric, self.buses.itlb, now) {
            let page = page_number(response.v_address);
            for slot in self.ifetch_buffer.slots_in_order() {
                if let Some(instr) = self.ifetch_buffer.get_mut(slot) {
                    if instr.translated == Progress::InFlight && page_number(instr.ip) == page {
                        instr.physical_ip = splice_page(response.address, instr.ip);
                        instr.translated = Progress::Completed;
                    }
                }
            }
        }

        for response in Self::drain_ready(fabric, self.buses.l1i, now) {
            let block = block_number(response.v_address);
            for slot in self.ifetch_buffer.slots_in_order() {
                if let Some(instr) = self.ifetch_buffer.get_mut(slot) {
                    if instr.fetched == Progress::InFlight && block_number(instr.ip) == block {
                        instr.fetched = Progress::Completed;
                    }
                }
            }
        }

        for response in Self::drain_ready(fabric, self.buses.dtlb, now) {
            let page = page_number(response.v_address);

            let mut ready_loads = Vec::new();
            for (slot, entry) in self.lq.iter_mut() {
                if entry.translated == Progress::InFlight && page_number(entry.v_address) == page {
                    entry.p_address = splice_page(response.address, entry.v_address);
                    entry.translated = Progress::Completed;
                    ready_loads.push(slot);
                }
            }
            self.rtl1.extend(ready_loads);

            let mut finished_stores = Vec::new();
            for (slot, entry) in self.sq.iter_mut() {
                if entry.translated == Progress::InFlight && page_number(entry.v_address) == page {
                    entry.p_address = splice_page(response.address, entry.v_address);
                    entry.translated = Progress::Completed;
                    entry.event_cycle = now;
                    finished_stores.push((slot, entry.instr_id, entry.rob_slot));
                }
            }
            for (sq_slot, sq_id, rob_slot) in finished_stores {
                if let Some(owner) = self.rob.get_mut(rob_slot) {
                    owner.completed_mem_ops += 1;
                }
                self.forward_store(sq_slot, sq_id);
            }
        }

        for response in Self::drain_ready(fabric, self.buses.l1d, now) {
            let block = block_number(response.address);
            let finished: Vec<usize> = self
                .lq
                .iter()
                .filter(|(_, e)| {
                    e.fetched == Progress::InFlight && block_number(e.p_address) == block
                })
                .map(|(slot, _)| slot)
                .collect();
            for slot in finished {
                self.complete_load(slot);
            }
        }
    }

    /// Store-to-load forwarding: completes every waiting load that named
    /// this store as its producer.
    fn forward_store(&mut self, sq_slot: usize, sq_id: u64) {
        let waiting: Vec<usize> = self
            .lq
            .iter()
            .filter(|(_, e)| {
                e.producer == Some((sq_slot, sq_id)) && e.fetched == Progress::NotStarted
            })
            .map(|(slot, _)| slot)
            .collect();
        for slot in waiting {
            self.complete_load(slot);
        }
    }

    fn complete_load(&mut self, lq_slot: usize) {
        if let Some(entry) = self.lq.release(lq_slot) {
            if let Some(owner) = self.rob.get_mut(entry.rob_slot) {
                owner.completed_mem_ops += 1;
                owner.lq_slots.retain(|&s| s != lq_slot);
            }
        }
    }

    // ── retire / complete ──

    fn retire_rob(&mut self, fabric: &mut Fabric) {
        let now = self.clock.current_cycle;
        let mut retired = 0;
        while retired < self.config.retire_width {
            let Some(head) = self.rob.front() else { break };
            if !head.executed {
                break;
            }

            // Drain the owned stores into the L1D as writes.
            let sq_slots = head.sq_slots.clone();
            let (cpu, instr_id, ip) = (self.cpu, head.instr_id, head.ip);
            let mut stalled = false;
            for &slot in &sq_slots {
                let Some(entry) = self.sq.get(slot) else {
                    continue;
                };
                let write = Packet {
                    address: entry.p_address,
                    v_address: entry.v_address,
                    is_translated: true,
                    kind: RequestType::Write,
                    cpu,
                    instr_id,
                    ip,
                    issue_cycle: now,
                    ..Packet::default()
                };
                if fabric.get_mut(self.buses.l1d).add_wq(write).is_accepted() {
                    self.sq.release(slot);
                } else {
                    stalled = true;
                    break;
                }
            }
            if stalled {
                break;
            }

            let Some(instr) = self.rob.pop_front() else { break };
            assert!(
                instr.instr_id > self.last_retired_id,
                "{}: retirement out of program order",
                self.name
            );
            self.last_retired_id = instr.instr_id;

            if instr.is_branch {
                self.stats.branch_counts[instr.branch as usize] += 1;
                if instr.branch_mispredicted {
                    self.stats.branch_mispredicts[instr.branch as usize] += 1;
                    self.fetch_resume_cycle = now + self.config.mispredict_penalty;
                }
                self.branch_unit.last_branch_result(&instr);
            }

            self.num_retired += 1;
            self.stats.instructions += 1;
            self.last_retire_cycle = now;
            retired += 1;
        }
    }

    fn complete_inflight_instructions(&mut self) {
        let now = self.clock.current_cycle;
        for slot in self.rob.slots_in_order() {
            let Some(entry) = self.rob.get(slot) else {
                continue;
            };
            if entry.executed || !entry.scheduled {
                continue;
            }
            let done = if entry.num_mem_ops() > 0 {
                entry.mem_ops_complete()
            } else {
                entry.began_execution && entry.event_cycle <= now
            };
            if !done {
                continue;
            }

            let dependents = match self.rob.get_mut(slot) {
                Some(entry) => {
                    entry.executed = true;
                    std::mem::take(&mut entry.reg_dependents)
                }
                None => continue,
            };
            for dep in dependents {
                if let Some(waiter) = self.rob.get_mut(dep) {
                    waiter.num_reg_dependent = waiter.num_reg_dependent.saturating_sub(1);
                    if waiter.num_reg_dependent == 0
                        && waiter.scheduled
                        && !waiter.began_execution
                        && waiter.num_mem_ops() == 0
                    {
                        self.ready_to_execute.push_back(dep);
                    }
                }
            }
        }
    }

    // ── execute ──

    fn execute_instructions(&mut self) {
        let now = self.clock.current_cycle;
        let mut started = 0;
        while started < self.config.execute_width {
            let Some(&slot) = self.ready_to_execute.front() else {
                break;
            };
            let Some(entry) = self.rob.get_mut(slot) else {
                self.ready_to_execute.pop_front();
                continue;
            };
            if entry.event_cycle > now {
                break;
            }
            entry.began_execution = true;
            entry.event_cycle = now + self.config.execute_latency;
            self.ready_to_execute.pop_front();
            started += 1;
        }
    }

    fn execute_memory_instructions(&mut self, fabric: &mut Fabric) {
        let now = self.clock.current_cycle;

        // Loads: forwarding check, then DTLB.
        let mut issued = 0;
        while issued < self.config.lq_width {
            let Some(&lq_slot) = self.rtl0.front() else {
                break;
            };
            if self.lq.get(lq_slot).is_none() {
                self.rtl0.pop_front();
                continue;
            }

            let producer = self.lq.get(lq_slot).and_then(|e| e.producer);
            if let Some((sq_slot, sq_id)) = producer {
                match self.sq.get(sq_slot) {
                    Some(store) if store.instr_id == sq_id => {
                        let store_ready = store.translated == Progress::Completed;
                        self.rtl0.pop_front();
                        issued += 1;
                        if store_ready {
                            self.complete_load(lq_slot);
                        } else {
                            // Producer address still unknown; spin the slot.
                            self.rtl0.push_back(lq_slot);
                        }
                        continue;
                    }
                    _ => {
                        if let Some(entry) = self.lq.get_mut(lq_slot) {
                            entry.producer = None;
                        }
                    }
                }
            }

            let Some(entry) = self.lq.get(lq_slot) else {
                self.rtl0.pop_front();
                continue;
            };
            let request = Packet {
                address: entry.v_address,
                v_address: entry.v_address,
                is_translated: false,
                kind: RequestType::Translation,
                cpu: self.cpu,
                instr_id: entry.instr_id,
                ip: entry.ip,
                to_return: vec![self.buses.dtlb],
                issue_cycle: now,
                ..Packet::default()
            };
            if !fabric.get_mut(self.buses.dtlb).add_rq(request).is_accepted() {
                break;
            }
            if let Some(entry) = self.lq.get_mut(lq_slot) {
                entry.translated = Progress::InFlight;
            }
            self.rtl0.pop_front();
            issued += 1;
        }

        // Loads: data access.
        let mut issued = 0;
        while issued < self.config.lq_width {
            let Some(&lq_slot) = self.rtl1.front() else {
                break;
            };
            let Some(entry) = self.lq.get(lq_slot) else {
                self.rtl1.pop_front();
                continue;
            };
            let request = Packet {
                address: entry.p_address,
                v_address: entry.v_address,
                is_translated: true,
                kind: RequestType::Load,
                cpu: self.cpu,
                instr_id: entry.instr_id,
                ip: entry.ip,
                to_return: vec![self.buses.l1d],
                issue_cycle: now,
                ..Packet::default()
            };
            if !fabric.get_mut(self.buses.l1d).add_rq(request).is_accepted() {
                break;
            }
            if let Some(entry) = self.lq.get_mut(lq_slot) {
                entry.fetched = Progress::InFlight;
            }
            self.rtl1.pop_front();
            issued += 1;
        }

        // Stores: address translation. The write itself drains at retire.
        let mut issued = 0;
        while issued < self.config.sq_width {
            let Some(&sq_slot) = self.rts0.front() else {
                break;
            };
            let Some(entry) = self.sq.get(sq_slot) else {
                self.rts0.pop_front();
                continue;
            };
            let request = Packet {
                address: entry.v_address,
                v_address: entry.v_address,
                is_translated: false,
                kind: RequestType::Translation,
                cpu: self.cpu,
                instr_id: entry.instr_id,
                ip: entry.ip,
                to_return: vec![self.buses.dtlb],
                issue_cycle: now,
                ..Packet::default()
            };
            if !fabric.get_mut(self.buses.dtlb).add_rq(request).is_accepted() {
                break;
            }
            if let Some(entry) = self.sq.get_mut(sq_slot) {
                entry.translated = Progress::InFlight;
            }
            self.rts0.pop_front();
            issued += 1;
        }
    }

    // ── schedule ──

    fn schedule_memory_instructions(&mut self) {
        for slot in self.rob.slots_in_order() {
            let Some(entry) = self.rob.get(slot) else {
                continue;
            };
            if !entry.scheduled || entry.executed || entry.num_reg_dependent > 0 {
                continue;
            }
            let lq_slots = entry.lq_slots.clone();
            let sq_slots = entry.sq_slots.clone();
            for s in lq_slots {
                if let Some(e) = self.lq.get_mut(s) {
                    if !e.armed {
                        e.armed = true;
                        self.rtl0.push_back(s);
                    }
                }
            }
            for s in sq_slots {
                if let Some(e) = self.sq.get_mut(s) {
                    if !e.armed {
                        e.armed = true;
                        self.rts0.push_back(s);
                    }
                }
            }
        }
    }

    fn schedule_instructions(&mut self) {
        let now = self.clock.current_cycle;
        let order = self.rob.slots_in_order();
        let mut picked = 0;
        for (pos, &slot) in order.iter().enumerate() {
            if picked >= self.config.schedule_width {
                break;
            }
            let Some(entry) = self.rob.get(slot) else {
                continue;
            };
            if entry.scheduled {
                continue;
            }
            picked += 1;

            // RAW: each source depends on the nearest older producer that
            // has not finished executing.
            let sources = entry.source_registers;
            for reg in sources.into_iter().filter(|&r| r != 0) {
                for &older in order[..pos].iter().rev() {
                    let Some(producer) = self.rob.get(older) else {
                        continue;
                    };
                    if !producer.destination_registers.contains(&reg) {
                        continue;
                    }
                    if !producer.executed {
                        if let Some(producer) = self.rob.get_mut(older) {
                            producer.reg_dependents.push(slot);
                        }
                        if let Some(entry) = self.rob.get_mut(slot) {
                            entry.num_reg_dependent += 1;
                        }
                    }
                    break;
                }
            }

            if let Some(entry) = self.rob.get_mut(slot) {
                entry.scheduled = true;
                entry.event_cycle = now + self.config.schedule_latency;
                if entry.num_reg_dependent == 0 && entry.num_mem_ops() == 0 {
                    self.ready_to_execute.push_back(slot);
                }
            }
        }
    }

    // ── front end ──

    fn dispatch_instructions(&mut self) {
        let now = self.clock.current_cycle;
        let mut dispatched = 0;
        while dispatched < self.config.dispatch_width {
            let Some(front) = self.dispatch_buffer.front_ready(now) else {
                break;
            };
            let needed_lq = front.source_memory.iter().filter(|&&a| a != 0).count();
            let needed_sq = front.destination_memory.iter().filter(|&&a| a != 0).count();
            if self.rob.is_full() || self.lq.free() < needed_lq || self.sq.free() < needed_sq {
                break;
            }

            let Some(instr) = self.dispatch_buffer.pop_ready(now) else {
                break;
            };
            let instr_id = instr.instr_id;
            let ip = instr.ip;
            let sources = instr.source_memory;
            let destinations = instr.destination_memory;
            let Some(rob_slot) = self.rob.push_back(instr) else {
                break;
            };

            for addr in sources.into_iter().filter(|&a| a != 0) {
                // The newest older store to the same address forwards.
                let producer = self
                    .sq
                    .iter()
                    .filter(|(_, e)| e.instr_id < instr_id && e.v_address == addr)
                    .max_by_key(|(_, e)| e.instr_id)
                    .map(|(slot, e)| (slot, e.instr_id));
                if let Some(lq_slot) = self.lq.alloc(LsqEntry {
                    instr_id,
                    v_address: addr,
                    ip,
                    rob_slot,
                    producer,
                    ..LsqEntry::default()
                }) {
                    if let Some(owner) = self.rob.get_mut(rob_slot) {
                        owner.lq_slots.push(lq_slot);
                    }
                }
            }

            for addr in destinations.into_iter().filter(|&a| a != 0) {
                if let Some(sq_slot) = self.sq.alloc(LsqEntry {
                    instr_id,
                    v_address: addr,
                    ip,
                    rob_slot,
                    ..LsqEntry::default()
                }) {
                    if let Some(owner) = self.rob.get_mut(rob_slot) {
                        owner.sq_slots.push(sq_slot);
                    }
                }
            }

            dispatched += 1;
        }
    }

    fn decode_instructions(&mut self) {
        let now = self.clock.current_cycle;
        let mut decoded = 0;
        while decoded < self.config.decode_width {
            if self.dispatch_buffer.is_full() {
                break;
            }
            let Some(mut instr) = self.decode_buffer.pop_ready(now) else {
                break;
            };
            self.dib.update(instr.ip);
            instr.decoded = true;
            let pushed = self.dispatch_buffer.push_back(instr, now);
            debug_assert!(pushed, "dispatch buffer fullness checked above");
            decoded += 1;
        }
    }

    fn promote_to_decode(&mut self) {
        let now = self.clock.current_cycle;
        let mut promoted = 0;
        while promoted < self.config.decode_width {
            if self.decode_buffer.is_full() {
                break;
            }
            let ready = self.ifetch_buffer.front().is_some_and(|i| {
                i.translated == Progress::Completed && i.fetched == Progress::Completed
            });
            if !ready {
                break;
            }
            let Some(instr) = self.ifetch_buffer.pop_front() else {
                break;
            };
            // A DIB hit already paid the decode cost in a previous visit.
            let pushed = if instr.dib_hit {
                self.decode_buffer.push_back_ready(instr, now)
            } else {
                self.decode_buffer.push_back(instr, now)
            };
            debug_assert!(pushed, "decode buffer fullness checked above");
            promoted += 1;
        }
    }

    fn fetch_instructions(&mut self, fabric: &mut Fabric) {
        let now = self.clock.current_cycle;

        // Contiguous same-line entries fetch as one L1I read.
        let pending: Vec<(usize, u64, u64)> = self
            .ifetch_buffer
            .iter()
            .filter(|(_, i)| {
                i.dib_checked
                    && i.translated == Progress::Completed
                    && i.fetched == Progress::NotStarted
            })
            .map(|(slot, i)| (slot, i.ip, i.physical_ip))
            .collect();

        let mut fetches = 0;
        let mut fetched_blocks: Vec<u64> = Vec::new();
        for (_, ip, physical_ip) in &pending {
            if fetches >= self.config.fetch_width {
                break;
            }
            let block = block_number(*ip);
            if fetched_blocks.contains(&block) {
                continue;
            }
            let request = Packet {
                address: *physical_ip,
                v_address: *ip,
                is_translated: true,
                kind: RequestType::Load,
                cpu: self.cpu,
                ip: *ip,
                to_return: vec![self.buses.l1i],
                issue_cycle: now,
                ..Packet::default()
            };
            if !fabric.get_mut(self.buses.l1i).add_rq(request).is_accepted() {
                break;
            }
            fetched_blocks.push(block);
            fetches += 1;

            if self.code_prefetch {
                self.prefetch_code_line(fabric, physical_ip + BLOCK_SIZE);
            }
        }

        for (slot, ip, _) in pending {
            if fetched_blocks.contains(&block_number(ip)) {
                if let Some(instr) = self.ifetch_buffer.get_mut(slot) {
                    instr.fetched = Progress::InFlight;
                }
            }
        }
    }

    /// Instruction prefetcher: drop the next code line into the L1I's
    /// prefetch queue.
    fn prefetch_code_line(&mut self, fabric: &mut Fabric, pf_addr: u64) {
        let request = Packet {
            address: pf_addr & !(BLOCK_SIZE - 1),
            v_address: pf_addr & !(BLOCK_SIZE - 1),
            is_translated: true,
            kind: RequestType::Prefetch,
            cpu: self.cpu,
            fill_this_level: true,
            issue_cycle: self.clock.current_cycle,
            ..Packet::default()
        };
        let _ = fabric.get_mut(self.buses.l1i).add_pq(request);
    }

    fn translate_fetch(&mut self, fabric: &mut Fabric) {
        let now = self.clock.current_cycle;
        let pending: Vec<(usize, u64)> = self
            .ifetch_buffer
            .iter()
            .filter(|(_, i)| i.translated == Progress::NotStarted)
            .map(|(slot, i)| (slot, i.ip))
            .collect();

        let mut translated_pages: Vec<u64> = Vec::new();
        for (_, ip) in &pending {
            let page = page_number(*ip);
            if translated_pages.contains(&page) {
                continue;
            }
            let request = Packet {
                address: *ip,
                v_address: *ip,
                is_translated: false,
                kind: RequestType::Translation,
                cpu: self.cpu,
                ip: *ip,
                to_return: vec![self.buses.itlb],
                issue_cycle: now,
                ..Packet::default()
            };
            if !fabric.get_mut(self.buses.itlb).add_rq(request).is_accepted() {
                break;
            }
            translated_pages.push(page);
        }

        for (slot, ip) in pending {
            if translated_pages.contains(&page_number(ip)) {
                if let Some(instr) = self.ifetch_buffer.get_mut(slot) {
                    instr.translated = Progress::InFlight;
                }
            }
        }
    }

    fn check_dib(&mut self) {
        for slot in self.ifetch_buffer.slots_in_order() {
            let Some(instr) = self.ifetch_buffer.get(slot) else {
                continue;
            };
            if instr.dib_checked {
                continue;
            }
            let hit = self.dib.hit(instr.ip);
            if let Some(instr) = self.ifetch_buffer.get_mut(slot) {
                instr.dib_checked = true;
                if hit {
                    instr.dib_hit = true;
                    // The decoded window is on hand: no instruction fetch.
                    if instr.fetched == Progress::NotStarted {
                        instr.fetched = Progress::Completed;
                    }
                }
            }
        }
    }

    fn init_instructions(&mut self, trace: &mut dyn TraceSource) {
        let now = self.clock.current_cycle;
        if self.fetch_stall {
            if self.fetch_resume_cycle != 0 && now >= self.fetch_resume_cycle {
                self.fetch_stall = false;
                self.fetch_resume_cycle = 0;
            } else {
                return;
            }
        }
        if self.trace_exhausted {
            return;
        }

        for _ in 0..self.config.fetch_width {
            if self.ifetch_buffer.is_full() {
                break;
            }
            let record = trace.next_record().or_else(|| {
                if self.replay_trace && trace.restart() {
                    trace.next_record()
                } else {
                    None
                }
            });
            let Some(record) = record else {
                self.trace_exhausted = true;
                break;
            };

            self.instr_unique_id += 1;
            let mut instr = Instruction::from_record(self.instr_unique_id, &record);

            let mut mispredicted = false;
            if instr.is_branch {
                let (taken, target) = self.branch_unit.predict(&instr);
                instr.predicted_taken = taken;
                mispredicted = taken != instr.branch_taken
                    || (instr.branch_taken && target != instr.branch_target);
                if mispredicted {
                    instr.branch_mispredicted = true;
                    self.stats.rob_occupancy_at_mispredict += self.rob.occupancy() as u64;
                    self.fetch_stall = true;
                }
            }

            let pushed = self.ifetch_buffer.push_back(instr);
            debug_assert!(pushed.is_some(), "fetch buffer fullness checked above");

            if mispredicted {
                break;
            }
        }
    }

    /// The trace ran dry and nothing remains in flight.
    pub fn trace_drained(&self) -> bool {
        self.trace_exhausted
            && self.rob.is_empty()
            && self.ifetch_buffer.is_empty()
            && self.decode_buffer.is_empty()
            && self.dispatch_buffer.is_empty()
    }

    /// True while retirement has advanced within `window`, or nothing is in
    /// flight.
    pub fn healthy(&self, window: u64) -> bool {
        self.rob.is_empty()
            || self.clock.current_cycle.saturating_sub(self.last_retire_cycle) < window
    }

    /// Dumps the stuck state for the deadlock report.
    pub fn print_deadlock(&self) {
        error!(
            core = %self.name,
            cycle = self.clock.current_cycle,
            rob = self.rob.occupancy(),
            lq = self.lq.occupancy(),
            sq = self.sq.occupancy(),
            ifetch = self.ifetch_buffer.occupancy(),
            retired = self.num_retired,
            "deadlocked core state"
        );
        if let Some(head) = self.rob.front() {
            error!(
                core = %self.name,
                instr_id = head.instr_id,
                ip = format_args!("{:#x}", head.ip),
                scheduled = head.scheduled,
                executed = head.executed,
                mem_ops = head.num_mem_ops(),
                mem_done = head.completed_mem_ops,
                "stuck ROB head"
            );
        }
    }
}
