//! Request/response plumbing between memory-hierarchy levels.
//!
//! A [`Channel`] is one producer→consumer link: the producer (upper level)
//! pushes [`Packet`]s into the channel's read/write/prefetch queues, the
//! consumer (lower level) pops them, and responses travel back through the
//! channel's `returned` queue. Channels live in a central [`Fabric`] arena
//! and are referenced by [`ChannelId`], so the cache tree needs no circular
//! ownership: a descending packet simply accumulates the ids of the
//! channels that want to hear about its completion.

/// Delay queue (enqueue-visible-after-N-cycles).
pub mod delay;

/// Fixed-capacity ring buffer with stable slots.
pub mod ring;

use std::collections::VecDeque;

use crate::common::LOG2_BLOCK_SIZE;

/// The class of a memory request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RequestType {
    /// Demand read.
    #[default]
    Load,
    /// Read-for-ownership: a store that must first fill the block.
    Rfo,
    /// Speculative read issued by a prefetcher.
    Prefetch,
    /// Store into a present block (partial-line write).
    Write,
    /// Full-line writeback evicted from an upper level.
    Writeback,
    /// Virtual-to-physical translation request.
    Translation,
}

/// The universal memory request.
///
/// Packets are value-typed; identity for coalescing is `(address, type,
/// instr_id)` at block granularity.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    /// Physical address. Equals the virtual address until translated.
    pub address: u64,
    /// Virtual address.
    pub v_address: u64,
    /// Whether `address` holds a real physical address.
    pub is_translated: bool,
    /// Request class.
    pub kind: RequestType,
    /// Issuing CPU.
    pub cpu: u32,
    /// Issuing instruction id (0 when hardware-generated).
    pub instr_id: u64,
    /// Program counter of the triggering instruction.
    pub ip: u64,
    /// For prefetches: whether this level should keep the filled block.
    pub fill_this_level: bool,
    /// Prefetch generated by the receiving cache's own prefetcher; such
    /// requests never re-activate the prefetcher.
    pub prefetch_from_this: bool,
    /// Opaque prefetcher metadata carried down and back.
    pub pf_metadata: u32,
    /// Channels to notify, accumulated as the packet descends.
    pub to_return: Vec<ChannelId>,
    /// Cycle the producer issued the packet.
    pub issue_cycle: u64,
    /// Scratch readiness cycle used while the packet sits in a queue.
    pub event_cycle: u64,
    /// Cycle stamped on the response when the request completes.
    pub return_cycle: u64,
    /// Response payload (translated page base for translation requests).
    pub data: u64,
}

impl Packet {
    /// Block number of the physical address.
    #[inline]
    pub const fn block(&self) -> u64 {
        self.address >> LOG2_BLOCK_SIZE
    }
}

/// Outcome of a queue admission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddResult {
    /// A new entry was created.
    Queued,
    /// The request was folded into an existing compatible entry.
    Merged,
    /// The queue was full; the producer must retry.
    Full,
}

impl AddResult {
    /// True unless the queue rejected the request.
    #[inline]
    pub fn is_accepted(self) -> bool {
        self != Self::Full
    }
}

/// A bounded packet queue with address-coalescing admission.
pub struct PacketQueue {
    entries: VecDeque<Packet>,
    capacity: usize,
}

impl PacketQueue {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of queued packets.
    #[inline]
    pub fn occupancy(&self) -> usize {
        self.entries.len()
    }

    /// Queue capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True if no more packets can be admitted.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Oldest queued packet.
    pub fn front(&self) -> Option<&Packet> {
        self.entries.front()
    }

    /// Removes and returns the oldest queued packet.
    pub fn pop_front(&mut self) -> Option<Packet> {
        self.entries.pop_front()
    }

    /// Iterates queued packets from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.entries.iter()
    }

    fn find_match(&mut self, addr: u64, shamt: u32) -> Option<&mut Packet> {
        self.entries
            .iter_mut()
            .find(|p| p.address >> shamt == addr >> shamt)
    }

    fn push(&mut self, pkt: Packet) -> AddResult {
        if self.is_full() {
            return AddResult::Full;
        }
        self.entries.push_back(pkt);
        AddResult::Queued
    }
}

/// One producer→consumer link in the hierarchy.
pub struct Channel {
    /// Read (demand) queue.
    pub rq: PacketQueue,
    /// Write queue.
    pub wq: PacketQueue,
    /// Prefetch queue.
    pub pq: PacketQueue,
    /// Responses travelling back to the producer.
    pub returned: VecDeque<Packet>,
    offset_bits: u32,
    wq_match_offset: bool,
}

impl Channel {
    fn new(
        rq_size: usize,
        wq_size: usize,
        pq_size: usize,
        offset_bits: u32,
        wq_match_offset: bool,
    ) -> Self {
        Self {
            rq: PacketQueue::new(rq_size),
            wq: PacketQueue::new(wq_size),
            pq: PacketQueue::new(pq_size),
            returned: VecDeque::new(),
            offset_bits,
            wq_match_offset,
        }
    }

    /// Admits a demand request. A request to a block already pending in the
    /// read queue attaches the caller to the existing entry's return list.
    pub fn add_rq(&mut self, pkt: Packet) -> AddResult {
        let shamt = self.offset_bits;
        if let Some(found) = self.rq.find_match(pkt.address, shamt) {
            for ret in pkt.to_return {
                if !found.to_return.contains(&ret) {
                    found.to_return.push(ret);
                }
            }
            found.instr_id = found.instr_id.min(pkt.instr_id);
            return AddResult::Merged;
        }
        self.rq.push(pkt)
    }

    /// Admits a write. Writes to an already-pending address are absorbed.
    pub fn add_wq(&mut self, pkt: Packet) -> AddResult {
        let shamt = if self.wq_match_offset {
            0
        } else {
            self.offset_bits
        };
        if self.wq.find_match(pkt.address, shamt).is_some() {
            return AddResult::Merged;
        }
        self.wq.push(pkt)
    }

    /// Admits a prefetch. A prefetch to a block with a pending demand read
    /// is absorbed silently; a prefetch to a pending prefetch merges.
    pub fn add_pq(&mut self, pkt: Packet) -> AddResult {
        let shamt = self.offset_bits;
        if self.rq.find_match(pkt.address, shamt).is_some() {
            return AddResult::Merged;
        }
        if let Some(found) = self.pq.find_match(pkt.address, shamt) {
            for ret in pkt.to_return {
                if !found.to_return.contains(&ret) {
                    found.to_return.push(ret);
                }
            }
            found.fill_this_level |= pkt.fill_this_level;
            return AddResult::Merged;
        }
        self.pq.push(pkt)
    }
}

/// Identifier of a channel inside the [`Fabric`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(usize);

/// Arena of every channel in the machine.
///
/// Components hold `ChannelId`s rather than references, so the whole
/// hierarchy stays free of ownership cycles and every component's
/// per-cycle work takes `&mut Fabric`.
#[derive(Default)]
pub struct Fabric {
    channels: Vec<Channel>,
}

impl Fabric {
    /// Creates an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new channel and returns its id.
    pub fn add_channel(
        &mut self,
        rq_size: usize,
        wq_size: usize,
        pq_size: usize,
        offset_bits: u32,
        wq_match_offset: bool,
    ) -> ChannelId {
        let id = ChannelId(self.channels.len());
        self.channels
            .push(Channel::new(rq_size, wq_size, pq_size, offset_bits, wq_match_offset));
        id
    }

    /// Returns the channel with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not produced by this fabric.
    #[inline]
    pub fn get(&self, id: ChannelId) -> &Channel {
        &self.channels[id.0]
    }

    /// Returns the channel with the given id, mutably.
    ///
    /// # Panics
    ///
    /// Panics if the id was not produced by this fabric.
    #[inline]
    pub fn get_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id.0]
    }

    /// Delivers a response to every distinct listener, once each, in FIFO
    /// accumulation order.
    pub fn respond(&mut self, listeners: &[ChannelId], pkt: &Packet, return_cycle: u64) {
        let mut seen: Vec<ChannelId> = Vec::with_capacity(listeners.len());
        for &id in listeners {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            let mut response = pkt.clone();
            response.return_cycle = return_cycle;
            response.to_return.clear();
            self.channels[id.0].returned.push_back(response);
        }
    }
}
