//! Mock hierarchy endpoints.
//!
//! `DoNothingConsumer` answers every request after a fixed delay, with an
//! optional fixed-page translation mode. `ReleaseConsumer` holds every
//! request until the test releases them, which pins the exact cycle fills
//! become available.

use std::collections::VecDeque;

use tracesim_core::channel::{ChannelId, Fabric, Packet};
use tracesim_core::common::splice_page;
use tracesim_core::sim::clock::ClockDomain;

/// Page base every translation maps to in translating mode.
pub const TRANSLATED_BASE: u64 = 0x1111_1000;

/// A consumer that answers after `latency` cycles.
pub struct DoNothingConsumer {
    /// Component clock.
    pub clock: ClockDomain,
    channel: ChannelId,
    latency: u64,
    translate: bool,
    /// Addresses of every request seen, in arrival order.
    pub addresses: Vec<u64>,
    inflight: VecDeque<(Packet, u64)>,
}

impl DoNothingConsumer {
    /// A plain consumer with the given response delay.
    pub fn new(channel: ChannelId, latency: u64) -> Self {
        Self {
            clock: ClockDomain::new(1.0),
            channel,
            latency,
            translate: false,
            addresses: Vec::new(),
            inflight: VecDeque::new(),
        }
    }

    /// A consumer that answers translation requests by splicing every
    /// virtual address onto [`TRANSLATED_BASE`].
    pub fn translating(channel: ChannelId, latency: u64) -> Self {
        Self {
            translate: true,
            ..Self::new(channel, latency)
        }
    }

    /// Requests seen so far.
    pub fn packet_count(&self) -> usize {
        self.addresses.len()
    }

    /// One global tick.
    pub fn tick(&mut self, fabric: &mut Fabric) {
        if !self.clock.tick() {
            return;
        }
        let now = self.clock.current_cycle;

        // Accept first so a zero-latency response leaves this same cycle.
        loop {
            let channel = fabric.get_mut(self.channel);
            if let Some(pkt) = channel.wq.pop_front() {
                self.addresses.push(pkt.address);
                continue;
            }
            let Some(pkt) = channel.rq.pop_front().or_else(|| channel.pq.pop_front()) else {
                break;
            };
            self.addresses.push(pkt.address);
            self.inflight.push_back((pkt, now + self.latency));
        }

        while self.inflight.front().is_some_and(|(_, due)| *due <= now) {
            let Some((pkt, _)) = self.inflight.pop_front() else {
                break;
            };
            let mut response = pkt;
            if self.translate {
                response.address = splice_page(TRANSLATED_BASE, response.v_address);
                response.data = TRANSLATED_BASE;
                response.is_translated = true;
            }
            let listeners = std::mem::take(&mut response.to_return);
            fabric.respond(&listeners, &response, now);
        }

        self.clock.advance();
    }
}

/// A consumer that holds requests until the test releases them.
pub struct ReleaseConsumer {
    /// Component clock.
    pub clock: ClockDomain,
    channel: ChannelId,
    /// Addresses of every request seen, in arrival order.
    pub addresses: Vec<u64>,
    held: Vec<Packet>,
}

impl ReleaseConsumer {
    /// A consumer on the given channel.
    pub fn new(channel: ChannelId) -> Self {
        Self {
            clock: ClockDomain::new(1.0),
            channel,
            addresses: Vec::new(),
            held: Vec::new(),
        }
    }

    /// One global tick: absorb requests, answer nothing.
    pub fn tick(&mut self, fabric: &mut Fabric) {
        if !self.clock.tick() {
            return;
        }
        loop {
            let channel = fabric.get_mut(self.channel);
            if let Some(pkt) = channel.wq.pop_front() {
                self.addresses.push(pkt.address);
                continue;
            }
            let Some(pkt) = channel.rq.pop_front().or_else(|| channel.pq.pop_front()) else {
                break;
            };
            self.addresses.push(pkt.address);
            self.held.push(pkt);
        }
        self.clock.advance();
    }

    /// Answers every held request now, in arrival order.
    pub fn release_all(&mut self, fabric: &mut Fabric) {
        let now = self.clock.current_cycle;
        for mut pkt in self.held.drain(..) {
            let listeners = std::mem::take(&mut pkt.to_return);
            fabric.respond(&listeners, &pkt, now);
        }
    }
}
