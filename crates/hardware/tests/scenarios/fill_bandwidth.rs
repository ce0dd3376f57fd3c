//! The fill bandwidth bounds completions per cycle, for both fills
//! returning from below and direct write-queue allocations.

use rstest::rstest;

use tracesim_core::channel::{Fabric, Packet, RequestType};
use tracesim_core::common::{BLOCK_SIZE, LOG2_BLOCK_SIZE};
use tracesim_core::mem::SimObservation;
use tracesim_core::mem::cache::Cache;

use crate::common::mocks::{DoNothingConsumer, ReleaseConsumer};
use crate::common::{init_tracing, scenario_cache};

const HIT_LATENCY: u64 = 4;
const FILL_LATENCY: u64 = 1;
const FILL_BANDWIDTH: usize = 2;

#[rstest]
fn mshr_fills_respect_the_bandwidth(#[values(1, 2, 3, 4, 5, 6)] size: usize) {
    init_tracing();
    let mut fabric = Fabric::new();
    let upper = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let lower = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let config = scenario_cache(1, 8, HIT_LATENCY, FILL_LATENCY, 10, FILL_BANDWIDTH);
    let mut uut = Cache::new("404-uut", &config, vec![upper], None, Some(lower)).unwrap();
    uut.clock.warmup = false;
    let mut mock_ll = ReleaseConsumer::new(lower);
    let obs = SimObservation::default();

    let seed_base_addr: u64 = 0xdeadbeef;
    for i in 0..size as u64 {
        let accepted = fabric
            .get_mut(upper)
            .add_rq(Packet {
                address: seed_base_addr + i * BLOCK_SIZE,
                v_address: seed_base_addr + i * BLOCK_SIZE,
                is_translated: true,
                kind: RequestType::Load,
                instr_id: i,
                to_return: vec![upper],
                ..Packet::default()
            })
            .is_accepted();
        assert!(accepted);
    }

    // Give the cache enough time to miss.
    for _ in 0..100 {
        uut.tick(&mut fabric, &obs);
        mock_ll.tick(&mut fabric);
    }
    assert_eq!(mock_ll.addresses.len(), size);

    // All fills become available on the same cycle.
    mock_ll.release_all(&mut fabric);
    let release_cycle = mock_ll.clock.current_cycle;

    for _ in 0..100 {
        uut.tick(&mut fabric, &obs);
        mock_ll.tick(&mut fabric);
    }

    let served: Vec<&Packet> = fabric.get(upper).returned.iter().collect();
    assert_eq!(served.len(), size);
    for (k, pkt) in served.iter().enumerate() {
        assert_eq!(
            pkt.return_cycle,
            release_cycle + FILL_LATENCY + (k as u64) / FILL_BANDWIDTH as u64,
            "packet {k} fill cycle"
        );
    }
}

#[rstest]
fn writeback_allocations_respect_the_bandwidth(#[values(1, 2, 4, 6, 8)] size: usize) {
    init_tracing();
    let mut fabric = Fabric::new();
    let upper = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let lower = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let config = scenario_cache(1, 8, HIT_LATENCY, FILL_LATENCY, 10, FILL_BANDWIDTH);
    let mut uut = Cache::new("404-uut-w", &config, vec![upper], None, Some(lower)).unwrap();
    uut.clock.warmup = false;
    let mut mock_ll = DoNothingConsumer::new(lower, 20);
    let obs = SimObservation::default();

    let seed_base_addr: u64 = 0xdeadbeef;
    for i in 0..size as u64 {
        let accepted = fabric
            .get_mut(upper)
            .add_wq(Packet {
                address: seed_base_addr + i * BLOCK_SIZE,
                v_address: seed_base_addr + i * BLOCK_SIZE,
                is_translated: true,
                kind: RequestType::Write,
                instr_id: i,
                issue_cycle: 0,
                to_return: vec![upper],
                ..Packet::default()
            })
            .is_accepted();
        assert!(accepted);
    }

    for _ in 0..100 {
        uut.tick(&mut fabric, &obs);
        mock_ll.tick(&mut fabric);
    }

    // Full-line writes allocate in place: nothing reaches the lower level.
    assert_eq!(mock_ll.packet_count(), 0);

    let served: Vec<&Packet> = fabric.get(upper).returned.iter().collect();
    assert_eq!(served.len(), size);
    for (k, pkt) in served.iter().enumerate() {
        assert_eq!(
            pkt.return_cycle,
            pkt.issue_cycle + HIT_LATENCY + FILL_LATENCY + (k as u64) / FILL_BANDWIDTH as u64,
            "packet {k} allocation cycle"
        );
    }
}
