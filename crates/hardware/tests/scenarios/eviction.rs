//! A direct-mapped cache evicts its only block when a second address
//! arrives, forwarding exactly one writeback for the dirty victim.

use pretty_assertions::assert_eq;

use tracesim_core::channel::{Fabric, Packet, RequestType};
use tracesim_core::common::LOG2_BLOCK_SIZE;
use tracesim_core::mem::SimObservation;
use tracesim_core::mem::cache::Cache;

use crate::common::mocks::DoNothingConsumer;
use crate::common::{init_tracing, scenario_cache};

const HIT_LATENCY: u64 = 4;
const FILL_LATENCY: u64 = 3;

#[test]
fn dirty_block_evicts_as_one_writeback() {
    init_tracing();
    let mut fabric = Fabric::new();
    let seed_ch = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let test_ch = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let lower = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let config = scenario_cache(1, 1, HIT_LATENCY, FILL_LATENCY, 1, 1);
    let mut uut =
        Cache::new("405-uut", &config, vec![seed_ch, test_ch], None, Some(lower)).unwrap();
    uut.clock.warmup = false;
    let mut mock_ll = DoNothingConsumer::new(lower, 0);
    let obs = SimObservation::default();

    // A write fills the single block; full-line writes allocate locally.
    fabric.get_mut(seed_ch).add_wq(Packet {
        address: 0xdeadbeef,
        v_address: 0xdeadbeef,
        is_translated: true,
        kind: RequestType::Write,
        instr_id: 1,
        issue_cycle: 0,
        to_return: vec![seed_ch],
        ..Packet::default()
    });

    for _ in 0..10 {
        uut.tick(&mut fabric, &obs);
        mock_ll.tick(&mut fabric);
    }
    assert_eq!(mock_ll.packet_count(), 0);
    let seed_response = fabric.get(seed_ch).returned.front().unwrap().clone();
    assert_eq!(
        seed_response.return_cycle,
        seed_response.issue_cycle + HIT_LATENCY + FILL_LATENCY
    );

    // A load to a conflicting address misses, fills, and evicts the
    // dirty seed block.
    let issue_cycle = uut.clock.current_cycle;
    fabric.get_mut(test_ch).add_rq(Packet {
        address: 0xcafebabe,
        v_address: 0xcafebabe,
        is_translated: true,
        kind: RequestType::Load,
        instr_id: 2,
        issue_cycle,
        to_return: vec![test_ch],
        ..Packet::default()
    });

    for _ in 0..30 {
        uut.tick(&mut fabric, &obs);
        mock_ll.tick(&mut fabric);
    }

    let response = fabric.get(test_ch).returned.front().unwrap();
    assert_eq!(
        response.return_cycle,
        issue_cycle + HIT_LATENCY + FILL_LATENCY + 1
    );

    // Exactly two packets below: the demand miss, then the writeback.
    assert_eq!(mock_ll.addresses, vec![0xcafebabe, 0xdeadbeef]);
    assert_eq!(uut.stats.writebacks_sent, 1);
}
