//! The next-line prefetcher turns one demand miss into exactly two
//! lower-level requests, one block apart.

use tracesim_core::channel::{Fabric, Packet, RequestType};
use tracesim_core::common::{LOG2_BLOCK_SIZE, block_number};
use tracesim_core::config::DataPrefetcher;
use tracesim_core::mem::SimObservation;
use tracesim_core::mem::cache::Cache;

use crate::common::mocks::DoNothingConsumer;
use crate::common::{init_tracing, scenario_cache};

#[test]
fn one_load_produces_two_requests_one_block_apart() {
    init_tracing();
    let mut fabric = Fabric::new();
    let upper = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let lower = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let mut config = scenario_cache(1, 8, 1, 3, 1, 1);
    config.prefetcher = DataPrefetcher::NextLine;
    let mut uut = Cache::new("451-uut", &config, vec![upper], None, Some(lower)).unwrap();
    uut.clock.warmup = false;
    let mut mock_ll = DoNothingConsumer::new(lower, 0);
    let obs = SimObservation::default();

    fabric.get_mut(upper).add_rq(Packet {
        address: 0xffff_003f,
        v_address: 0xffff_003f,
        is_translated: true,
        kind: RequestType::Load,
        instr_id: 1,
        to_return: vec![upper],
        ..Packet::default()
    });

    for _ in 0..100 {
        uut.tick(&mut fabric, &obs);
        mock_ll.tick(&mut fabric);
    }

    // Exactly two requests below: the demand and its next-line prefetch.
    assert_eq!(mock_ll.packet_count(), 2);
    assert_eq!(
        block_number(mock_ll.addresses[0]) + 1,
        block_number(mock_ll.addresses[1])
    );

    // The prefetched block installed, credited to the prefetcher.
    assert_eq!(uut.stats.pf_issued, 1);
    assert_eq!(uut.stats.pf_fill, 1);

    // The demand load was answered.
    assert_eq!(fabric.get(upper).returned.len(), 1);
}
