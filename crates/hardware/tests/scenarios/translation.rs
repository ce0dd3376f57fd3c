//! An untranslated request detours through the translator side channel
//! and re-enters tag lookup with the physical address filled in.

use pretty_assertions::assert_eq;
use rstest::rstest;

use tracesim_core::channel::{Fabric, Packet, RequestType};
use tracesim_core::common::LOG2_BLOCK_SIZE;
use tracesim_core::mem::SimObservation;
use tracesim_core::mem::cache::Cache;

use crate::common::mocks::DoNothingConsumer;
use crate::common::{init_tracing, scenario_cache};

const HIT_LATENCY: u64 = 10;
const FILL_LATENCY: u64 = 3;

#[derive(Clone, Copy)]
enum IssueQueue {
    Rq,
    Wq,
    Pq,
}

#[rstest]
#[case::demand(IssueQueue::Rq)]
#[case::write(IssueQueue::Wq)]
#[case::prefetch(IssueQueue::Pq)]
fn untranslated_request_detours_then_restarts(#[case] queue: IssueQueue) {
    init_tracing();
    let mut fabric = Fabric::new();
    let upper = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let translator_ch = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    let lower = fabric.add_channel(32, 32, 32, LOG2_BLOCK_SIZE, false);
    // The write queue carries partial stores here so that a WQ miss also
    // travels below (as an RFO) and the translated address is observable.
    let mut config = scenario_cache(1, 8, HIT_LATENCY, FILL_LATENCY, 1, 1);
    config.wq_match_offset = true;
    let mut uut = Cache::new(
        "412-uut",
        &config,
        vec![upper],
        Some(translator_ch),
        Some(lower),
    )
    .unwrap();
    uut.clock.warmup = false;
    let mut mock_translator = DoNothingConsumer::translating(translator_ch, 2 * HIT_LATENCY);
    let mut mock_ll = DoNothingConsumer::new(lower, 0);
    let obs = SimObservation::default();

    let pkt = Packet {
        address: 0xdeadbeef,
        v_address: 0xdeadbeef,
        is_translated: false,
        kind: match queue {
            IssueQueue::Rq => RequestType::Load,
            IssueQueue::Wq => RequestType::Write,
            IssueQueue::Pq => RequestType::Prefetch,
        },
        instr_id: 1,
        issue_cycle: 0,
        to_return: vec![upper],
        ..Packet::default()
    };
    let accepted = match queue {
        IssueQueue::Rq => fabric.get_mut(upper).add_rq(pkt),
        IssueQueue::Wq => fabric.get_mut(upper).add_wq(pkt),
        IssueQueue::Pq => fabric.get_mut(upper).add_pq(pkt),
    };
    assert!(accepted.is_accepted());

    for _ in 0..100 {
        uut.tick(&mut fabric, &obs);
        mock_ll.tick(&mut fabric);
        mock_translator.tick(&mut fabric);
    }

    // Exactly one translation request was produced.
    assert_eq!(mock_translator.packet_count(), 1);

    // The packet emerged below with the translated physical address.
    assert_eq!(mock_ll.addresses, vec![0x11111eef]);

    // The tag lookup restarted: translator delay, the initial and the
    // retried tag check, the fill, and two cycles of channel clocking.
    let response = fabric.get(upper).returned.front().unwrap();
    assert_eq!(response.v_address, 0xdeadbeef);
    assert_eq!(
        response.return_cycle,
        response.issue_cycle + 3 * HIT_LATENCY + FILL_LATENCY + 2
    );
}
