//! Whole-machine pipeline behavior: in-order retirement, store-to-load
//! traffic, and the mispredict fetch bubble.

use pretty_assertions::assert_eq;

use tracesim_core::config::Config;
use tracesim_core::core::instr::{BranchType, REG_FLAGS, REG_INSTRUCTION_POINTER};
use tracesim_core::sim::machine::Machine;
use tracesim_core::sim::trace::{ScriptedTrace, TraceRecord};

use crate::common::init_tracing;

fn test_config(simulation_instructions: u64) -> Config {
    let mut config = Config::default();
    config.run.warmup_instructions = 0;
    config.run.simulation_instructions = simulation_instructions;
    config.core.rob_size = 64;
    config.core.lq_size = 16;
    config.core.sq_size = 16;
    config.core.mispredict_penalty = 30;
    config.l2.sets = 64;
    config.llc.sets = 64;
    config.llc.ways = 8;
    config
}

fn alu_record(i: usize) -> TraceRecord {
    TraceRecord {
        ip: 0x40_0000 + 4 * i as u64,
        source_registers: [1, 2, 0, 0],
        destination_registers: [3, 0],
        ..TraceRecord::default()
    }
}

/// A conditional branch: reads IP and flags, writes IP.
fn branch_record(i: usize, taken: bool) -> TraceRecord {
    TraceRecord {
        ip: 0x40_0000 + 4 * i as u64,
        branch_taken: taken,
        branch_target: 0x40_0000 + 4 * (i as u64 + 1),
        source_registers: [REG_INSTRUCTION_POINTER, REG_FLAGS, 0, 0],
        destination_registers: [REG_INSTRUCTION_POINTER, 0],
        ..TraceRecord::default()
    }
}

fn run_cycles(records: Vec<TraceRecord>, target: u64) -> (u64, Vec<u64>) {
    let config = test_config(target);
    let mut machine = Machine::new(&config, vec![Box::new(ScriptedTrace::new(records))])
        .expect("valid test config");
    let reports = machine.run();
    let sim = &reports[1];
    (sim.cores[0].cycles, sim.cores[0].branch_mispredicts.to_vec())
}

#[test]
fn straightline_code_retires_in_order() {
    init_tracing();
    let records: Vec<TraceRecord> = (0..300).map(alu_record).collect();
    let config = test_config(200);
    let mut machine = Machine::new(&config, vec![Box::new(ScriptedTrace::new(records))])
        .expect("valid test config");
    let reports = machine.run();
    // Retirement order is asserted inside the core; reaching the target
    // without tripping it is the property.
    assert!(reports[1].cores[0].instructions >= 200);
}

#[test]
fn mispredicted_branch_opens_a_fetch_bubble() {
    init_tracing();
    let target = 200;

    let clean: Vec<TraceRecord> = (0..400).map(alu_record).collect();
    let (clean_cycles, clean_misses) = run_cycles(clean, target);
    assert_eq!(clean_misses, vec![0u64; BranchType::COUNT]);

    // Instruction 100 is a conditional branch the cold predictor calls
    // not-taken; the trace says taken.
    let mispredicted: Vec<TraceRecord> = (0..400)
        .map(|i| {
            if i == 100 {
                branch_record(i, true)
            } else {
                alu_record(i)
            }
        })
        .collect();
    let (branch_cycles, branch_misses) = run_cycles(mispredicted, target);

    // Exactly one miss, charged to the conditional category.
    let mut expected = vec![0u64; BranchType::COUNT];
    expected[BranchType::Conditional as usize] = 1;
    assert_eq!(branch_misses, expected);
    // The fetch bubble spans from ingestion of the branch until its
    // retirement plus the penalty, so the run must be visibly longer.
    assert!(
        branch_cycles >= clean_cycles + 30,
        "mispredict must cost at least the configured penalty \
         (clean {clean_cycles}, mispredicted {branch_cycles})"
    );
}

#[test]
fn stores_drain_to_the_data_cache_at_retire() {
    init_tracing();
    let mut config = test_config(60);
    config.core.mispredict_penalty = 1;
    let records: Vec<TraceRecord> = (0..200)
        .map(|i| TraceRecord {
            ip: 0x40_0000 + 4 * i as u64,
            source_registers: [1, 0, 0, 0],
            destination_registers: [0, 0],
            destination_memory: [0x90_0000 + 64 * i as u64, 0],
            ..TraceRecord::default()
        })
        .collect();
    let mut machine = Machine::new(&config, vec![Box::new(ScriptedTrace::new(records))])
        .expect("valid test config");
    let reports = machine.run().to_vec();
    let sim = &reports[1];
    assert!(sim.cores[0].instructions >= 60);

    let l1d = sim
        .caches
        .iter()
        .find(|(name, _)| name == "cpu0_L1D")
        .map(|(_, s)| s.clone())
        .expect("L1D stats present");
    // Every retired store became exactly one write at the L1D.
    let writes = l1d.hits[3] + l1d.misses[3];
    assert!(writes >= 60, "stores must reach the L1D ({writes})");
}
