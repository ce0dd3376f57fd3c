//! The machine: topology construction and the global tick loop.
//!
//! Every operable component is advanced once per global tick in a fixed
//! registration order — cores first, then each core's TLBs and caches from
//! the top of the tree down, then the walkers, then memory. Determinism
//! follows from this order being stable. A run is two phases (warmup, then
//! simulation) measured in retired instructions per core; a deadlock
//! detector scans every component at a fixed cadence and aborts with a
//! per-component dump if retirement or fills stop advancing.

use tracing::{info, warn};

use crate::channel::{ChannelId, Fabric};
use crate::common::error::ConfigError;
use crate::config::{CacheLevelConfig, Config};
use crate::core::{Core, CoreBuses};
use crate::mem::SimObservation;
use crate::mem::cache::Cache;
use crate::mem::dram::MainMemory;
use crate::mem::ptw::Ptw;
use crate::sim::trace::TraceSource;
use crate::stats::PhaseReport;

/// A constructed machine, ready to run.
pub struct Machine {
    fabric: Fabric,
    cores: Vec<Core>,
    caches: Vec<Cache>,
    ptws: Vec<Ptw>,
    dram: MainMemory,
    traces: Vec<Box<dyn TraceSource>>,
    warmup_instructions: u64,
    simulation_instructions: u64,
    deadlock_cycle: u64,
    global_cycle: u64,
    obs: SimObservation,
    /// Completed phase reports.
    pub reports: Vec<PhaseReport>,
}

impl Machine {
    /// Builds the topology described by `config`, one trace per core.
    ///
    /// # Errors
    ///
    /// Returns the first configuration fault found.
    ///
    /// # Panics
    ///
    /// Panics if the number of traces does not match `num_cores`.
    pub fn new(config: &Config, traces: Vec<Box<dyn TraceSource>>) -> Result<Self, ConfigError> {
        config.validate()?;
        assert_eq!(
            traces.len(),
            config.num_cores,
            "one trace source per core required"
        );

        let mut fabric = Fabric::new();
        let mut cores = Vec::new();
        let mut caches = Vec::new();
        let mut ptws = Vec::new();

        let channel_for = |fabric: &mut Fabric, level: &CacheLevelConfig| -> ChannelId {
            fabric.add_channel(
                level.rq_size,
                level.wq_size,
                level.pq_size,
                level.offset_bits,
                level.wq_match_offset,
            )
        };

        let mut llc_uppers = Vec::new();
        let llc_dram = channel_for(&mut fabric, &config.llc);

        for cpu in 0..config.num_cores as u32 {
            let core_itlb = channel_for(&mut fabric, &config.itlb);
            let core_dtlb = channel_for(&mut fabric, &config.dtlb);
            let core_l1i = channel_for(&mut fabric, &config.l1i);
            let core_l1d = channel_for(&mut fabric, &config.l1d);
            let l1i_translator = channel_for(&mut fabric, &config.itlb);
            let l1d_translator = channel_for(&mut fabric, &config.dtlb);
            let itlb_stlb = channel_for(&mut fabric, &config.stlb);
            let dtlb_stlb = channel_for(&mut fabric, &config.stlb);
            let stlb_ptw = channel_for(&mut fabric, &config.stlb);
            let l1i_l2 = channel_for(&mut fabric, &config.l2);
            let l1d_l2 = channel_for(&mut fabric, &config.l2);
            let l2_llc = channel_for(&mut fabric, &config.llc);
            llc_uppers.push(l2_llc);

            cores.push(Core::new(
                cpu,
                &config.core,
                CoreBuses {
                    itlb: core_itlb,
                    dtlb: core_dtlb,
                    l1i: core_l1i,
                    l1d: core_l1d,
                },
                config.run.replay_trace,
            ));

            caches.push(Cache::new(
                &format!("cpu{cpu}_ITLB"),
                &config.itlb,
                vec![core_itlb, l1i_translator],
                None,
                Some(itlb_stlb),
            )?);
            caches.push(Cache::new(
                &format!("cpu{cpu}_DTLB"),
                &config.dtlb,
                vec![core_dtlb, l1d_translator],
                None,
                Some(dtlb_stlb),
            )?);
            caches.push(Cache::new(
                &format!("cpu{cpu}_STLB"),
                &config.stlb,
                vec![itlb_stlb, dtlb_stlb],
                None,
                Some(stlb_ptw),
            )?);
            caches.push(Cache::new(
                &format!("cpu{cpu}_L1I"),
                &config.l1i,
                vec![core_l1i],
                Some(l1i_translator),
                Some(l1i_l2),
            )?);
            caches.push(Cache::new(
                &format!("cpu{cpu}_L1D"),
                &config.l1d,
                vec![core_l1d],
                Some(l1d_translator),
                Some(l1d_l2),
            )?);
            caches.push(Cache::new(
                &format!("cpu{cpu}_L2C"),
                &config.l2,
                vec![l1i_l2, l1d_l2],
                None,
                Some(l2_llc),
            )?);

            ptws.push(Ptw::new(
                &format!("cpu{cpu}_PTW"),
                &config.ptw,
                vec![stlb_ptw],
            ));
        }

        caches.push(Cache::new(
            "LLC",
            &config.llc,
            llc_uppers,
            None,
            Some(llc_dram),
        )?);

        let dram = MainMemory::new("DRAM", &config.dram, vec![llc_dram]);

        let mut machine = Self {
            fabric,
            cores,
            caches,
            ptws,
            dram,
            traces,
            warmup_instructions: config.run.warmup_instructions,
            simulation_instructions: config.run.simulation_instructions,
            deadlock_cycle: config.run.deadlock_cycle,
            global_cycle: 0,
            obs: SimObservation {
                ipc: vec![0.0; config.num_cores],
            },
            reports: Vec::new(),
        };
        for cache in &mut machine.caches {
            cache.initialize();
        }
        Ok(machine)
    }

    fn set_warmup(&mut self, warmup: bool) {
        for core in &mut self.cores {
            core.clock.warmup = warmup;
        }
        for cache in &mut self.caches {
            cache.clock.warmup = warmup;
        }
        for ptw in &mut self.ptws {
            ptw.clock.warmup = warmup;
        }
        self.dram.clock.warmup = warmup;
    }

    /// Advances every component once, in registration order.
    pub fn tick(&mut self) {
        for (cpu, core) in self.cores.iter().enumerate() {
            self.obs.ipc[cpu] = core.stats.ipc();
        }
        for (core, trace) in self.cores.iter_mut().zip(self.traces.iter_mut()) {
            core.tick(&mut self.fabric, trace.as_mut());
        }
        for cache in &mut self.caches {
            cache.tick(&mut self.fabric, &self.obs);
        }
        for ptw in &mut self.ptws {
            ptw.tick(&mut self.fabric);
        }
        self.dram.tick(&mut self.fabric);
        self.global_cycle += 1;

        if self.global_cycle % self.deadlock_cycle == 0 {
            self.check_deadlock();
        }
    }

    fn check_deadlock(&self) {
        let window = self.deadlock_cycle;
        let stuck = self.cores.iter().any(|c| !c.healthy(window))
            || self.caches.iter().any(|c| !c.healthy(window))
            || self.ptws.iter().any(|p| !p.healthy(window))
            || !self.dram.healthy(window);
        if !stuck {
            return;
        }
        for core in &self.cores {
            core.print_deadlock();
        }
        for cache in &self.caches {
            cache.print_deadlock();
        }
        for ptw in &self.ptws {
            ptw.print_deadlock();
        }
        self.dram.print_deadlock();
        panic!("deadlock detected at global cycle {}", self.global_cycle);
    }

    fn run_phase(&mut self, name: &str, target: u64) -> PhaseReport {
        info!(phase = name, instructions = target, "phase begin");
        for core in &mut self.cores {
            core.begin_phase();
        }
        for cache in &mut self.caches {
            cache.begin_phase();
        }

        let begin: Vec<u64> = self.cores.iter().map(|c| c.num_retired).collect();
        loop {
            let done = self
                .cores
                .iter()
                .zip(&begin)
                .all(|(core, &b)| core.num_retired - b >= target);
            if done {
                break;
            }
            if self.cores.iter().all(Core::trace_drained) {
                warn!(phase = name, "trace exhausted before phase target");
                break;
            }
            self.tick();
        }

        let report = PhaseReport {
            name: name.to_string(),
            cores: self.cores.iter_mut().map(Core::end_phase).collect(),
            caches: self
                .caches
                .iter_mut()
                .map(|c| (c.name.clone(), c.end_phase()))
                .collect(),
        };
        info!(phase = name, cycles = self.global_cycle, "phase end");
        report
    }

    /// Runs warmup then simulation, returning the per-phase reports.
    pub fn run(&mut self) -> &[PhaseReport] {
        self.set_warmup(true);
        let warmup = self.run_phase("warmup", self.warmup_instructions);
        self.reports.push(warmup);

        self.set_warmup(false);
        let simulation = self.run_phase("simulation", self.simulation_instructions);
        self.reports.push(simulation);

        for cache in &mut self.caches {
            cache.finalize();
        }
        &self.reports
    }

    /// Prints every completed phase report.
    pub fn print_reports(&self) {
        for report in &self.reports {
            report.print();
        }
    }

    /// Global ticks elapsed.
    pub fn cycles(&self) -> u64 {
        self.global_cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sim::trace::{ScriptedTrace, TraceRecord};

    fn small_config() -> Config {
        let mut config = Config::default();
        config.run.warmup_instructions = 20;
        config.run.simulation_instructions = 50;
        config.core.rob_size = 32;
        config.core.lq_size = 8;
        config.core.sq_size = 8;
        config.l2.sets = 64;
        config.llc.sets = 64;
        config.llc.ways = 8;
        config
    }

    fn straightline_trace(n: usize) -> ScriptedTrace {
        let records = (0..n)
            .map(|i| TraceRecord {
                ip: 0x40_0000 + 4 * i as u64,
                source_registers: [1, 2, 0, 0],
                destination_registers: [3, 0],
                ..TraceRecord::default()
            })
            .collect();
        ScriptedTrace::new(records)
    }

    #[test]
    fn test_machine_runs_both_phases() {
        let config = small_config();
        let mut machine =
            Machine::new(&config, vec![Box::new(straightline_trace(500))]).unwrap();
        let reports = machine.run();
        assert_eq!(reports.len(), 2);
        // The last retire cycle may overshoot the target by up to the
        // retire width.
        let warmup = reports[0].cores[0].instructions;
        let sim = reports[1].cores[0].instructions;
        assert!((20..25).contains(&warmup), "warmup retired {warmup}");
        assert!((50..55).contains(&sim), "simulation retired {sim}");
        assert!(reports[1].cores[0].cycles > 0);
        assert!(reports[1].cores[0].ipc() > 0.0);
    }

    #[test]
    fn test_trace_exhaustion_finalizes_early() {
        let config = small_config();
        let mut machine =
            Machine::new(&config, vec![Box::new(straightline_trace(30))]).unwrap();
        let reports = machine.run();
        // Warmup consumed 20; the simulation phase drains what remains and
        // reports rather than hanging.
        assert!(reports[1].cores[0].instructions <= 10);
    }

    #[test]
    fn test_memory_traffic_reaches_the_hierarchy() {
        let mut config = small_config();
        config.run.warmup_instructions = 0;
        config.run.simulation_instructions = 40;
        let records = (0..200)
            .map(|i| TraceRecord {
                ip: 0x40_0000 + 4 * i as u64,
                source_registers: [1, 0, 0, 0],
                destination_registers: [2, 0],
                source_memory: [0x80_0000 + 64 * i as u64, 0, 0, 0],
                ..TraceRecord::default()
            })
            .collect();
        let mut machine = Machine::new(
            &config,
            vec![Box::new(ScriptedTrace::new(records))],
        )
        .unwrap();
        let reports = machine.run().to_vec();
        let sim = &reports[1];
        let l1d = sim
            .caches
            .iter()
            .find(|(name, _)| name == "cpu0_L1D")
            .map(|(_, s)| s.clone())
            .unwrap();
        assert!(l1d.total_accesses() > 0, "loads must reach the L1D");
    }
}
