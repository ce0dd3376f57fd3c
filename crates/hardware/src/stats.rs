//! Simulation statistics collection and reporting.
//!
//! This module tracks performance metrics for the simulator. It provides:
//! 1. **Core metrics:** Cycles, retired instructions, IPC, and per-branch-type
//!    mispredictions.
//! 2. **Cache metrics:** Hit/miss counts by access class, prefetch activity,
//!    writebacks, and MSHR merges.
//! 3. **Phase reports:** Warmup and simulation phases are recorded and
//!    printed separately.

use crate::channel::RequestType;
use crate::core::instr::BranchType;

/// Number of access classes tracked per cache.
pub const NUM_ACCESS_CLASSES: usize = 6;

/// Display names for the access classes, indexed by [`class_index`].
pub const ACCESS_CLASS_NAMES: [&str; NUM_ACCESS_CLASSES] =
    ["LOAD", "RFO", "PREFETCH", "WRITE", "WRITEBACK", "TRANSLATION"];

/// Maps a request type onto its statistics row.
#[inline]
pub const fn class_index(kind: RequestType) -> usize {
    match kind {
        RequestType::Load => 0,
        RequestType::Rfo => 1,
        RequestType::Prefetch => 2,
        RequestType::Write => 3,
        RequestType::Writeback => 4,
        RequestType::Translation => 5,
    }
}

/// Per-core counters for one phase.
#[derive(Clone, Debug, Default)]
pub struct CoreStats {
    /// Cycles elapsed in the phase.
    pub cycles: u64,
    /// Instructions retired in the phase.
    pub instructions: u64,
    /// Retired branches by type.
    pub branch_counts: [u64; BranchType::COUNT],
    /// Mispredicted branches by type.
    pub branch_mispredicts: [u64; BranchType::COUNT],
    /// Sum of ROB occupancy sampled at each mispredict.
    pub rob_occupancy_at_mispredict: u64,
}

impl CoreStats {
    /// Instructions per cycle for the phase.
    pub fn ipc(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.instructions as f64 / self.cycles as f64
        }
    }

    /// Total retired branches.
    pub fn total_branches(&self) -> u64 {
        self.branch_counts.iter().sum()
    }

    /// Total mispredicted branches.
    pub fn total_mispredicts(&self) -> u64 {
        self.branch_mispredicts.iter().sum()
    }

    /// Branch mispredictions per kilo-instruction.
    pub fn branch_mpki(&self) -> f64 {
        if self.instructions == 0 {
            0.0
        } else {
            1000.0 * self.total_mispredicts() as f64 / self.instructions as f64
        }
    }
}

/// Per-cache counters for one phase.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    /// Hits by access class.
    pub hits: [u64; NUM_ACCESS_CLASSES],
    /// Misses by access class.
    pub misses: [u64; NUM_ACCESS_CLASSES],
    /// Prefetches the prefetcher asked for.
    pub pf_requested: u64,
    /// Prefetches that were admitted to the prefetch queue.
    pub pf_issued: u64,
    /// Prefetched blocks later touched by a demand access.
    pub pf_useful: u64,
    /// Blocks installed by prefetch.
    pub pf_fill: u64,
    /// Writebacks forwarded to the lower level.
    pub writebacks_sent: u64,
    /// Misses folded into an existing MSHR entry.
    pub mshr_merges: u64,
}

impl CacheStats {
    /// Total accesses across all classes.
    pub fn total_accesses(&self) -> u64 {
        self.hits.iter().sum::<u64>() + self.misses.iter().sum::<u64>()
    }

    /// Total misses across all classes.
    pub fn total_misses(&self) -> u64 {
        self.misses.iter().sum()
    }

    /// Prefetcher accuracy: useful prefetches over issued prefetches.
    pub fn pf_accuracy(&self) -> f64 {
        if self.pf_issued == 0 {
            0.0
        } else {
            self.pf_useful as f64 / self.pf_issued as f64
        }
    }

    /// Misses per kilo-instruction against the given retirement count.
    pub fn mpki(&self, instructions: u64) -> f64 {
        if instructions == 0 {
            0.0
        } else {
            1000.0 * self.total_misses() as f64 / instructions as f64
        }
    }
}

/// Counters for one phase of one run.
#[derive(Clone, Debug, Default)]
pub struct PhaseReport {
    /// Phase label ("warmup" or "simulation").
    pub name: String,
    /// Per-core counters, indexed by CPU id.
    pub cores: Vec<CoreStats>,
    /// Per-cache counters, labelled by cache name.
    pub caches: Vec<(String, CacheStats)>,
}

impl PhaseReport {
    /// Prints the phase in the aligned-key report format.
    pub fn print(&self) {
        println!("\n==========================================================");
        println!("PHASE: {}", self.name);
        println!("==========================================================");
        for (cpu, core) in self.cores.iter().enumerate() {
            println!("CPU {cpu}");
            println!("  cycles                 {}", core.cycles);
            println!("  instructions           {}", core.instructions);
            println!("  ipc                    {:.4}", core.ipc());
            println!(
                "  branches               {} (mispredicted {}, {:.4} MPKI)",
                core.total_branches(),
                core.total_mispredicts(),
                core.branch_mpki()
            );
            for ty in BranchType::ALL {
                let idx = ty as usize;
                if core.branch_counts[idx] == 0 {
                    continue;
                }
                println!(
                    "    {:<20} {:<10} miss {}",
                    ty.name(),
                    core.branch_counts[idx],
                    core.branch_mispredicts[idx]
                );
            }
        }
        let instructions = self.cores.iter().map(|c| c.instructions).sum::<u64>();
        for (name, cache) in &self.caches {
            if cache.total_accesses() == 0 {
                continue;
            }
            println!("{name}");
            for class in 0..NUM_ACCESS_CLASSES {
                let total = cache.hits[class] + cache.misses[class];
                if total == 0 {
                    continue;
                }
                println!(
                    "  {:<12} access: {:<10} hit: {:<10} miss: {:<10}",
                    ACCESS_CLASS_NAMES[class], total, cache.hits[class], cache.misses[class]
                );
            }
            println!(
                "  prefetch     requested: {} issued: {} useful: {} accuracy: {:.2}%",
                cache.pf_requested,
                cache.pf_issued,
                cache.pf_useful,
                100.0 * cache.pf_accuracy()
            );
            println!(
                "  writebacks: {}  mshr_merges: {}  mpki: {:.4}",
                cache.writebacks_sent,
                cache.mshr_merges,
                cache.mpki(instructions)
            );
        }
        println!("==========================================================");
    }
}
