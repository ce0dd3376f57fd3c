//! Configuration system for the simulator.
//!
//! This module defines all configuration structures and enums used to
//! parameterize a run. It provides:
//! 1. **Defaults:** Baseline hardware constants (pipeline widths, cache
//!    geometry, walker levels, phase lengths).
//! 2. **Structures:** Hierarchical config for the run phases, the core, each
//!    cache/TLB level, the page-table walker, and main memory.
//! 3. **Enums:** Module ids for branch predictors, BTBs, instruction and
//!    data prefetchers, and replacement policies.
//!
//! Configuration is supplied as JSON (`serde_json`) or built in code from
//! `Config::default()`. [`Config::validate`] performs every construction-time
//! check: zero sizes, non-power-of-two set counts, and unsatisfiable
//! topology are rejected before the first simulated cycle.

use serde::Deserialize;

use crate::common::error::ConfigError;
use crate::common::{LOG2_BLOCK_SIZE, LOG2_PAGE_SIZE};

/// Default configuration constants for the simulator.
mod defaults {
    /// Instructions retired per core before statistics start counting.
    pub const WARMUP_INSTRUCTIONS: u64 = 1_000_000;

    /// Instructions retired per core in the measured phase.
    pub const SIMULATION_INSTRUCTIONS: u64 = 10_000_000;

    /// Global ticks between deadlock scans.
    pub const DEADLOCK_CYCLE: u64 = 1_000_000;

    /// Default pipeline widths (instructions per cycle per stage).
    pub const FETCH_WIDTH: usize = 6;
    /// Decode width.
    pub const DECODE_WIDTH: usize = 6;
    /// Dispatch width.
    pub const DISPATCH_WIDTH: usize = 6;
    /// Entries examined by the scheduler per cycle.
    pub const SCHEDULE_WIDTH: usize = 128;
    /// Non-memory execution width.
    pub const EXECUTE_WIDTH: usize = 4;
    /// Loads issued per cycle.
    pub const LQ_WIDTH: usize = 2;
    /// Stores issued per cycle.
    pub const SQ_WIDTH: usize = 2;
    /// Retirement width.
    pub const RETIRE_WIDTH: usize = 5;

    /// Reorder buffer entries.
    pub const ROB_SIZE: usize = 352;
    /// Load queue entries.
    pub const LQ_SIZE: usize = 128;
    /// Store queue entries.
    pub const SQ_SIZE: usize = 72;
    /// Fetch buffer entries.
    pub const IFETCH_BUFFER_SIZE: usize = 64;
    /// Decode buffer entries.
    pub const DECODE_BUFFER_SIZE: usize = 32;
    /// Dispatch buffer entries.
    pub const DISPATCH_BUFFER_SIZE: usize = 32;

    /// Decoded instruction buffer geometry.
    pub const DIB_SETS: usize = 32;
    /// DIB associativity.
    pub const DIB_WAYS: usize = 8;
    /// DIB window in bytes; PCs are aligned to this before lookup.
    pub const DIB_WINDOW: usize = 16;

    /// Pipeline-register latencies in cycles.
    pub const DECODE_LATENCY: u64 = 1;
    /// Dispatch latency.
    pub const DISPATCH_LATENCY: u64 = 1;
    /// Scheduling latency.
    pub const SCHEDULE_LATENCY: u64 = 0;
    /// Execution latency.
    pub const EXECUTE_LATENCY: u64 = 0;
    /// Fetch-bubble penalty after a mispredicted branch retires.
    pub const MISPREDICT_PENALTY: u64 = 1;

    /// Default cache sets.
    pub const CACHE_SETS: usize = 64;
    /// Default cache ways.
    pub const CACHE_WAYS: usize = 8;
    /// Default read-queue size.
    pub const RQ_SIZE: usize = 32;
    /// Default write-queue size.
    pub const WQ_SIZE: usize = 32;
    /// Default prefetch-queue size.
    pub const PQ_SIZE: usize = 16;
    /// Default MSHR entries.
    pub const MSHR_SIZE: usize = 16;
    /// Default hit latency in cycles.
    pub const HIT_LATENCY: u64 = 4;
    /// Default fill latency in cycles.
    pub const FILL_LATENCY: u64 = 1;
    /// Tag lookups per cycle.
    pub const MAX_TAG_CHECK: usize = 2;
    /// Block installs per cycle.
    pub const FILL_BANDWIDTH: usize = 2;

    /// Page-table walk levels.
    pub const PTW_LEVELS: usize = 4;
    /// Entries in each per-level walk cache.
    pub const PTW_CACHE_SIZE: usize = 16;
    /// Cycles charged per walk level that misses its walk cache.
    pub const PTW_LEVEL_LATENCY: u64 = 10;

    /// Main-memory access latency in cycles.
    pub const DRAM_LATENCY: u64 = 200;

    /// Branch target buffer entries.
    pub const BTB_SIZE: usize = 1024;

    /// Cycles between bandit arm re-selections.
    pub const BANDIT_UPDATE_PERIOD: u64 = 100_000;
}

/// Branch direction predictor module ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BranchPredictor {
    /// Per-PC 2-bit saturating counters.
    #[default]
    Bimodal,
    /// Global history XOR-folded into the PC (gshare).
    GShare,
}

/// Branch target buffer module ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BtbKind {
    /// Direct-mapped target table.
    #[default]
    Basic,
}

/// Instruction prefetcher module ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum InstructionPrefetcher {
    /// No instruction prefetching.
    #[default]
    None,
    /// Prefetch the next sequential code line on every fetch.
    NextLine,
}

/// Data prefetcher module ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DataPrefetcher {
    /// No data prefetching.
    #[default]
    None,
    /// Prefetch the next sequential block on every activation.
    NextLine,
    /// Per-page best-request-time delta prefetcher.
    Berti,
}

/// Replacement policy module ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ReplacementPolicy {
    /// Least recently used.
    #[default]
    Lru,
    /// Static re-reference interval prediction.
    Srrip,
    /// Dynamic RRIP with set dueling.
    Drrip,
    /// Signature-based hit prediction.
    Ship,
    /// Recency/reuse learned ranking.
    Rlr,
    /// UCB multi-armed bandit over all of the above.
    Bandit,
}

/// Request classes that may activate a cache's data prefetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ActivateClass {
    /// Demand loads.
    Load,
    /// Read-for-ownership stores.
    Rfo,
    /// Prefetch hits/misses.
    Prefetch,
    /// Writes.
    Write,
    /// Translation requests.
    Translation,
}

/// Root configuration for one run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Phase lengths and global run settings.
    #[serde(default)]
    pub run: RunConfig,
    /// Number of cores; each core gets a private L1/L2/TLB stack.
    #[serde(default = "Config::default_num_cores")]
    pub num_cores: usize,
    /// Core pipeline configuration (shared by all cores).
    #[serde(default)]
    pub core: CoreConfig,
    /// Instruction TLB.
    #[serde(default = "CacheLevelConfig::default_itlb")]
    pub itlb: CacheLevelConfig,
    /// Data TLB.
    #[serde(default = "CacheLevelConfig::default_dtlb")]
    pub dtlb: CacheLevelConfig,
    /// Second-level unified TLB.
    #[serde(default = "CacheLevelConfig::default_stlb")]
    pub stlb: CacheLevelConfig,
    /// L1 instruction cache.
    #[serde(default = "CacheLevelConfig::default_l1i")]
    pub l1i: CacheLevelConfig,
    /// L1 data cache.
    #[serde(default = "CacheLevelConfig::default_l1d")]
    pub l1d: CacheLevelConfig,
    /// Private unified L2.
    #[serde(default = "CacheLevelConfig::default_l2")]
    pub l2: CacheLevelConfig,
    /// Shared last-level cache.
    #[serde(default = "CacheLevelConfig::default_llc")]
    pub llc: CacheLevelConfig,
    /// Page-table walker.
    #[serde(default)]
    pub ptw: PtwConfig,
    /// Main memory.
    #[serde(default)]
    pub dram: DramConfig,
}

impl Config {
    fn default_num_cores() -> usize {
        1
    }

    /// Checks every construction-time constraint from the error model.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found: a zero size, a set count
    /// that is not a power of two, or a missing core.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_cores == 0 {
            return Err(ConfigError::NoCores);
        }
        self.core.validate()?;
        for (name, level) in [
            ("ITLB", &self.itlb),
            ("DTLB", &self.dtlb),
            ("STLB", &self.stlb),
            ("L1I", &self.l1i),
            ("L1D", &self.l1d),
            ("L2C", &self.l2),
            ("LLC", &self.llc),
        ] {
            level.validate(name)?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            num_cores: 1,
            core: CoreConfig::default(),
            itlb: CacheLevelConfig::default_itlb(),
            dtlb: CacheLevelConfig::default_dtlb(),
            stlb: CacheLevelConfig::default_stlb(),
            l1i: CacheLevelConfig::default_l1i(),
            l1d: CacheLevelConfig::default_l1d(),
            l2: CacheLevelConfig::default_l2(),
            llc: CacheLevelConfig::default_llc(),
            ptw: PtwConfig::default(),
            dram: DramConfig::default(),
        }
    }
}

/// Phase lengths and global run settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Instructions retired per core before statistics count.
    #[serde(default = "RunConfig::default_warmup")]
    pub warmup_instructions: u64,

    /// Instructions retired per core in the measured phase.
    #[serde(default = "RunConfig::default_simulation")]
    pub simulation_instructions: u64,

    /// Global ticks between deadlock scans.
    #[serde(default = "RunConfig::default_deadlock_cycle")]
    pub deadlock_cycle: u64,

    /// Restart the trace source at end-of-trace instead of finalizing.
    #[serde(default)]
    pub replay_trace: bool,
}

impl RunConfig {
    fn default_warmup() -> u64 {
        defaults::WARMUP_INSTRUCTIONS
    }

    fn default_simulation() -> u64 {
        defaults::SIMULATION_INSTRUCTIONS
    }

    fn default_deadlock_cycle() -> u64 {
        defaults::DEADLOCK_CYCLE
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            warmup_instructions: defaults::WARMUP_INSTRUCTIONS,
            simulation_instructions: defaults::SIMULATION_INSTRUCTIONS,
            deadlock_cycle: defaults::DEADLOCK_CYCLE,
            replay_trace: false,
        }
    }
}

/// Out-of-order core configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Core frequency relative to the global tick (1.0 = every tick).
    #[serde(default = "CoreConfig::default_freq")]
    pub frequency_scale: f64,

    /// Trace records ingested per cycle.
    #[serde(default = "CoreConfig::default_fetch_width")]
    pub fetch_width: usize,
    /// Instructions decoded per cycle.
    #[serde(default = "CoreConfig::default_decode_width")]
    pub decode_width: usize,
    /// Instructions dispatched into the ROB per cycle.
    #[serde(default = "CoreConfig::default_dispatch_width")]
    pub dispatch_width: usize,
    /// ROB entries examined by the scheduler per cycle.
    #[serde(default = "CoreConfig::default_schedule_width")]
    pub schedule_width: usize,
    /// Non-memory instructions begun per cycle.
    #[serde(default = "CoreConfig::default_execute_width")]
    pub execute_width: usize,
    /// Loads issued to the data path per cycle.
    #[serde(default = "CoreConfig::default_lq_width")]
    pub lq_width: usize,
    /// Store addresses issued per cycle.
    #[serde(default = "CoreConfig::default_sq_width")]
    pub sq_width: usize,
    /// Instructions retired per cycle.
    #[serde(default = "CoreConfig::default_retire_width")]
    pub retire_width: usize,

    /// Reorder buffer entries.
    #[serde(default = "CoreConfig::default_rob_size")]
    pub rob_size: usize,
    /// Load queue entries.
    #[serde(default = "CoreConfig::default_lq_size")]
    pub lq_size: usize,
    /// Store queue entries.
    #[serde(default = "CoreConfig::default_sq_size")]
    pub sq_size: usize,
    /// Fetch buffer entries.
    #[serde(default = "CoreConfig::default_ifetch_buffer_size")]
    pub ifetch_buffer_size: usize,
    /// Decode buffer entries.
    #[serde(default = "CoreConfig::default_decode_buffer_size")]
    pub decode_buffer_size: usize,
    /// Dispatch buffer entries.
    #[serde(default = "CoreConfig::default_dispatch_buffer_size")]
    pub dispatch_buffer_size: usize,

    /// Decoded-instruction-buffer sets.
    #[serde(default = "CoreConfig::default_dib_sets")]
    pub dib_sets: usize,
    /// Decoded-instruction-buffer ways.
    #[serde(default = "CoreConfig::default_dib_ways")]
    pub dib_ways: usize,
    /// Decoded-instruction-buffer window in bytes.
    #[serde(default = "CoreConfig::default_dib_window")]
    pub dib_window: usize,

    /// Decode buffer visibility delay.
    #[serde(default = "CoreConfig::default_decode_latency")]
    pub decode_latency: u64,
    /// Dispatch buffer visibility delay.
    #[serde(default = "CoreConfig::default_dispatch_latency")]
    pub dispatch_latency: u64,
    /// Cycles between scheduling and execution eligibility.
    #[serde(default = "CoreConfig::default_schedule_latency")]
    pub schedule_latency: u64,
    /// Cycles a non-memory instruction spends executing.
    #[serde(default = "CoreConfig::default_execute_latency")]
    pub execute_latency: u64,
    /// Fetch-bubble penalty applied when a mispredicted branch retires.
    #[serde(default = "CoreConfig::default_mispredict_penalty")]
    pub mispredict_penalty: u64,

    /// Branch direction predictor module.
    #[serde(default)]
    pub branch_predictor: BranchPredictor,
    /// Branch target buffer module.
    #[serde(default)]
    pub btb: BtbKind,
    /// BTB entries.
    #[serde(default = "CoreConfig::default_btb_size")]
    pub btb_size: usize,
    /// Instruction prefetcher module.
    #[serde(default)]
    pub instruction_prefetcher: InstructionPrefetcher,
}

impl CoreConfig {
    fn default_freq() -> f64 {
        1.0
    }
    fn default_fetch_width() -> usize {
        defaults::FETCH_WIDTH
    }
    fn default_decode_width() -> usize {
        defaults::DECODE_WIDTH
    }
    fn default_dispatch_width() -> usize {
        defaults::DISPATCH_WIDTH
    }
    fn default_schedule_width() -> usize {
        defaults::SCHEDULE_WIDTH
    }
    fn default_execute_width() -> usize {
        defaults::EXECUTE_WIDTH
    }
    fn default_lq_width() -> usize {
        defaults::LQ_WIDTH
    }
    fn default_sq_width() -> usize {
        defaults::SQ_WIDTH
    }
    fn default_retire_width() -> usize {
        defaults::RETIRE_WIDTH
    }
    fn default_rob_size() -> usize {
        defaults::ROB_SIZE
    }
    fn default_lq_size() -> usize {
        defaults::LQ_SIZE
    }
    fn default_sq_size() -> usize {
        defaults::SQ_SIZE
    }
    fn default_ifetch_buffer_size() -> usize {
        defaults::IFETCH_BUFFER_SIZE
    }
    fn default_decode_buffer_size() -> usize {
        defaults::DECODE_BUFFER_SIZE
    }
    fn default_dispatch_buffer_size() -> usize {
        defaults::DISPATCH_BUFFER_SIZE
    }
    fn default_dib_sets() -> usize {
        defaults::DIB_SETS
    }
    fn default_dib_ways() -> usize {
        defaults::DIB_WAYS
    }
    fn default_dib_window() -> usize {
        defaults::DIB_WINDOW
    }
    fn default_decode_latency() -> u64 {
        defaults::DECODE_LATENCY
    }
    fn default_dispatch_latency() -> u64 {
        defaults::DISPATCH_LATENCY
    }
    fn default_schedule_latency() -> u64 {
        defaults::SCHEDULE_LATENCY
    }
    fn default_execute_latency() -> u64 {
        defaults::EXECUTE_LATENCY
    }
    fn default_mispredict_penalty() -> u64 {
        defaults::MISPREDICT_PENALTY
    }
    fn default_btb_size() -> usize {
        defaults::BTB_SIZE
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("fetch_width", self.fetch_width),
            ("decode_width", self.decode_width),
            ("dispatch_width", self.dispatch_width),
            ("execute_width", self.execute_width),
            ("retire_width", self.retire_width),
            ("rob_size", self.rob_size),
            ("lq_size", self.lq_size),
            ("sq_size", self.sq_size),
            ("ifetch_buffer_size", self.ifetch_buffer_size),
            ("decode_buffer_size", self.decode_buffer_size),
            ("dispatch_buffer_size", self.dispatch_buffer_size),
            ("dib_window", self.dib_window),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroSize {
                    component: "core".to_string(),
                    field,
                });
            }
        }
        for (field, value) in [
            ("dib_sets", self.dib_sets),
            ("dib_window", self.dib_window),
            ("btb_size", self.btb_size),
        ] {
            if !value.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo {
                    component: "core".to_string(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            frequency_scale: 1.0,
            fetch_width: defaults::FETCH_WIDTH,
            decode_width: defaults::DECODE_WIDTH,
            dispatch_width: defaults::DISPATCH_WIDTH,
            schedule_width: defaults::SCHEDULE_WIDTH,
            execute_width: defaults::EXECUTE_WIDTH,
            lq_width: defaults::LQ_WIDTH,
            sq_width: defaults::SQ_WIDTH,
            retire_width: defaults::RETIRE_WIDTH,
            rob_size: defaults::ROB_SIZE,
            lq_size: defaults::LQ_SIZE,
            sq_size: defaults::SQ_SIZE,
            ifetch_buffer_size: defaults::IFETCH_BUFFER_SIZE,
            decode_buffer_size: defaults::DECODE_BUFFER_SIZE,
            dispatch_buffer_size: defaults::DISPATCH_BUFFER_SIZE,
            dib_sets: defaults::DIB_SETS,
            dib_ways: defaults::DIB_WAYS,
            dib_window: defaults::DIB_WINDOW,
            decode_latency: defaults::DECODE_LATENCY,
            dispatch_latency: defaults::DISPATCH_LATENCY,
            schedule_latency: defaults::SCHEDULE_LATENCY,
            execute_latency: defaults::EXECUTE_LATENCY,
            mispredict_penalty: defaults::MISPREDICT_PENALTY,
            branch_predictor: BranchPredictor::default(),
            btb: BtbKind::default(),
            btb_size: defaults::BTB_SIZE,
            instruction_prefetcher: InstructionPrefetcher::default(),
        }
    }
}

/// Configuration of one cache or TLB level.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheLevelConfig {
    /// Number of sets (power of two).
    #[serde(default = "CacheLevelConfig::default_sets")]
    pub sets: usize,
    /// Associativity.
    #[serde(default = "CacheLevelConfig::default_ways")]
    pub ways: usize,
    /// Read-queue entries.
    #[serde(default = "CacheLevelConfig::default_rq_size")]
    pub rq_size: usize,
    /// Write-queue entries.
    #[serde(default = "CacheLevelConfig::default_wq_size")]
    pub wq_size: usize,
    /// Prefetch-queue entries.
    #[serde(default = "CacheLevelConfig::default_pq_size")]
    pub pq_size: usize,
    /// Outstanding-miss (MSHR) entries.
    #[serde(default = "CacheLevelConfig::default_mshr_size")]
    pub mshr_size: usize,
    /// Tag-check latency in cycles.
    #[serde(default = "CacheLevelConfig::default_hit_latency")]
    pub hit_latency: u64,
    /// Block-install latency in cycles.
    #[serde(default = "CacheLevelConfig::default_fill_latency")]
    pub fill_latency: u64,
    /// Tag lookups per cycle.
    #[serde(default = "CacheLevelConfig::default_max_tag_check")]
    pub max_tag_check: usize,
    /// Block installs per cycle.
    #[serde(default = "CacheLevelConfig::default_fill_bandwidth")]
    pub fill_bandwidth: usize,
    /// Address bits below the tag/index split (block vs page granularity).
    #[serde(default = "CacheLevelConfig::default_offset_bits")]
    pub offset_bits: u32,
    /// Tag by virtual rather than physical address.
    #[serde(default)]
    pub virtual_tag: bool,
    /// Write queue carries partial stores; misses become RFOs downstream.
    /// When false, the WQ carries full-line writebacks that allocate
    /// directly.
    #[serde(default)]
    pub wq_match_offset: bool,
    /// Request classes that activate the data prefetcher.
    #[serde(default = "CacheLevelConfig::default_prefetch_activate")]
    pub prefetch_activate: Vec<ActivateClass>,
    /// Data prefetcher module.
    #[serde(default)]
    pub prefetcher: DataPrefetcher,
    /// Replacement policy module.
    #[serde(default)]
    pub replacement: ReplacementPolicy,
    /// Frequency relative to the global tick.
    #[serde(default = "CacheLevelConfig::default_freq")]
    pub frequency_scale: f64,
}

impl CacheLevelConfig {
    fn default_sets() -> usize {
        defaults::CACHE_SETS
    }
    fn default_ways() -> usize {
        defaults::CACHE_WAYS
    }
    fn default_rq_size() -> usize {
        defaults::RQ_SIZE
    }
    fn default_wq_size() -> usize {
        defaults::WQ_SIZE
    }
    fn default_pq_size() -> usize {
        defaults::PQ_SIZE
    }
    fn default_mshr_size() -> usize {
        defaults::MSHR_SIZE
    }
    fn default_hit_latency() -> u64 {
        defaults::HIT_LATENCY
    }
    fn default_fill_latency() -> u64 {
        defaults::FILL_LATENCY
    }
    fn default_max_tag_check() -> usize {
        defaults::MAX_TAG_CHECK
    }
    fn default_fill_bandwidth() -> usize {
        defaults::FILL_BANDWIDTH
    }
    fn default_offset_bits() -> u32 {
        LOG2_BLOCK_SIZE
    }
    fn default_prefetch_activate() -> Vec<ActivateClass> {
        vec![ActivateClass::Load, ActivateClass::Prefetch]
    }
    fn default_freq() -> f64 {
        1.0
    }

    /// A baseline level with the given geometry.
    fn level(sets: usize, ways: usize) -> Self {
        Self {
            sets,
            ways,
            rq_size: defaults::RQ_SIZE,
            wq_size: defaults::WQ_SIZE,
            pq_size: defaults::PQ_SIZE,
            mshr_size: defaults::MSHR_SIZE,
            hit_latency: defaults::HIT_LATENCY,
            fill_latency: defaults::FILL_LATENCY,
            max_tag_check: defaults::MAX_TAG_CHECK,
            fill_bandwidth: defaults::FILL_BANDWIDTH,
            offset_bits: LOG2_BLOCK_SIZE,
            virtual_tag: false,
            wq_match_offset: false,
            prefetch_activate: Self::default_prefetch_activate(),
            prefetcher: DataPrefetcher::None,
            replacement: ReplacementPolicy::Lru,
            frequency_scale: 1.0,
        }
    }

    /// Default instruction TLB (page-granular, virtually tagged).
    pub fn default_itlb() -> Self {
        Self {
            offset_bits: LOG2_PAGE_SIZE,
            virtual_tag: true,
            hit_latency: 1,
            ..Self::level(16, 4)
        }
    }

    /// Default data TLB.
    pub fn default_dtlb() -> Self {
        Self {
            offset_bits: LOG2_PAGE_SIZE,
            virtual_tag: true,
            hit_latency: 1,
            ..Self::level(16, 4)
        }
    }

    /// Default second-level TLB.
    pub fn default_stlb() -> Self {
        Self {
            offset_bits: LOG2_PAGE_SIZE,
            virtual_tag: true,
            hit_latency: 8,
            ..Self::level(128, 12)
        }
    }

    /// Default L1 instruction cache.
    pub fn default_l1i() -> Self {
        Self {
            hit_latency: 4,
            ..Self::level(64, 8)
        }
    }

    /// Default L1 data cache.
    pub fn default_l1d() -> Self {
        Self {
            hit_latency: 5,
            wq_match_offset: true,
            ..Self::level(64, 12)
        }
    }

    /// Default private L2.
    pub fn default_l2() -> Self {
        Self {
            hit_latency: 10,
            ..Self::level(1024, 8)
        }
    }

    /// Default shared last-level cache.
    pub fn default_llc() -> Self {
        Self {
            hit_latency: 20,
            fill_latency: 1,
            prefetcher: DataPrefetcher::Berti,
            replacement: ReplacementPolicy::Bandit,
            ..Self::level(2048, 16)
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        for (field, value) in [
            ("sets", self.sets),
            ("ways", self.ways),
            ("rq_size", self.rq_size),
            ("mshr_size", self.mshr_size),
            ("max_tag_check", self.max_tag_check),
            ("fill_bandwidth", self.fill_bandwidth),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroSize {
                    component: name.to_string(),
                    field,
                });
            }
        }
        if !self.sets.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                component: name.to_string(),
                field: "sets",
                value: self.sets,
            });
        }
        Ok(())
    }
}

/// Page-table walker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PtwConfig {
    /// Translation levels walked per miss.
    #[serde(default = "PtwConfig::default_levels")]
    pub levels: usize,
    /// Entries per per-level walk cache.
    #[serde(default = "PtwConfig::default_cache_size")]
    pub cache_size: usize,
    /// Cycles charged per level whose walk cache misses.
    #[serde(default = "PtwConfig::default_level_latency")]
    pub level_latency: u64,
}

impl PtwConfig {
    fn default_levels() -> usize {
        defaults::PTW_LEVELS
    }
    fn default_cache_size() -> usize {
        defaults::PTW_CACHE_SIZE
    }
    fn default_level_latency() -> u64 {
        defaults::PTW_LEVEL_LATENCY
    }
}

impl Default for PtwConfig {
    fn default() -> Self {
        Self {
            levels: defaults::PTW_LEVELS,
            cache_size: defaults::PTW_CACHE_SIZE,
            level_latency: defaults::PTW_LEVEL_LATENCY,
        }
    }
}

/// Main memory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DramConfig {
    /// Fixed access latency in cycles.
    #[serde(default = "DramConfig::default_latency")]
    pub latency: u64,
}

impl DramConfig {
    fn default_latency() -> u64 {
        defaults::DRAM_LATENCY
    }
}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            latency: defaults::DRAM_LATENCY,
        }
    }
}

/// Cycles between bandit arm re-selections.
pub const BANDIT_UPDATE_PERIOD: u64 = defaults::BANDIT_UPDATE_PERIOD;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_rob_rejected() {
        let mut config = Config::default();
        config.core.rob_size = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroSize {
                component: "core".to_string(),
                field: "rob_size",
            })
        );
    }

    #[test]
    fn test_non_power_of_two_sets_rejected() {
        let mut config = Config::default();
        config.l1d.sets = 48;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPowerOfTwo { field: "sets", .. })
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{
            "run": { "warmup_instructions": 1000, "simulation_instructions": 5000 },
            "core": { "rob_size": 64, "branch_predictor": "GShare" },
            "llc": { "sets": 256, "ways": 16, "prefetcher": "Berti", "replacement": "Bandit" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.run.warmup_instructions, 1000);
        assert_eq!(config.core.rob_size, 64);
        assert_eq!(config.core.branch_predictor, BranchPredictor::GShare);
        assert_eq!(config.llc.prefetcher, DataPrefetcher::Berti);
        assert_eq!(config.llc.replacement, ReplacementPolicy::Bandit);
        assert!(config.validate().is_ok());
    }
}
