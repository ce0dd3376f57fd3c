//! Shared test infrastructure: mock hierarchy endpoints, config builders
//! for the cache scenario tests, and log-subscriber setup.

pub mod mocks;

use tracing_subscriber::EnvFilter;

use tracesim_core::common::LOG2_BLOCK_SIZE;
use tracesim_core::config::{ActivateClass, CacheLevelConfig, DataPrefetcher, ReplacementPolicy};

/// Installs the log subscriber so tests emit component logs under
/// `RUST_LOG`. Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A cache level sized for scenario tests: LRU, no prefetcher, generous
/// queues, and the given tag/fill parameters.
pub fn scenario_cache(
    sets: usize,
    ways: usize,
    hit_latency: u64,
    fill_latency: u64,
    max_tag_check: usize,
    fill_bandwidth: usize,
) -> CacheLevelConfig {
    CacheLevelConfig {
        sets,
        ways,
        rq_size: 32,
        wq_size: 32,
        pq_size: 16,
        mshr_size: 32,
        hit_latency,
        fill_latency,
        max_tag_check,
        fill_bandwidth,
        offset_bits: LOG2_BLOCK_SIZE,
        virtual_tag: false,
        wq_match_offset: false,
        prefetch_activate: vec![ActivateClass::Load, ActivateClass::Prefetch],
        prefetcher: DataPrefetcher::None,
        replacement: ReplacementPolicy::Lru,
        frequency_scale: 1.0,
    }
}
