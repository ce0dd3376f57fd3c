//! Data prefetcher extension points.
//!
//! A cache drives its prefetcher through four hooks: `cache_operate` on
//! every activating access, `cache_fill` on every block install,
//! `cycle_operate` once per cycle, and `final_stats` at end of run. The
//! prefetcher issues work back through a [`PrefetchSink`], which fronts the
//! cache's prefetch queue so the prefetcher can observe admission failures
//! and remaining capacity synchronously.

/// Per-page best-request-time delta prefetcher.
pub mod berti;

/// Next sequential block prefetcher.
pub mod next_line;

pub use berti::BertiPrefetcher;
pub use next_line::NextLinePrefetcher;

use crate::channel::RequestType;
use crate::config::DataPrefetcher as PrefetcherId;

/// The cache-side half of the prefetch interface.
pub trait PrefetchSink {
    /// Free slots in the prefetch queue.
    fn pq_free(&self) -> usize;

    /// Current cycle of the owning cache.
    fn cycle(&self) -> u64;

    /// Attempts to enqueue a prefetch for `pf_addr`. Returns false if the
    /// prefetch queue rejected it.
    fn prefetch_line(
        &mut self,
        ip: u64,
        base_addr: u64,
        pf_addr: u64,
        fill_this_level: bool,
        metadata: u32,
    ) -> bool;
}

/// One data prefetcher instance, owned by a cache.
pub trait DataPrefetcher {
    /// Called once before the first cycle.
    fn initialize(&mut self) {}

    /// Observes an activating access and may issue prefetches.
    /// Returns the metadata to attach to the access.
    fn cache_operate(
        &mut self,
        addr: u64,
        ip: u64,
        cache_hit: bool,
        useful_prefetch: bool,
        kind: RequestType,
        metadata_in: u32,
        sink: &mut dyn PrefetchSink,
    ) -> u32;

    /// Observes a block install. Returns the metadata for the filled block.
    fn cache_fill(
        &mut self,
        addr: u64,
        set: usize,
        way: usize,
        prefetch: bool,
        evicted_addr: u64,
        metadata_in: u32,
        sink: &mut dyn PrefetchSink,
    ) -> u32;

    /// Called once per cache cycle.
    fn cycle_operate(&mut self, _sink: &mut dyn PrefetchSink) {}

    /// Called once at the end of the run.
    fn final_stats(&mut self) {}
}

/// A prefetcher that never issues anything.
#[derive(Default)]
pub struct NoPrefetcher;

impl DataPrefetcher for NoPrefetcher {
    fn cache_operate(
        &mut self,
        _addr: u64,
        _ip: u64,
        _cache_hit: bool,
        _useful_prefetch: bool,
        _kind: RequestType,
        metadata_in: u32,
        _sink: &mut dyn PrefetchSink,
    ) -> u32 {
        metadata_in
    }

    fn cache_fill(
        &mut self,
        _addr: u64,
        _set: usize,
        _way: usize,
        _prefetch: bool,
        _evicted_addr: u64,
        metadata_in: u32,
        _sink: &mut dyn PrefetchSink,
    ) -> u32 {
        metadata_in
    }
}

/// Instantiates the configured prefetcher.
pub fn build_prefetcher(id: PrefetcherId) -> Box<dyn DataPrefetcher> {
    match id {
        PrefetcherId::None => Box::new(NoPrefetcher),
        PrefetcherId::NextLine => Box::new(NextLinePrefetcher::default()),
        PrefetcherId::Berti => Box::new(BertiPrefetcher::new()),
    }
}
