//! The memory hierarchy: generic cache, page-table walker, main memory,
//! and the data-prefetcher / replacement-policy extension points.

/// Generic set-associative cache with MSHRs and bounded bandwidth.
pub mod cache;

/// Main-memory endpoint at the root of the hierarchy.
pub mod dram;

/// Data prefetcher extension points.
pub mod prefetch;

/// Page-table walker.
pub mod ptw;

/// Replacement policy extension points.
pub mod replacement;

/// Cross-component observations passed into module hooks each cycle.
///
/// Two quantities produced by the cores are consumed inside cache modules:
/// the core's running IPC (bandit reward) and nothing else. They travel in
/// this struct rather than through globals.
#[derive(Clone, Debug, Default)]
pub struct SimObservation {
    /// Running IPC per CPU for the current phase.
    pub ipc: Vec<f64>,
}

impl SimObservation {
    /// IPC of the given CPU; 0.0 for unknown CPUs.
    pub fn ipc(&self, cpu: u32) -> f64 {
        self.ipc.get(cpu as usize).copied().unwrap_or(0.0)
    }
}
