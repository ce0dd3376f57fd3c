//! Trace-driven, cycle-level out-of-order CPU and memory-hierarchy
//! simulator.
//!
//! This crate implements the simulator core used for micro-architecture
//! research:
//! 1. **Pipeline:** An out-of-order core (fetch through retire) with a
//!    reorder buffer, load/store queues, register and memory dependency
//!    tracking, and branch-mispredict recovery.
//! 2. **Memory:** One generic set-associative cache component instantiated
//!    as L1I/L1D/L2/LLC and the TLBs, with MSHRs, bounded per-cycle
//!    bandwidth, a page-table walker, and a fixed-latency memory endpoint.
//! 3. **Clocking:** A deterministic tick loop that advances every
//!    component at its own frequency scale in registration order.
//! 4. **Extension points:** Pluggable branch predictors, instruction and
//!    data prefetchers (including Berti), and replacement policies
//!    (including a UCB bandit orchestrator).
//!
//! Traces arrive pre-decoded through [`sim::trace::TraceSource`]; file
//! decoding, argument parsing, and report formatting live outside this
//! crate.

/// Request/response plumbing between hierarchy levels.
pub mod channel;

/// Common constants, address helpers, and configuration faults.
pub mod common;

/// Hierarchical run configuration.
pub mod config;

/// The out-of-order core.
pub mod core;

/// The memory hierarchy and its extension points.
pub mod mem;

/// Clocks, traces, and the machine.
pub mod sim;

/// Per-phase statistics.
pub mod stats;

/// Root configuration type; build with `Config::default()` or deserialize
/// from JSON.
pub use crate::config::Config;
/// The constructed topology and its tick loop.
pub use crate::sim::machine::Machine;
/// Pre-decoded trace records and sources.
pub use crate::sim::trace::{ScriptedTrace, TraceRecord, TraceSource};
