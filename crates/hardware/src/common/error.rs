//! Configuration fault definitions.
//!
//! Every fault here is detected at construction time, before the first
//! simulated cycle. The engine itself has no recoverable errors: invariant
//! violations during simulation are bugs and abort with a diagnostic panic.

use thiserror::Error;

/// A fault in the supplied configuration or topology.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A size parameter that must be non-zero was zero.
    #[error("{component}: {field} must be non-zero")]
    ZeroSize {
        /// Component the field belongs to.
        component: String,
        /// Offending field name.
        field: &'static str,
    },

    /// A size parameter that must be a power of two was not.
    #[error("{component}: {field} must be a power of two (got {value})")]
    NotPowerOfTwo {
        /// Component the field belongs to.
        component: String,
        /// Offending field name.
        field: &'static str,
        /// The rejected value.
        value: usize,
    },

    /// A cache level was configured without a channel to its lower level.
    #[error("{component}: no channel to a lower level")]
    MissingLowerLevel {
        /// Component with the dangling edge.
        component: String,
    },

    /// The machine was configured with no cores.
    #[error("topology has no cores")]
    NoCores,
}
