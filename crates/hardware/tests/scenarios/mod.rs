//! End-to-end behavior scenarios.

mod eviction;
mod fill_bandwidth;
mod next_line;
mod pipeline;
mod translation;
