//! Next sequential block prefetcher.
//!
//! On every activating access, requests the block immediately after the one
//! being touched. Trivial, but the reference point every other prefetcher
//! is measured against.

use super::{DataPrefetcher, PrefetchSink};
use crate::channel::RequestType;
use crate::common::BLOCK_SIZE;

/// Next-line prefetcher state (none).
#[derive(Default)]
pub struct NextLinePrefetcher;

impl DataPrefetcher for NextLinePrefetcher {
    fn cache_operate(
        &mut self,
        addr: u64,
        ip: u64,
        _cache_hit: bool,
        _useful_prefetch: bool,
        _kind: RequestType,
        metadata_in: u32,
        sink: &mut dyn PrefetchSink,
    ) -> u32 {
        let pf_addr = (addr & !(BLOCK_SIZE - 1)) + BLOCK_SIZE;
        sink.prefetch_line(ip, addr, pf_addr, true, metadata_in);
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

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        issued: Vec<u64>,
    }

    impl PrefetchSink for RecordingSink {
        fn pq_free(&self) -> usize {
            8
        }

        fn cycle(&self) -> u64 {
            0
        }

        fn prefetch_line(
            &mut self,
            _ip: u64,
            _base_addr: u64,
            pf_addr: u64,
            _fill_this_level: bool,
            _metadata: u32,
        ) -> bool {
            self.issued.push(pf_addr);
            true
        }
    }

    #[test]
    fn test_requests_next_block() {
        let mut pf = NextLinePrefetcher;
        let mut sink = RecordingSink { issued: Vec::new() };
        pf.cache_operate(0xffff_003f, 0x400, false, false, RequestType::Load, 0, &mut sink);
        assert_eq!(sink.issued, vec![0xffff_0040]);
    }
}
