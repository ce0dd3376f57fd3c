//! Decoded instruction buffer.
//!
//! A set-associative cache of recently decoded fetch windows, keyed by the
//! window-aligned PC. A hit means the decode work was already done for this
//! window: the instruction skips the instruction fetch and the decode
//! delay.

#[derive(Clone, Copy, Default)]
struct DibEntry {
    valid: bool,
    address: u64,
    lru: u64,
}

/// Decoded-instruction-buffer state.
pub struct Dib {
    entries: Vec<DibEntry>,
    sets: usize,
    ways: usize,
    window_shift: u32,
    tick: u64,
}

impl Dib {
    /// Creates a DIB with the given geometry. `window` is the PC alignment
    /// in bytes and must be a power of two.
    pub fn new(sets: usize, ways: usize, window: usize) -> Self {
        Self {
            entries: vec![DibEntry::default(); sets * ways],
            sets,
            ways,
            window_shift: window.trailing_zeros(),
            tick: 0,
        }
    }

    fn set_of(&self, ip: u64) -> usize {
        ((ip >> self.window_shift) as usize) & (self.sets - 1)
    }

    fn window_of(&self, ip: u64) -> u64 {
        ip >> self.window_shift
    }

    /// Looks up the window for `ip`, refreshing recency on a hit.
    pub fn hit(&mut self, ip: u64) -> bool {
        let set = self.set_of(ip);
        let window = self.window_of(ip);
        let base = set * self.ways;
        for way in 0..self.ways {
            let entry = &mut self.entries[base + way];
            if entry.valid && entry.address == window {
                self.tick += 1;
                entry.lru = self.tick;
                return true;
            }
        }
        false
    }

    /// Installs the window for `ip` after decode, evicting the least
    /// recently used way.
    pub fn update(&mut self, ip: u64) {
        let set = self.set_of(ip);
        let window = self.window_of(ip);
        let base = set * self.ways;
        self.tick += 1;

        // Refresh an existing entry rather than duplicating the window.
        for way in 0..self.ways {
            let entry = &mut self.entries[base + way];
            if entry.valid && entry.address == window {
                entry.lru = self.tick;
                return;
            }
        }

        let victim = (0..self.ways)
            .min_by_key(|&way| {
                let entry = &self.entries[base + way];
                if entry.valid { entry.lru } else { 0 }
            })
            .unwrap_or(0);
        self.entries[base + victim] = DibEntry {
            valid: true,
            address: window,
            lru: self.tick,
        };
    }
}
