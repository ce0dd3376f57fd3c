//! Branch target buffer with a return-address stack.
//!
//! A direct-mapped target table keyed by the full PC, plus a small stack
//! that pairs calls with returns.

/// An entry in the target table.
#[derive(Clone, Copy, Default)]
struct BtbEntry {
    tag: u64,
    target: u64,
    valid: bool,
}

/// Branch target buffer.
pub struct Btb {
    table: Vec<BtbEntry>,
    mask: usize,
    ras: Vec<u64>,
    ras_size: usize,
}

impl Btb {
    /// Creates a BTB with `size` entries (power of two).
    pub fn new(size: usize) -> Self {
        Self {
            table: vec![BtbEntry::default(); size],
            mask: size - 1,
            ras: Vec::new(),
            ras_size: 64,
        }
    }

    fn index(&self, ip: u64) -> usize {
        ((ip >> 2) as usize) & self.mask
    }

    /// Predicted target for `ip`, if a valid entry matches.
    pub fn lookup(&self, ip: u64) -> Option<u64> {
        let entry = self.table[self.index(ip)];
        if entry.valid && entry.tag == ip {
            Some(entry.target)
        } else {
            None
        }
    }

    /// Records the resolved target for `ip`.
    pub fn update(&mut self, ip: u64, target: u64) {
        let idx = self.index(ip);
        self.table[idx] = BtbEntry {
            tag: ip,
            target,
            valid: true,
        };
    }

    /// Pushes a call's return address.
    pub fn push_return(&mut self, ret_addr: u64) {
        if self.ras.len() == self.ras_size {
            self.ras.remove(0);
        }
        self.ras.push(ret_addr);
    }

    /// Predicted target of a return.
    pub fn predict_return(&self) -> Option<u64> {
        self.ras.last().copied()
    }

    /// Pops the stack when a return retires.
    pub fn pop_return(&mut self) {
        self.ras.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_requires_exact_tag() {
        let mut btb = Btb::new(256);
        btb.update(0x400, 0x800);
        assert_eq!(btb.lookup(0x400), Some(0x800));
        // Same index, different tag.
        assert_eq!(btb.lookup(0x400 + 256 * 4), None);
    }

    #[test]
    fn test_return_stack_pairs_calls() {
        let mut btb = Btb::new(256);
        btb.push_return(0x404);
        btb.push_return(0x504);
        assert_eq!(btb.predict_return(), Some(0x504));
        btb.pop_return();
        assert_eq!(btb.predict_return(), Some(0x404));
    }
}
