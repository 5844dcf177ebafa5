use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Address range of a basic block, or a point probe used to look up the block
/// that contains an address.
///
/// A point probe is encoded with `end == start - 1`, which no real block can
/// have. Probes compare equal to every range that contains them, so a sorted
/// map of disjoint ranges can be searched by address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntervalKey {
    /// address of the first instruction
    start: u64,
    /// address of the last instruction
    end: u64,
    /// block size in bytes
    size: u64,
}

impl IntervalKey {
    pub fn new(start: u64, end: u64, size: u64) -> Self {
        match Self::try_new(start, end, size) {
            Ok(key) => key,
            Err(err) => panic!("{}", err),
        }
    }

    /// Like [`IntervalKey::new`], but reports unusable ranges as errors
    pub fn try_new(start: u64, end: u64, size: u64) -> anyhow::Result<Self> {
        // the whole address space would be encoded like a point probe
        if end < start || (start == 0 && end == u64::MAX) {
            bail!("Invalid block range 0x{:x}:0x{:x}", start, end);
        }
        Ok(Self { start, end, size })
    }

    pub fn point(addr: u64) -> Self {
        Self {
            start: addr,
            end: addr.wrapping_sub(1),
            size: 0,
        }
    }

    pub fn is_point(&self) -> bool {
        self.start.wrapping_sub(self.end) == 1
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// inclusive on both ends
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr <= self.end
    }
}

impl Ord for IntervalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_point(), other.is_point()) {
            (true, true) => self.start.cmp(&other.start),
            (true, false) => {
                if other.contains(self.start) {
                    Ordering::Equal
                } else {
                    self.start.cmp(&other.start)
                }
            }
            (false, true) => other.cmp(self).reverse(),
            (false, false) => self
                .start
                .cmp(&other.start)
                .then(self.end.cmp(&other.end)),
        }
    }
}

impl PartialOrd for IntervalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IntervalKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IntervalKey {}
