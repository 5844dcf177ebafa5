//! Reuse distance trackers behind [`ReuseDistanceTracker`]
use crate::{MAX_BUCKET, ReuseDistanceTracker, distance_bucket};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::collections::HashMap;

/// Approximate LRU stack with logarithmic buckets and random replacement.
///
/// Bucket 0 holds the most recent line, bucket `b > 0` holds up to `2^(b-1)`
/// lines. A new reference goes to bucket 0 and pushes a randomly chosen line of
/// each full bucket one level down, so the order inside a bucket is lost and a
/// line's bucket only approximates its real stack depth. Lines pushed out of the
/// deepest bucket are forgotten, which bounds memory.
pub struct LogBucketTracker {
    buckets: Vec<Vec<u64>>,
    /// line -> (bucket, position in bucket)
    location: HashMap<u64, (usize, usize)>,
    rng: StdRng,
}

impl LogBucketTracker {
    pub fn new() -> Self {
        Self {
            buckets: vec![vec![]; MAX_BUCKET as usize + 1],
            location: HashMap::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    fn capacity(bucket: usize) -> usize {
        if bucket == 0 { 1 } else { 1 << (bucket - 1) }
    }

    fn remove(&mut self, bucket: usize, pos: usize) {
        let lines = &mut self.buckets[bucket];
        lines.swap_remove(pos);
        if pos < lines.len() {
            self.location.insert(lines[pos], (bucket, pos));
        }
    }
}

impl Default for LogBucketTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReuseDistanceTracker for LogBucketTracker {
    fn reference(&mut self, addr: u64) -> Option<u32> {
        let result = match self.location.remove(&addr) {
            Some((bucket, pos)) => {
                self.remove(bucket, pos);
                Some(bucket as u32)
            }
            None => None,
        };

        // insert at the top, cascading victims downwards
        let mut carry = addr;
        for bucket in 0..self.buckets.len() {
            let lines = &mut self.buckets[bucket];
            if lines.len() < Self::capacity(bucket) {
                self.location.insert(carry, (bucket, lines.len()));
                lines.push(carry);
                return result;
            }
            let pos = self.rng.gen_range(0..lines.len());
            let victim = std::mem::replace(&mut lines[pos], carry);
            self.location.insert(carry, (bucket, pos));
            carry = victim;
        }
        self.location.remove(&carry);
        result
    }
}

const MIN_CAPACITY: usize = 1024;

/// Exact LRU stack distance.
///
/// Every line remembers the time of its last reference, and a Fenwick tree over
/// time slots marks the slots that are still some line's last reference. The
/// distance of a reference is the number of marks after the line's previous
/// slot. When the slots run out they are renumbered densely, so memory stays
/// proportional to the number of distinct lines.
pub struct ExactTracker {
    last_access: HashMap<u64, usize>,
    /// 1-indexed Fenwick tree, `tree.len() - 1` slots
    tree: Vec<i64>,
    clock: usize,
}

impl ExactTracker {
    pub fn new() -> Self {
        Self {
            last_access: HashMap::new(),
            tree: vec![0; MIN_CAPACITY + 1],
            clock: 0,
        }
    }

    fn slots(&self) -> usize {
        self.tree.len() - 1
    }

    fn add(&mut self, slot: usize, delta: i64) {
        let mut i = slot + 1;
        while i < self.tree.len() {
            self.tree[i] += delta;
            i += i & i.wrapping_neg();
        }
    }

    /// number of marks in slots `[0, end)`
    fn prefix(&self, end: usize) -> i64 {
        let mut sum = 0;
        let mut i = end;
        while i > 0 {
            sum += self.tree[i];
            i -= i & i.wrapping_neg();
        }
        sum
    }

    fn compact(&mut self) {
        let mut live: Vec<(usize, u64)> = self
            .last_access
            .iter()
            .map(|(line, time)| (*time, *line))
            .collect();
        live.sort_unstable();

        let slots = std::cmp::max(live.len() * 2, MIN_CAPACITY);
        self.tree = vec![0; slots + 1];
        for (slot, (_, line)) in live.iter().enumerate() {
            self.last_access.insert(*line, slot);
            self.add(slot, 1);
        }
        self.clock = live.len();
    }

    /// distinct lines referenced after slot `last`
    fn distance(&self, last: usize) -> u64 {
        (self.prefix(self.clock) - self.prefix(last + 1)) as u64
    }
}

impl Default for ExactTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReuseDistanceTracker for ExactTracker {
    fn reference(&mut self, addr: u64) -> Option<u32> {
        if self.clock == self.slots() {
            self.compact();
        }

        let result = match self.last_access.get(&addr).copied() {
            Some(last) => {
                let distance = self.distance(last);
                self.add(last, -1);
                Some(distance_bucket(distance))
            }
            None => None,
        };

        let now = self.clock;
        self.add(now, 1);
        self.last_access.insert(addr, now);
        self.clock += 1;
        result
    }
}
