use crate::{ExactTracker, LogBucketTracker};
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::{fmt, io::Write, str::FromStr};

/// Accesses within one 64-byte line collapse to one stream position
pub const LINE_MASK: u64 = !63;

/// Highest histogram bucket, larger distances are clamped into it
pub const MAX_BUCKET: u32 = 30;

/// Computes LRU stack distances of a reference stream
pub trait ReuseDistanceTracker: Send {
    /// Records a reference to `addr` and returns the log2 bucket of its stack
    /// distance (see [`distance_bucket`]), or `None` on the first reference.
    fn reference(&mut self, addr: u64) -> Option<u32>;
}

/// Bucket of a stack distance: 0 for distance 0, otherwise `floor(log2(d)) + 1`,
/// so that bucket `b > 0` covers distances `[2^(b-1), 2^b)`.
pub fn distance_bucket(distance: u64) -> u32 {
    if distance == 0 {
        0
    } else {
        distance.ilog2() + 1
    }
}

/// Which reuse distance tracker feeds the LDV (LRU stack distance vector)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LdvMode {
    /// no reuse distance collection
    #[default]
    None,
    /// logarithmic buckets with random replacement
    #[serde(alias = "approximate")]
    Approx,
    /// order statistics over last access times
    Exact,
}

impl LdvMode {
    pub fn new_tracker(&self) -> Option<Box<dyn ReuseDistanceTracker>> {
        match self {
            LdvMode::None => None,
            LdvMode::Approx => Some(Box::new(LogBucketTracker::new())),
            LdvMode::Exact => Some(Box::new(ExactTracker::new())),
        }
    }
}

impl FromStr for LdvMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "none" => Ok(LdvMode::None),
            "approx" | "approximate" => Ok(LdvMode::Approx),
            "exact" => Ok(LdvMode::Exact),
            other => bail!("Invalid ldv type: {}", other),
        }
    }
}

impl fmt::Display for LdvMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdvMode::None => write!(f, "none"),
            LdvMode::Approx => write!(f, "approx"),
            LdvMode::Exact => write!(f, "exact"),
        }
    }
}

/// Per-slice histogram of reuse distance buckets
pub struct ReuseHistogram {
    tracker: Box<dyn ReuseDistanceTracker>,
    counts: [u64; MAX_BUCKET as usize + 1],
}

impl ReuseHistogram {
    pub fn new(tracker: Box<dyn ReuseDistanceTracker>) -> Self {
        Self {
            tracker,
            counts: [0; MAX_BUCKET as usize + 1],
        }
    }

    pub fn access(&mut self, addr: u64) {
        // cold references count as infinitely far
        let bucket = self
            .tracker
            .reference(addr & LINE_MASK)
            .unwrap_or(MAX_BUCKET)
            .min(MAX_BUCKET);
        self.counts[bucket as usize] += 1;
    }

    #[cfg(test)]
    fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Writes the nonzero buckets as `:bucket:count ` pairs and clears them
    pub fn emit<W: Write>(&mut self, out: &mut W) -> anyhow::Result<()> {
        for (bucket, count) in self.counts.iter_mut().enumerate() {
            if *count != 0 {
                write!(out, ":{}:{} ", bucket, count)?;
            }
            *count = 0;
        }
        Ok(())
    }
}
