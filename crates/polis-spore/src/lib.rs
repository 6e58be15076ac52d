//! # Polis SPORE digests
//!
//! Range-set algebra over the 256-bit hash space, used by the anti-entropy
//! exchange to describe "which entry versions do I hold" without shipping the
//! entries themselves.
//!
//! Every replicated entry version hashes (BLAKE3) to one point in `[0, 2^256)`.
//! A node's HaveList is the [`Spore`] of all its points. Two nodes compare
//! HaveLists and ship only what the other side lacks:
//!
//! ```text
//! to_send    = my_have \ their_have
//! to_receive = their_have \ my_have
//! differs    = my_have XOR their_have   (empty once converged)
//! ```
//!
//! Adjacent points coalesce into a single range, so a node holding a dense
//! region of the space pays for the boundaries, not for every value.

mod u256;

pub use u256::U256;

use serde::{Deserialize, Serialize};
use std::cmp::{max, min};

/// Half-open range `[start, stop)` in the hash space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range256 {
    pub start: U256,
    pub stop: U256,
}

impl Range256 {
    /// Returns `None` when `start > stop`.
    pub fn new(start: U256, stop: U256) -> Option<Self> {
        (start <= stop).then_some(Range256 { start, stop })
    }

    /// Single-value range covering exactly `point`.
    pub fn point(point: U256) -> Self {
        Range256 {
            start: point,
            stop: point.successor(),
        }
    }

    pub fn full() -> Self {
        Range256 {
            start: U256::ZERO,
            stop: U256::MAX,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.stop
    }

    pub fn contains(&self, v: &U256) -> bool {
        self.start <= *v && *v < self.stop
    }

    fn intersect(&self, other: &Range256) -> Option<Range256> {
        let start = max(self.start, other.start);
        let stop = min(self.stop, other.stop);
        (start < stop).then_some(Range256 { start, stop })
    }

    /// Join two overlapping or touching ranges.
    fn coalesce(&self, other: &Range256) -> Option<Range256> {
        if self.stop < other.start || other.stop < self.start {
            return None;
        }
        Some(Range256 {
            start: min(self.start, other.start),
            stop: max(self.stop, other.stop),
        })
    }
}

/// A sorted list of disjoint, non-touching ranges.
///
/// Values outside every range are implicitly excluded and cost nothing to
/// encode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Spore {
    ranges: Vec<Range256>,
}

impl Spore {
    pub fn empty() -> Self {
        Spore { ranges: Vec::new() }
    }

    pub fn full() -> Self {
        Spore {
            ranges: vec![Range256::full()],
        }
    }

    /// Normalise arbitrary ranges: sort, drop empties, coalesce neighbours.
    pub fn from_ranges(mut ranges: Vec<Range256>) -> Self {
        ranges.retain(|r| !r.is_empty());
        ranges.sort_by(|a, b| a.start.cmp(&b.start));

        let mut merged: Vec<Range256> = Vec::with_capacity(ranges.len());
        for range in ranges {
            if let Some(last) = merged.last_mut() {
                if let Some(joined) = last.coalesce(&range) {
                    *last = joined;
                    continue;
                }
            }
            merged.push(range);
        }
        Spore { ranges: merged }
    }

    /// HaveList of a set of points.
    ///
    /// A point equal to [`U256::MAX`] has no representable successor and is
    /// dropped; it will simply be re-sent on every exchange.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = U256>,
    {
        Spore::from_ranges(points.into_iter().map(Range256::point).collect())
    }

    /// HaveList of a set of 32-byte hashes.
    pub fn from_hashes<'a, I>(hashes: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8; 32]>,
    {
        Spore::from_points(hashes.into_iter().map(U256::from_be_bytes))
    }

    pub fn ranges(&self) -> &[Range256] {
        &self.ranges
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Encoded size in bytes: two 32-byte bounds per range.
    pub fn encoding_size(&self) -> usize {
        64 * self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn covers(&self, v: &U256) -> bool {
        // First range whose stop is beyond v is the only candidate.
        let idx = self.ranges.partition_point(|r| r.stop <= *v);
        self.ranges.get(idx).is_some_and(|r| r.contains(v))
    }

    pub fn covers_hash(&self, hash: &[u8; 32]) -> bool {
        self.covers(&U256::from_be_bytes(hash))
    }

    pub fn union(&self, other: &Spore) -> Spore {
        let mut all = self.ranges.clone();
        all.extend_from_slice(&other.ranges);
        Spore::from_ranges(all)
    }

    pub fn intersect(&self, other: &Spore) -> Spore {
        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            if let Some(overlap) = self.ranges[i].intersect(&other.ranges[j]) {
                result.push(overlap);
            }
            if self.ranges[i].stop <= other.ranges[j].stop {
                i += 1;
            } else {
                j += 1;
            }
        }
        Spore { ranges: result }
    }

    /// Values in `self` but not in `other`.
    pub fn subtract(&self, other: &Spore) -> Spore {
        let mut result = Vec::new();
        for range in &self.ranges {
            let mut cursor = range.start;
            for cut in &other.ranges {
                if cut.stop <= cursor {
                    continue;
                }
                if cut.start >= range.stop {
                    break;
                }
                if cursor < cut.start {
                    result.push(Range256 {
                        start: cursor,
                        stop: min(cut.start, range.stop),
                    });
                }
                cursor = max(cursor, cut.stop);
            }
            if cursor < range.stop {
                result.push(Range256 {
                    start: cursor,
                    stop: range.stop,
                });
            }
        }
        Spore { ranges: result }
    }

    /// Symmetric difference: what exactly one side holds.
    pub fn xor(&self, other: &Spore) -> Spore {
        self.subtract(other).union(&other.subtract(self))
    }
}
