#![forbid(unsafe_code)]

//! Half-open time ranges and the set algebra over their unions.
//!
//! A *union* is a `Vec<TimeRange>`. Every function here is pure and total:
//! inputs may be unsorted and overlapping, outputs are always simplified
//! (pairwise disjoint, non-touching, sorted ascending by start).
//!
//! # Example
//!
//! ```
//! use feedsync_core::span::{TimeRange, difference, simplify_union};
//!
//! let known = vec![TimeRange::new(0, 100).unwrap()];
//! let wanted = [TimeRange::new(50, 150).unwrap()];
//! assert_eq!(difference(&wanted, &known), vec![TimeRange::new(100, 150).unwrap()]);
//!
//! let merged = simplify_union(&[TimeRange::new(0, 100).unwrap(), TimeRange::new(100, 150).unwrap()]);
//! assert_eq!(merged, vec![TimeRange::new(0, 150).unwrap()]);
//! ```

use std::fmt;

/// Epoch milliseconds.
pub type Timestamp = i64;

/// A non-empty half-open interval `[start, end)` of epoch milliseconds.
///
/// The constructor rejects degenerate ranges (`start >= end`), so a
/// `TimeRange` can always be inserted into a union as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawTimeRange"))]
pub struct TimeRange {
    start: Timestamp,
    end: Timestamp,
}

/// Wire form of [`TimeRange`]; validated through [`TimeRange::new`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawTimeRange {
    start: Timestamp,
    end: Timestamp,
}

#[cfg(feature = "serde")]
impl TryFrom<RawTimeRange> for TimeRange {
    type Error = String;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
            .ok_or_else(|| format!("empty time range: start {} >= end {}", raw.start, raw.end))
    }
}

impl TimeRange {
    /// Create `[start, end)`; `None` when the range would be empty.
    #[must_use]
    pub const fn new(start: Timestamp, end: Timestamp) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// The one-millisecond range containing `t`.
    #[must_use]
    pub const fn instant(t: Timestamp) -> Self {
        if t == Timestamp::MAX {
            Self {
                start: Timestamp::MAX - 1,
                end: Timestamp::MAX,
            }
        } else {
            Self {
                start: t,
                end: t + 1,
            }
        }
    }

    /// Everything strictly before `end`.
    #[must_use]
    pub const fn before(end: Timestamp) -> Option<Self> {
        Self::new(Timestamp::MIN, end)
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> Timestamp {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> Timestamp {
        self.end
    }

    /// Length in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.end.abs_diff(self.start)
    }

    /// Whether `t` lies inside `[start, end)`.
    #[inline]
    #[must_use]
    pub const fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }

    /// Shared interior points exist. Touching ranges do not overlap.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        !(self.end <= other.start || other.end <= self.start)
    }

    /// Overlapping or adjacent; such pairs collapse into one range in a union.
    #[inline]
    #[must_use]
    pub const fn touches(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// `[max(start), min(end))`, or `None` if that is empty.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        Self::new(self.start.max(other.start), self.end.min(other.end))
    }

    /// `self` minus `other`: zero, one or two pieces.
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Vec<Self> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let covered_left = other.start <= self.start;
        let covered_right = other.end >= self.end;
        match (covered_left, covered_right) {
            // fully covered
            (true, true) => Vec::new(),
            // other overlaps our left part
            (true, false) => vec![Self {
                start: other.end,
                end: self.end,
            }],
            // other overlaps our right part
            (false, true) => vec![Self {
                start: self.start,
                end: other.start,
            }],
            // other sits strictly inside: split
            (false, false) => vec![
                Self {
                    start: self.start,
                    end: other.start,
                },
                Self {
                    start: other.end,
                    end: self.end,
                },
            ],
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Merge overlapping or touching ranges until the union is pairwise disjoint.
///
/// Output is sorted ascending by start. Sort-then-sweep gives the same
/// result as repeated pairwise merging.
#[must_use]
pub fn simplify_union(ranges: &[TimeRange]) -> Vec<TimeRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort_unstable();

    let mut out: Vec<TimeRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match out.last_mut() {
            Some(last) if last.touches(&range) => {
                last.end = last.end.max(range.end);
            }
            _ => out.push(range),
        }
    }
    out
}

/// Pairwise intersection of two unions, simplified.
#[must_use]
pub fn intersect(a: &[TimeRange], b: &[TimeRange]) -> Vec<TimeRange> {
    let mut out = Vec::new();
    for x in a {
        for y in b {
            if let Some(common) = x.intersection(y) {
                out.push(common);
            }
        }
    }
    simplify_union(&out)
}

/// Left fold of [`intersect`] over several unions.
///
/// Stops as soon as a step yields the empty union. An empty list folds to
/// the empty union.
#[must_use]
pub fn reduce_intersect(unions: &[Vec<TimeRange>]) -> Vec<TimeRange> {
    let Some((first, rest)) = unions.split_first() else {
        return Vec::new();
    };
    let mut acc = simplify_union(first);
    for union in rest {
        if acc.is_empty() {
            break;
        }
        acc = intersect(&acc, union);
    }
    acc
}

/// Points of `a` not covered by `b`, simplified.
///
/// Each range of `a` is cut by every range of `b` separately, then the
/// per-cut remainders are intersected so that only points missed by all of
/// `b` survive.
#[must_use]
pub fn difference(a: &[TimeRange], b: &[TimeRange]) -> Vec<TimeRange> {
    if b.is_empty() {
        return simplify_union(a);
    }
    let mut out = Vec::new();
    for range in a {
        let remainders: Vec<Vec<TimeRange>> = b.iter().map(|cut| range.subtract(cut)).collect();
        out.extend(reduce_intersect(&remainders));
    }
    simplify_union(&out)
}

/// Union of two unions, simplified.
#[must_use]
pub fn union(a: &[TimeRange], b: &[TimeRange]) -> Vec<TimeRange> {
    let mut all = Vec::with_capacity(a.len() + b.len());
    all.extend_from_slice(a);
    all.extend_from_slice(b);
    simplify_union(&all)
}

/// Whether every point of `span` is inside `union`.
#[must_use]
pub fn covers(union: &[TimeRange], span: TimeRange) -> bool {
    difference(&[span], union).is_empty()
}

/// Whether the instant `t` is inside `union`.
#[must_use]
pub fn contains_instant(union: &[TimeRange], t: Timestamp) -> bool {
    union.iter().any(|r| r.contains(t))
}
