#![forbid(unsafe_code)]

//! Time-ordered items held by the caches.
//!
//! The caches only care about two things: a stable identity key (for
//! dedup, later write wins) and an anchor timestamp (for ordering). Items
//! that cover a stretch of time rather than an instant also report their
//! own [`TimeRange`] so open-ended span queries can match them.

use std::fmt;
use std::hash::Hash;

use crate::span::{TimeRange, Timestamp};

/// An entity with a stable identity, ordered by an anchor timestamp.
pub trait TimedItem: Clone {
    /// Identity used for dedup and pagination cursors.
    type Id: Clone + Eq + Hash + fmt::Debug;

    /// The identity key of this item.
    fn id(&self) -> Self::Id;

    /// The timestamp the item is ordered and bucketed by.
    fn anchor(&self) -> Timestamp;

    /// The stretch of time this item stands for.
    ///
    /// Defaults to the single millisecond at [`anchor`](Self::anchor).
    fn span(&self) -> TimeRange {
        TimeRange::instant(self.anchor())
    }
}

/// Score attached to a message once analysis has run.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ToxicityScore {
    /// Probability-like score in `[0, 1]`.
    pub toxicity: f32,
}

impl ToxicityScore {
    /// Create a score, clamping into `[0, 1]`. NaN maps to 0.
    #[must_use]
    pub fn new(toxicity: f32) -> Self {
        let toxicity = if toxicity.is_nan() {
            0.0
        } else {
            toxicity.clamp(0.0, 1.0)
        };
        Self { toxicity }
    }

    /// Whether the score reaches `threshold`.
    #[must_use]
    pub fn is_flagged(&self, threshold: f32) -> bool {
        self.toxicity >= threshold
    }
}

/// A raw chat message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    pub id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub timestamp: Timestamp,
    /// `None` until the analysis collaborator has scored the content.
    pub toxicity: Option<ToxicityScore>,
}

impl Message {
    /// Minimal constructor; remaining fields default to empty.
    #[must_use]
    pub fn new(id: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            id: id.into(),
            guild_id: String::new(),
            channel_id: String::new(),
            author_id: String::new(),
            content: String::new(),
            timestamp,
            toxicity: None,
        }
    }

    #[must_use]
    pub fn with_content(mut self, author_id: impl Into<String>, content: impl Into<String>) -> Self {
        self.author_id = author_id.into();
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_toxicity(mut self, score: ToxicityScore) -> Self {
        self.toxicity = Some(score);
        self
    }
}

impl TimedItem for Message {
    type Id = String;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn anchor(&self) -> Timestamp {
        self.timestamp
    }
}

/// Fixed-width bucket of message counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AggregateBucket {
    pub timespan: TimeRange,
    pub message_count: u64,
    pub flagged_count: u64,
}

impl TimedItem for AggregateBucket {
    /// Buckets are identified by where they start.
    type Id = Timestamp;

    fn id(&self) -> Timestamp {
        self.timespan.start()
    }

    fn anchor(&self) -> Timestamp {
        self.timespan.start()
    }

    fn span(&self) -> TimeRange {
        self.timespan
    }
}

/// Calendar-free unit for summary intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeUnit {
    /// Milliseconds in one unit.
    #[must_use]
    pub const fn millis(self) -> i64 {
        match self {
            Self::Minute => 60_000,
            Self::Hour => 3_600_000,
            Self::Day => 86_400_000,
            Self::Week => 604_800_000,
        }
    }
}

/// `step` units of time starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeInterval {
    pub start: Timestamp,
    pub unit: TimeUnit,
    pub step: u32,
}

impl TimeInterval {
    /// Exclusive end of the interval (saturating).
    #[must_use]
    pub fn end(&self) -> Timestamp {
        let width = self.unit.millis().saturating_mul(i64::from(self.step.max(1)));
        self.start.saturating_add(width)
    }

    /// The interval as a range. A zero step is treated as one unit.
    #[must_use]
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end()).unwrap_or(TimeRange::instant(self.start))
    }
}

/// Statistical summary of toxicity scores over an interval.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatSummary {
    pub time_interval: TimeInterval,
    pub count: u64,
    pub mean: f64,
    pub variance: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl TimedItem for StatSummary {
    type Id = TimeInterval;

    fn id(&self) -> TimeInterval {
        self.time_interval
    }

    fn anchor(&self) -> Timestamp {
        self.time_interval.start
    }

    fn span(&self) -> TimeRange {
        self.time_interval.range()
    }
}
