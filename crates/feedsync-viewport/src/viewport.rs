#![forbid(unsafe_code)]

//! Virtual scroll offset over a time-ordered item list.
//!
//! Items are laid out at negative positions growing away from the live
//! edge (newest near `0`, older items further down the negative axis).
//! An item renders at `position + offset`; the visible window is
//! `[-height, 0]`.
//!
//! The raw scroll position of the window is reported through
//! [`ScrollSample`]. Near the top of the window the offset grows by half a
//! window, near the bottom it shrinks by the same amount. The two bands do
//! not meet, which keeps the offset from bouncing at the boundary.
//!
//! # Invariants
//!
//! - `offset >= 0`.
//! - `max_scroll_offset` is written at most once.
//! - Once frozen, every adjustment clamps `offset` to
//!   `[0, max(0, max_scroll_offset - headroom * height)]`.

use bitflags::bitflags;

/// Default headroom between the frozen bound and the offset clamp, in
/// window heights.
pub const DEFAULT_HEADROOM: f64 = 3.0;

/// Raw scroll position of the window, distances in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollSample {
    /// Distance from the window's top boundary (older side).
    pub from_top: f64,
    /// Distance from the window's bottom boundary (live side).
    pub from_bottom: f64,
}

bitflags! {
    /// Which ends of the feed the window is close to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ScrollEdges: u8 {
        /// No edge nearby.
        const NONE   = 0b00;
        /// The oldest cached item is within the margin.
        const OLDEST = 0b01;
        /// The live edge is within the margin.
        const NEWEST = 0b10;
    }
}

impl Default for ScrollEdges {
    fn default() -> Self {
        Self::NONE
    }
}

/// Scroll offset, window height and the discovered upper bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    offset: f64,
    height: f64,
    max_scroll_offset: Option<f64>,
    headroom: f64,
}

impl Viewport {
    /// A viewport at the live edge. Negative or NaN heights become `0`.
    #[must_use]
    pub fn new(height: f64) -> Self {
        Self {
            offset: 0.0,
            height: sanitize(height),
            max_scroll_offset: None,
            headroom: DEFAULT_HEADROOM,
        }
    }

    /// Set the headroom (in window heights) kept below the frozen bound.
    #[must_use]
    pub fn with_headroom(mut self, headroom: f64) -> Self {
        self.headroom = sanitize(headroom);
        self
    }

    #[must_use]
    pub fn offset(&self) -> f64 {
        self.offset
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.height
    }

    #[must_use]
    pub fn max_scroll_offset(&self) -> Option<f64> {
        self.max_scroll_offset
    }

    /// Highest offset the clamp allows, once the bound is frozen.
    #[must_use]
    pub fn offset_limit(&self) -> Option<f64> {
        self.max_scroll_offset
            .map(|max| (max - self.headroom * self.height).max(0.0))
    }

    /// Whether there is still room to grow the offset.
    #[must_use]
    pub fn has_headroom(&self) -> bool {
        self.offset_limit().is_none_or(|limit| self.offset < limit)
    }

    /// Resize the window. The offset is re-clamped.
    pub fn set_height(&mut self, height: f64) {
        self.height = sanitize(height);
        self.offset = self.clamp(self.offset);
    }

    /// Apply one scroll sample. Returns the offset change (zero when the
    /// window is inside the dead band).
    pub fn on_scroll(&mut self, sample: ScrollSample) -> f64 {
        let half = self.height / 2.0;
        let before = self.offset;

        if sample.from_top < half && self.has_headroom() {
            self.offset = self.clamp(self.offset + half);
        } else if sample.from_bottom < self.height * 1.5 && self.offset > 0.0 {
            self.offset = self.clamp(self.offset - half);
        }

        let delta = self.offset - before;
        if delta != 0.0 {
            tracing::trace!(offset = self.offset, delta, "viewport offset adjusted");
        }
        delta
    }

    /// Shift the offset by `delta` and clamp.
    pub fn shift(&mut self, delta: f64) {
        if delta.is_finite() {
            self.offset = self.clamp(self.offset + delta);
        }
    }

    /// Freeze the upper bound from the oldest item's layout position.
    ///
    /// Only the first call has an effect. Returns whether this call froze
    /// the bound.
    pub fn freeze_upper_bound(&mut self, oldest_position: f64) -> bool {
        if self.max_scroll_offset.is_some() || !oldest_position.is_finite() {
            return false;
        }
        let max = -oldest_position + 0.5 * self.height;
        self.max_scroll_offset = Some(max);
        self.offset = self.clamp(self.offset);
        tracing::debug!(max_scroll_offset = max, offset = self.offset, "upper scroll bound frozen");
        true
    }

    /// Whether a rendered position falls inside the window.
    #[must_use]
    pub fn is_visible(&self, position: f64) -> bool {
        let y = position + self.offset;
        (-self.height..=0.0).contains(&y)
    }

    /// Which edges are within `margin` window heights.
    ///
    /// `oldest_position` is the layout position of the oldest cached item;
    /// `None` with `has_items == false` means nothing is cached, which
    /// counts as being at the oldest edge. An oldest item that has no
    /// position yet does not count.
    #[must_use]
    pub fn edges(&self, oldest_position: Option<f64>, has_items: bool, margin: f64) -> ScrollEdges {
        let margin = sanitize(margin);
        let mut edges = ScrollEdges::NONE;

        let near_oldest = match oldest_position {
            Some(pos) => pos + self.offset >= -self.height * (1.0 + margin),
            None => !has_items,
        };
        if near_oldest {
            edges |= ScrollEdges::OLDEST;
        }
        if self.offset < self.height * margin {
            edges |= ScrollEdges::NEWEST;
        }
        edges
    }

    fn clamp(&self, offset: f64) -> f64 {
        let offset = offset.max(0.0);
        match self.offset_limit() {
            Some(limit) => offset.min(limit),
            None => offset,
        }
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}
